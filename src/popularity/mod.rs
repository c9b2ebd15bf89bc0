//! Popularity scoring of recent articles.

pub mod provider;
pub mod scorer;
pub mod scoring;

pub use provider::{providers_from_config, FacebookProvider, RedditProvider, ScoreProvider};
pub use scorer::PopularityScorer;
