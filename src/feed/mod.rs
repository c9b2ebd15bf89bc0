//! Feed model, parsing and discovery.

pub mod discovery;
pub mod parser;
pub mod types;

pub use discovery::{normalize_link, Discoverer};
pub use types::{
    Article, DiscoveredFeed, Feed, FeedUpdate, NewFeed, ParsedArticle, ParsedFeed, UserArticle,
};
