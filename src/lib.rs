//! feedcore - feed aggregator ingestion core
//!
//! Schedules periodic feed updates, parses and diffs feed documents,
//! subscribes to WebSub hubs, and enriches new articles with thumbnails,
//! extracts, search indexing and popularity scores.

pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod feed;
pub mod http;
pub mod hubbub;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod popularity;
pub mod web;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::Database;
pub use error::{FeedcoreError, Result};
pub use feed::{Article, DiscoveredFeed, Feed, FeedUpdate};
pub use manager::{FeedManager, FeedManagerBuilder};
pub use web::CallbackServer;
