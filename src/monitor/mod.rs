//! Feed monitors.
//!
//! Monitors observe feed lifecycle events after new articles are persisted.
//! The pipeline calls them in a fixed order: unread initializer, thumbnailer,
//! search index.

pub mod index;
pub mod thumbnail;
pub mod unread;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::feed::{Feed, FeedUpdate};

pub use index::{IndexOperation, MemoryIndex, SearchIndex, SearchMonitor};
pub use thumbnail::ThumbnailMonitor;
pub use unread::{run_stale_sweeper, UnreadMonitor};

/// Observer of feed updates and deletions.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Called after an update cycle persisted `update.new_articles`.
    ///
    /// Long-running monitors stop taking new work once `cancel` fires.
    async fn feed_updated(&self, update: &FeedUpdate, cancel: &CancellationToken) -> Result<()>;

    /// Called before a feed with no remaining users is deleted.
    async fn feed_deleted(&self, feed: &Feed) -> Result<()>;
}
