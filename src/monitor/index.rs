//! Search indexing monitor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Monitor;
use crate::content::html;
use crate::db::{ArticleRepository, Database};
use crate::error::Result;
use crate::feed::{Article, Feed, FeedUpdate};

/// What to do with the articles passed to [`SearchIndex::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOperation {
    Add,
    Delete,
}

/// Full-text search backend.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, articles: &[Article], op: IndexOperation) -> Result<()>;
}

/// In-process index matching case-insensitive substrings of the title and
/// visible description text.
#[derive(Default)]
pub struct MemoryIndex {
    documents: RwLock<HashMap<i64, String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of indexed articles containing `term`, ascending.
    pub fn search(&self, term: &str) -> Vec<i64> {
        let term = term.to_lowercase();
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<i64> = documents
            .iter()
            .filter(|(_, text)| text.contains(&term))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index(&self, articles: &[Article], op: IndexOperation) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        for article in articles {
            match op {
                IndexOperation::Add => {
                    let text = format!(
                        "{}\n{}",
                        article.title,
                        html::visible_text(&article.description)
                    );
                    documents.insert(article.id, text.to_lowercase());
                }
                IndexOperation::Delete => {
                    documents.remove(&article.id);
                }
            }
        }
        Ok(())
    }
}

/// Adds new articles to the index and removes a deleted feed's articles.
pub struct SearchMonitor {
    index: Arc<dyn SearchIndex>,
    db: Database,
}

impl SearchMonitor {
    pub fn new(index: Arc<dyn SearchIndex>, db: Database) -> Self {
        Self { index, db }
    }
}

#[async_trait]
impl Monitor for SearchMonitor {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn feed_updated(&self, update: &FeedUpdate, _cancel: &CancellationToken) -> Result<()> {
        if update.new_articles.is_empty() {
            return Ok(());
        }
        debug!(
            "Indexing {} article(s) of feed {}",
            update.new_articles.len(),
            update.feed.id
        );
        self.index
            .index(&update.new_articles, IndexOperation::Add)
            .await
    }

    async fn feed_deleted(&self, feed: &Feed) -> Result<()> {
        let articles = ArticleRepository::new(self.db.pool())
            .for_feed(feed.id)
            .await?;
        debug!("Removing {} article(s) of feed {} from index", articles.len(), feed.id);
        self.index.index(&articles, IndexOperation::Delete).await
    }
}
