//! Fetch, parse and diff pipeline, followed by post-processing of new
//! articles.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use reqwest::{Client, StatusCode};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lifecycle::Lifecycle;
use super::notifier::UpdateNotifier;
use crate::content::ArticleProcessor;
use crate::db::{Database, FeedRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::{parser, Feed, FeedUpdate, ParsedArticle};
use crate::monitor::Monitor;

/// Turns fetched documents into persisted articles and fans updates out
/// to monitors and update receivers.
pub struct Pipeline {
    db: Database,
    client: Client,
    processors: Vec<Arc<dyn ArticleProcessor>>,
    monitors: Vec<Arc<dyn Monitor>>,
    notifier: Arc<UpdateNotifier>,
    /// Per feed, completion of the most recently dispatched post-processing.
    tails: Mutex<HashMap<i64, oneshot::Receiver<()>>>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        client: Client,
        processors: Vec<Arc<dyn ArticleProcessor>>,
        monitors: Vec<Arc<dyn Monitor>>,
        notifier: Arc<UpdateNotifier>,
    ) -> Self {
        Self {
            db,
            client,
            processors,
            monitors,
            notifier,
            tails: Mutex::new(HashMap::new()),
        }
    }

    pub fn notifier(&self) -> &Arc<UpdateNotifier> {
        &self.notifier
    }

    /// Names of the attached monitors, in call order.
    pub fn monitor_names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|m| m.name()).collect()
    }

    /// Fetch `feed` and ingest the response.
    ///
    /// Transport failures and non-200 responses are stored in
    /// `update_error` and returned.
    pub async fn refresh(self: &Arc<Self>, mut feed: Feed, lifecycle: &Lifecycle) -> Result<FeedUpdate> {
        debug!("Fetching feed {}: {}", feed.id, feed.link);

        let response = match self.client.get(&feed.link).send().await {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                self.record_error(&mut feed, &message).await;
                return Err(FeedcoreError::Http(message));
            }
        };
        if response.status() != StatusCode::OK {
            let message = format!("HTTP Status: {}", response.status().as_u16());
            self.record_error(&mut feed, &message).await;
            return Err(FeedcoreError::Http(message));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let message = e.to_string();
                self.record_error(&mut feed, &message).await;
                return Err(FeedcoreError::Http(message));
            }
        };

        self.ingest(feed, &body, lifecycle).await
    }

    /// Parse `body` as the current document of `feed`, run the processors
    /// over its articles, refresh the feed's metadata and merge the
    /// articles.
    ///
    /// Monitors and receivers are then run in a tracked background task
    /// unless the lifecycle is already cancelled. Updates of one feed reach
    /// them in ingest order.
    pub async fn ingest(
        self: &Arc<Self>,
        mut feed: Feed,
        body: &[u8],
        lifecycle: &Lifecycle,
    ) -> Result<FeedUpdate> {
        let mut parsed = match parser::parse(body, &feed.link) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.record_error(&mut feed, &e.to_string()).await;
                return Err(e);
            }
        };

        for article in &mut parsed.articles {
            let processed = AssertUnwindSafe(self.process_article(article))
                .catch_unwind()
                .await;
            if processed.is_err() {
                error!("Processing of article {} panicked", article.link);
            }
        }

        feed.refresh_from(&parsed);
        feed.update_error.clear();
        let new_articles = FeedRepository::new(self.db.pool())
            .update(&feed, &parsed.articles)
            .await?;

        let update = FeedUpdate { feed, new_articles };
        if update.new_articles.is_empty() {
            debug!("Feed {} updated: no new articles", update.feed.id);
        } else {
            info!(
                "Feed {} updated: {} new article(s)",
                update.feed.id,
                update.new_articles.len()
            );
        }
        self.dispatch(update.clone(), lifecycle);
        Ok(update)
    }

    /// Run every monitor's `feed_deleted`, in order. Errors are logged.
    pub async fn feed_deleted(&self, feed: &Feed) {
        self.tails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&feed.id);
        for monitor in &self.monitors {
            if let Err(e) = monitor.feed_deleted(feed).await {
                warn!(
                    "Monitor {} failed on deletion of feed {}: {}",
                    monitor.name(),
                    feed.id,
                    e
                );
            }
        }
    }

    async fn record_error(&self, feed: &mut Feed, message: &str) {
        warn!("Feed {} update failed: {}", feed.id, message);
        feed.update_error = message.to_string();
        if let Err(e) = FeedRepository::new(self.db.pool())
            .update_metadata(feed)
            .await
        {
            error!("Failed to record update error of feed {}: {}", feed.id, e);
        }
    }

    fn dispatch(self: &Arc<Self>, update: FeedUpdate, lifecycle: &Lifecycle) {
        if lifecycle.is_cancelled() {
            debug!("Shutting down; skipping post-processing of feed {}", update.feed.id);
            return;
        }
        let (done, tail) = oneshot::channel();
        let previous = self
            .tails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(update.feed.id, tail);

        let pipeline = self.clone();
        let token = lifecycle.token().clone();
        lifecycle.spawn(async move {
            if let Some(previous) = previous {
                // Resolves on completion or when the previous task is dropped
                let _ = previous.await;
            }
            pipeline.post_process(update, &token).await;
            drop(done);
        });
    }

    /// Monitors only see updates with new articles; receivers see every
    /// update.
    async fn post_process(&self, update: FeedUpdate, token: &CancellationToken) {
        if !update.new_articles.is_empty() {
            for monitor in &self.monitors {
                if let Err(e) = monitor.feed_updated(&update, token).await {
                    warn!(
                        "Monitor {} failed for feed {}: {}",
                        monitor.name(),
                        update.feed.id,
                        e
                    );
                }
            }
        }

        self.notifier.notify(&update, token).await;
    }

    /// Apply every processor in order to the article description.
    async fn process_article(&self, article: &mut ParsedArticle) {
        for processor in &self.processors {
            match processor.process(article).await {
                Ok(Some(description)) => article.description = description,
                Ok(None) => {}
                Err(e) => warn!(
                    "Processor {} failed on article {}: {}",
                    processor.name(),
                    article.link,
                    e
                ),
            }
        }
    }
}
