//! Thumbnail monitor: a bounded worker pool generating thumbnails for the
//! new articles of each update.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::Monitor;
use crate::content::Thumbnailer;
use crate::error::{FeedcoreError, Result};
use crate::feed::{Article, Feed, FeedUpdate};

/// Runs a [`Thumbnailer`] over new articles with `workers` concurrent
/// workers.
pub struct ThumbnailMonitor {
    thumbnailer: Arc<dyn Thumbnailer>,
    workers: usize,
}

impl ThumbnailMonitor {
    pub fn new(thumbnailer: Arc<dyn Thumbnailer>, workers: usize) -> Self {
        Self {
            thumbnailer,
            workers: workers.max(1),
        }
    }
}

#[async_trait]
impl Monitor for ThumbnailMonitor {
    fn name(&self) -> &'static str {
        "thumbnailer"
    }

    /// Generate thumbnails for every new article.
    ///
    /// Returns the first generation error; the rest are logged. A panic in
    /// one article's generation is logged and does not affect the others.
    async fn feed_updated(&self, update: &FeedUpdate, cancel: &CancellationToken) -> Result<()> {
        if update.new_articles.is_empty() {
            return Ok(());
        }

        let (work_tx, work_rx) = mpsc::channel::<Article>(1);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<FeedcoreError>();

        let mut workers = JoinSet::new();
        for _ in 0..self.workers.min(update.new_articles.len()) {
            workers.spawn(worker(
                self.thumbnailer.clone(),
                work_rx.clone(),
                err_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(work_rx);
        drop(err_tx);

        for article in &update.new_articles {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = work_tx.send(article.clone()) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(work_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Thumbnail worker failed: {}", e);
            }
        }

        let first = err_rx.recv().await;
        while let Some(e) = err_rx.recv().await {
            debug!("Additional thumbnail error for feed {}: {}", update.feed.id, e);
        }
        first.map_or(Ok(()), Err)
    }

    async fn feed_deleted(&self, _feed: &Feed) -> Result<()> {
        Ok(())
    }
}

async fn worker(
    thumbnailer: Arc<dyn Thumbnailer>,
    work: Arc<Mutex<mpsc::Receiver<Article>>>,
    errors: mpsc::UnboundedSender<FeedcoreError>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = async { work.lock().await.recv().await } => next,
        };
        let Some(article) = next else {
            break;
        };

        match AssertUnwindSafe(thumbnailer.generate(&article))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = errors.send(e);
            }
            Err(_) => error!("Thumbnail generation for article {} panicked", article.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        seen: std::sync::Mutex<HashSet<i64>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Thumbnailer for Recording {
        async fn generate(&self, article: &Article) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match article.id {
                13 => Err(FeedcoreError::Image("unlucky".to_string())),
                14 => panic!("boom"),
                id => {
                    self.seen.lock().unwrap().insert(id);
                    Ok(())
                }
            }
        }
    }

    fn update(ids: impl IntoIterator<Item = i64>) -> FeedUpdate {
        FeedUpdate {
            feed: Feed {
                id: 1,
                link: "https://example.com/feed".to_string(),
                title: String::new(),
                description: String::new(),
                site_link: String::new(),
                hub_link: None,
                update_error: String::new(),
                subscribe_error: String::new(),
                ttl: None,
                skip_hours: Vec::new(),
                skip_days: Vec::new(),
            },
            new_articles: ids
                .into_iter()
                .map(|id| Article {
                    id,
                    feed_id: 1,
                    title: String::new(),
                    description: String::new(),
                    link: format!("https://example.com/{id}"),
                    date: None,
                    guid: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_pool_processes_every_article_with_bounded_concurrency() {
        let recording = Arc::new(Recording::default());
        let monitor = ThumbnailMonitor::new(recording.clone(), 3);

        monitor
            .feed_updated(&update(1..=10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recording.seen.lock().unwrap().len(), 10);
        assert!(recording.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(recording.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_error_is_returned_and_panics_are_isolated() {
        let recording = Arc::new(Recording::default());
        let monitor = ThumbnailMonitor::new(recording.clone(), 2);

        let result = monitor
            .feed_updated(&update([12, 13, 14, 15]), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(FeedcoreError::Image(_))));
        let seen = recording.seen.lock().unwrap();
        assert!(seen.contains(&12) && seen.contains(&15));
    }

    #[tokio::test]
    async fn test_cancelled_pool_takes_no_work() {
        let recording = Arc::new(Recording::default());
        let monitor = ThumbnailMonitor::new(recording.clone(), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        monitor.feed_updated(&update(1..=5), &cancel).await.unwrap();
        assert!(recording.seen.lock().unwrap().is_empty());
    }
}
