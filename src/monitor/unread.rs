//! Unread initializer and stale unread sweeper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Monitor;
use crate::clock::Clock;
use crate::db::{ArticleRepository, Database};
use crate::error::Result;
use crate::feed::{Feed, FeedUpdate};

/// Sweeper period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Unread rows older than this are removed by the sweeper.
pub const UNREAD_RETENTION_DAYS: i64 = 30;

/// Marks new articles unread for every user attached to the feed.
pub struct UnreadMonitor {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl UnreadMonitor {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl Monitor for UnreadMonitor {
    fn name(&self) -> &'static str {
        "unread"
    }

    async fn feed_updated(&self, update: &FeedUpdate, _cancel: &CancellationToken) -> Result<()> {
        let ids: Vec<i64> = update.new_articles.iter().map(|a| a.id).collect();
        let inserted = ArticleRepository::new(self.db.pool())
            .insert_unread(update.feed.id, &ids, self.clock.now())
            .await?;
        debug!("Feed {}: {} unread row(s) created", update.feed.id, inserted);
        Ok(())
    }

    async fn feed_deleted(&self, _feed: &Feed) -> Result<()> {
        Ok(())
    }
}

/// Delete unread rows older than the retention window once per
/// `SWEEP_INTERVAL` until `token` is cancelled.
pub async fn run_stale_sweeper(db: Database, clock: Arc<dyn Clock>, token: CancellationToken) {
    info!("Stale unread sweeper started");
    let mut timer = interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = timer.tick() => {
                sweep(&db, clock.as_ref()).await;
            }
        }
    }

    info!("Stale unread sweeper stopped");
}

async fn sweep(db: &Database, clock: &dyn Clock) {
    let before = clock.now() - chrono::Duration::days(UNREAD_RETENTION_DAYS);
    match ArticleRepository::new(db.pool())
        .remove_stale_unread_records(before)
        .await
    {
        Ok(0) => debug!("No stale unread records"),
        Ok(n) => info!("Removed {} stale unread record(s)", n),
        Err(e) => error!("Failed to remove stale unread records: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{FeedRepository, NewUser, QueryOptions, UserRepository};
    use crate::feed::{NewFeed, ParsedArticle};
    use chrono::{TimeZone, Utc};

    async fn setup() -> (Database, Feed) {
        let db = Database::open_in_memory().await.unwrap();
        UserRepository::new(db.pool())
            .create(&NewUser::new("alice"))
            .await
            .unwrap();
        let feeds = FeedRepository::new(db.pool());
        let feed = feeds
            .create(&NewFeed::new("https://example.com/feed"))
            .await
            .unwrap();
        feeds.attach_to(feed.id, "alice").await.unwrap();
        (db, feed)
    }

    #[tokio::test]
    async fn test_new_articles_become_unread() {
        let (db, feed) = setup().await;
        let articles = FeedRepository::new(db.pool())
            .update(
                &feed,
                &[
                    ParsedArticle::new("https://example.com/1"),
                    ParsedArticle::new("https://example.com/2"),
                ],
            )
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let monitor = UnreadMonitor::new(db.clone(), clock);
        let update = FeedUpdate {
            feed,
            new_articles: articles,
        };
        monitor
            .feed_updated(&update, &CancellationToken::new())
            .await
            .unwrap();

        let count = ArticleRepository::new(db.pool())
            .count("alice", &QueryOptions::new().unread_only())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_sweep_removes_old_rows() {
        let (db, feed) = setup().await;
        let articles = FeedRepository::new(db.pool())
            .update(&feed, &[ParsedArticle::new("https://example.com/1")])
            .await
            .unwrap();
        let inserted_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let repo = ArticleRepository::new(db.pool());
        repo.insert_unread(feed.id, &[articles[0].id], inserted_at)
            .await
            .unwrap();

        let clock = ManualClock::new(inserted_at + chrono::Duration::days(10));
        sweep(&db, &clock).await;
        assert_eq!(
            repo.count("alice", &QueryOptions::new().unread_only())
                .await
                .unwrap(),
            1
        );

        clock.advance(chrono::Duration::days(25));
        sweep(&db, &clock).await;
        assert_eq!(
            repo.count("alice", &QueryOptions::new().unread_only())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let db = Database::open_in_memory().await.unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_stale_sweeper(
            db,
            Arc::new(crate::clock::SystemClock),
            token.clone(),
        ));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
