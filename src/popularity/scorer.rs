//! Periodic popularity scoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::provider::ScoreProvider;
use super::scoring;
use crate::clock::Clock;
use crate::db::{ArticleRepository, Database, FeedRepository, Scores, ScoresRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::Article;
use crate::manager::Lifecycle;

/// Only articles younger than this are scored.
pub const SCORING_WINDOW_DAYS: i64 = 5;

/// Scores recent articles against every configured provider.
///
/// A producer walks all feeds every `interval` and queues recent articles;
/// a single consumer scores them one at a time, `delay` apart.
pub struct PopularityScorer {
    db: Database,
    providers: Vec<Arc<dyn ScoreProvider>>,
    clock: Arc<dyn Clock>,
    delay: Duration,
    interval: Duration,
}

impl PopularityScorer {
    pub fn new(
        db: Database,
        providers: Vec<Arc<dyn ScoreProvider>>,
        clock: Arc<dyn Clock>,
        delay: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            providers,
            clock,
            delay,
            interval,
        }
    }

    /// Spawn the producer and the scorer on `lifecycle`.
    pub fn start(self: &Arc<Self>, lifecycle: &Lifecycle) {
        let (tx, rx) = mpsc::channel(1);
        lifecycle.spawn(self.clone().produce(tx, lifecycle.token().clone()));
        lifecycle.spawn(self.clone().consume(rx, lifecycle.token().clone()));
    }

    async fn produce(self: Arc<Self>, tx: mpsc::Sender<Article>, token: CancellationToken) {
        info!(
            "Popularity scoring started ({} provider(s), every {}s)",
            self.providers.len(),
            self.interval.as_secs()
        );
        let mut timer = interval(self.interval.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'outer: loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = timer.tick() => {}
            }

            let articles = match self.recent_articles().await {
                Ok(articles) => articles,
                Err(e) => {
                    error!("Failed to collect articles for scoring: {}", e);
                    continue;
                }
            };
            debug!("Queueing {} article(s) for scoring", articles.len());

            for article in articles {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break 'outer,
                    sent = tx.send(article) => {
                        if sent.is_err() {
                            break 'outer;
                        }
                    }
                }
            }
        }
        debug!("Popularity producer stopped");
    }

    async fn consume(self: Arc<Self>, mut rx: mpsc::Receiver<Article>, token: CancellationToken) {
        loop {
            let article = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(article) => article,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep(self.delay) => {}
            }

            if let Err(e) = self.score_article(&article).await {
                warn!("Failed to score article {}: {}", article.id, e);
            }
        }
        info!("Popularity scoring stopped");
    }

    async fn recent_articles(&self) -> Result<Vec<Article>> {
        let since = self.clock.now() - chrono::Duration::days(SCORING_WINDOW_DAYS);
        let feeds = FeedRepository::new(self.db.pool()).all().await?;
        let articles = ArticleRepository::new(self.db.pool());

        let mut recent = Vec::new();
        for feed in feeds {
            recent.extend(articles.latest_for_feed(feed.id, since).await?);
        }
        Ok(recent)
    }

    /// Query every provider for `article` and persist its updated scores.
    ///
    /// Providers that fail are skipped; when all of them fail nothing is
    /// stored.
    pub async fn score_article(&self, article: &Article) -> Result<()> {
        let Some(date) = article.date else {
            return Ok(());
        };

        let mut total = 0;
        let mut answered = 0;
        for provider in &self.providers {
            match provider.score(&article.link, &article.description).await {
                Ok(score) => {
                    total += score;
                    answered += 1;
                }
                Err(e) => debug!("{} score of {} failed: {}", provider.name(), article.link, e),
            }
        }
        if answered == 0 {
            return Ok(());
        }

        let repo = ScoresRepository::new(self.db.pool());
        let mut scores = match repo.get(article.id).await {
            Ok(scores) => scores,
            Err(FeedcoreError::NoContent) => Scores::new(article.id),
            Err(e) => return Err(e),
        };
        scoring::apply(&mut scores, total, date, self.clock.now());
        repo.update(&scores).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::{NewFeed, ParsedArticle};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct Fixed(&'static str, Option<i64>);

    #[async_trait]
    impl ScoreProvider for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn score(&self, _link: &str, _description: &str) -> Result<i64> {
            self.1
                .ok_or_else(|| FeedcoreError::Http("unavailable".to_string()))
        }
    }

    /// Counts occurrences of "like" in the description.
    struct Likes;

    #[async_trait]
    impl ScoreProvider for Likes {
        fn name(&self) -> &'static str {
            "likes"
        }

        async fn score(&self, _link: &str, description: &str) -> Result<i64> {
            Ok(description.matches("like").count() as i64)
        }
    }

    async fn setup() -> (Database, Article, Arc<ManualClock>) {
        let db = Database::open_in_memory().await.unwrap();
        let feeds = FeedRepository::new(db.pool());
        let feed = feeds
            .create(&NewFeed::new("https://example.com/feed"))
            .await
            .unwrap();
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let article = feeds
            .update(
                &feed,
                &[ParsedArticle::new("https://example.com/1").with_date(published)],
            )
            .await
            .unwrap()
            .remove(0);
        let clock = Arc::new(ManualClock::new(published + chrono::Duration::hours(2)));
        (db, article, clock)
    }

    #[tokio::test]
    async fn test_scores_are_summed_and_stored() {
        let (db, article, clock) = setup().await;
        let scorer = PopularityScorer::new(
            db.clone(),
            vec![
                Arc::new(Fixed("a", Some(7))),
                Arc::new(Fixed("b", None)),
                Arc::new(Fixed("c", Some(3))),
            ],
            clock,
            Duration::ZERO,
            Duration::from_secs(60),
        );

        scorer.score_article(&article).await.unwrap();

        let scores = ScoresRepository::new(db.pool()).get(article.id).await.unwrap();
        assert_eq!(scores.score1, 10);
        assert!((scores.score - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_providers_see_the_description() {
        let (db, article, clock) = setup().await;
        let article = Article {
            description: "<p>like like like</p>".to_string(),
            ..article
        };
        let scorer = PopularityScorer::new(
            db.clone(),
            vec![Arc::new(Likes)],
            clock,
            Duration::ZERO,
            Duration::from_secs(60),
        );

        scorer.score_article(&article).await.unwrap();

        let scores = ScoresRepository::new(db.pool()).get(article.id).await.unwrap();
        assert_eq!(scores.score1, 3);
    }

    #[tokio::test]
    async fn test_nothing_stored_when_all_providers_fail() {
        let (db, article, clock) = setup().await;
        let scorer = PopularityScorer::new(
            db.clone(),
            vec![Arc::new(Fixed("a", None))],
            clock,
            Duration::ZERO,
            Duration::from_secs(60),
        );

        scorer.score_article(&article).await.unwrap();
        assert!(matches!(
            ScoresRepository::new(db.pool()).get(article.id).await,
            Err(FeedcoreError::NoContent)
        ));
    }

    #[tokio::test]
    async fn test_loop_scores_recent_articles() {
        let (db, article, clock) = setup().await;
        let scorer = Arc::new(PopularityScorer::new(
            db.clone(),
            vec![Arc::new(Fixed("a", Some(4)))],
            clock,
            Duration::from_millis(1),
            Duration::from_secs(3600),
        ));
        let lifecycle = Lifecycle::new();
        scorer.start(&lifecycle);

        let repo = ScoresRepository::new(db.pool());
        let mut stored = None;
        for _ in 0..100 {
            if let Ok(scores) = repo.get(article.id).await {
                stored = Some(scores);
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        lifecycle.shutdown().await;

        assert_eq!(stored.map(|s| s.score1), Some(4));
    }
}
