//! Hub subscription persistence.

use chrono::{DateTime, Duration, Utc};

use super::{format_datetime, parse_datetime, DbPool};
use crate::Result;

/// Margin before lease expiry at which a subscription is renewed.
pub const RENEWAL_MARGIN_MINUTES: i64 = 30;

/// Lease assumed when the hub verified without granting one.
pub const DEFAULT_LEASE_SECONDS: i64 = 24 * 60 * 60;

/// WebSub subscription of one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub feed_id: i64,
    /// Hub endpoint.
    pub link: String,
    /// Lease granted by the hub, in seconds.
    pub lease_duration: i64,
    /// Time of the last successful verification.
    pub verification_time: Option<DateTime<Utc>>,
    /// True until the hub verifies the subscription.
    pub subscription_failure: bool,
}

impl Subscription {
    /// A pending subscription, not yet verified.
    pub fn pending(feed_id: i64, link: impl Into<String>) -> Self {
        Self {
            feed_id,
            link: link.into(),
            lease_duration: 0,
            verification_time: None,
            subscription_failure: true,
        }
    }

    /// Verified and not failed.
    pub fn is_active(&self) -> bool {
        !self.subscription_failure && self.verification_time.is_some()
    }

    /// Granted lease, or [`DEFAULT_LEASE_SECONDS`] when none was granted.
    pub fn effective_lease(&self) -> Duration {
        if self.lease_duration > 0 {
            Duration::seconds(self.lease_duration)
        } else {
            Duration::seconds(DEFAULT_LEASE_SECONDS)
        }
    }

    /// Whether the lease should be renewed at `now`.
    ///
    /// Failed or never verified subscriptions always qualify. Otherwise the
    /// renewal margin is at most half the lease.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        match self.verification_time {
            Some(verified) if !self.subscription_failure => {
                let lease = self.effective_lease();
                let margin = Duration::minutes(RENEWAL_MARGIN_MINUTES).min(lease / 2);
                now > verified + lease - margin
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    feed_id: i64,
    link: String,
    lease_duration: i64,
    verification_time: Option<String>,
    subscription_failure: bool,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            feed_id: row.feed_id,
            link: row.link,
            lease_duration: row.lease_duration,
            verification_time: row.verification_time.as_deref().and_then(parse_datetime),
            subscription_failure: row.subscription_failure,
        }
    }
}

/// Repository for hub subscriptions.
pub struct SubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SubscriptionRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn all(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT feed_id, link, lease_duration, verification_time, subscription_failure \
             FROM hubbub_subscriptions ORDER BY feed_id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    pub async fn get(&self, feed_id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT feed_id, link, lease_duration, verification_time, subscription_failure \
             FROM hubbub_subscriptions WHERE feed_id = ?",
        )
        .bind(feed_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Subscription::from))
    }

    /// Insert or replace the subscription of `sub.feed_id`.
    pub async fn update(&self, sub: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hubbub_subscriptions
                (feed_id, link, lease_duration, verification_time, subscription_failure)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(feed_id) DO UPDATE SET
                link = excluded.link,
                lease_duration = excluded.lease_duration,
                verification_time = excluded.verification_time,
                subscription_failure = excluded.subscription_failure
            "#,
        )
        .bind(sub.feed_id)
        .bind(&sub.link)
        .bind(sub.lease_duration)
        .bind(sub.verification_time.as_ref().map(format_datetime))
        .bind(sub.subscription_failure)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM hubbub_subscriptions WHERE feed_id = ?")
            .bind(feed_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
