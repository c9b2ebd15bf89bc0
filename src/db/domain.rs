//! HTTPS capability cache, keyed by host.

use super::DbPool;
use crate::{FeedcoreError, Result};

/// Cached HTTPS capability of a host.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Domain {
    pub host: String,
    pub https: bool,
}

/// Repository for the HTTPS capability cache.
pub struct DomainRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> DomainRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Cached entry for `host`, or `NoContent`.
    pub async fn get(&self, host: &str) -> Result<Domain> {
        sqlx::query_as::<_, Domain>("SELECT host, https FROM https_domains WHERE host = ?")
            .bind(host.to_lowercase())
            .fetch_optional(self.pool)
            .await?
            .ok_or(FeedcoreError::NoContent)
    }

    pub async fn update(&self, domain: &Domain) -> Result<()> {
        sqlx::query(
            "INSERT INTO https_domains (host, https) VALUES (?, ?) \
             ON CONFLICT(host) DO UPDATE SET https = excluded.https",
        )
        .bind(domain.host.to_lowercase())
        .bind(domain.https)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Drop every cached entry.
    pub async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM https_domains")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
