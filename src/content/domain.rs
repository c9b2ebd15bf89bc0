//! HTTPS capability probe with a persisted per-host cache.

use reqwest::Client;
use tracing::{debug, warn};

use crate::db::{Database, Domain, DomainRepository};
use crate::error::FeedcoreError;

/// Answers "does this host serve HTTPS?", probing at most once per host.
#[derive(Clone)]
pub struct HttpsProbe {
    db: Database,
    client: Client,
}

impl HttpsProbe {
    /// `client` should carry the short probe timeout, see
    /// [`crate::http::build_probe_client`].
    pub fn new(db: Database, client: Client) -> Self {
        Self { db, client }
    }

    /// Whether `host` is HTTPS capable.
    ///
    /// On a cache miss this issues `HEAD https://<host>/`; any completed
    /// response counts as capable. The answer is cached until purged.
    pub async fn supports_https(&self, host: &str) -> bool {
        let repo = DomainRepository::new(self.db.pool());
        match repo.get(host).await {
            Ok(domain) => return domain.https,
            Err(FeedcoreError::NoContent) => {}
            Err(e) => {
                warn!("Failed to read HTTPS cache for {}: {}", host, e);
                return false;
            }
        }

        let https = match self.client.head(format!("https://{host}/")).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("HTTPS probe for {} failed: {}", host, e);
                false
            }
        };

        let domain = Domain {
            host: host.to_string(),
            https,
        };
        if let Err(e) = repo.update(&domain).await {
            warn!("Failed to cache HTTPS capability of {}: {}", host, e);
        }
        https
    }
}
