//! Shared outbound HTTP clients.

use std::time::Duration;

use reqwest::Client;

use crate::config::TimeoutConfig;
use crate::error::{FeedcoreError, Result};

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("feedcore/", env!("CARGO_PKG_VERSION"));

/// Timeout used for HTTPS capability probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 10;

/// Build the client used for feed fetches, discovery, hub requests and
/// enrichment downloads.
pub fn build_client(config: &TimeoutConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect())
        .read_timeout(config.read_write())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FeedcoreError::Http(format!("failed to create HTTP client: {e}")))
}

/// Build the short-lived client used by HTTPS probes.
pub fn build_probe_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(PROBE_TIMEOUT)
        .timeout(PROBE_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FeedcoreError::Http(format!("failed to create probe client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_clients() {
        assert!(build_client(&TimeoutConfig::default()).is_ok());
        assert!(build_probe_client().is_ok());
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("feedcore/"));
    }
}
