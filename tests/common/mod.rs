//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use feedcore::Config;
use wiremock::MockServer;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration with fast polling and only the unread monitor.
pub fn fast_config(interval_ms: u64) -> Config {
    let mut config = Config::default();
    config.feed_manager.update_interval_ms = interval_ms;
    config.feed_manager.min_interval_ms = interval_ms;
    config.feed_manager.monitors = vec!["unread".to_string()];
    config.content.article_processors.clear();
    config
}

/// Atom document with one entry per `(id, title, href)`.
pub fn atom(entries: &[(&str, &str, &str)]) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Test feed</title>
  <id>urn:test:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
"#,
    );
    for (id, title, href) in entries {
        doc.push_str(&format!(
            r#"  <entry>
    <id>{id}</id>
    <title>{title}</title>
    <link href="{href}"/>
    <updated>2024-01-01T00:00:00Z</updated>
  </entry>
"#
        ));
    }
    doc.push_str("</feed>\n");
    doc
}

/// Number of requests the mock server has received so far.
pub async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

/// Poll `check` until it holds or `DEFAULT_TIMEOUT` elapses.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
