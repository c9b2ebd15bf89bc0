//! Hub callback endpoint.
//!
//! `GET /:feed_id` answers verification requests, `POST /:feed_id` accepts
//! content pushed for an active subscription.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::HubManager;
use crate::error::Result;
use crate::web::ApiError;

/// Receives feed documents pushed by a hub.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push(&self, feed_id: i64, body: Vec<u8>) -> Result<()>;
}

/// Shared state of the callback router.
#[derive(Clone)]
pub struct CallbackState {
    pub hub: Arc<HubManager>,
    pub sink: Arc<dyn PushSink>,
}

/// Query parameters of a hub verification request.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode", default)]
    pub mode: String,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: String,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<i64>,
    #[serde(rename = "hub.topic", default)]
    pub topic: String,
    #[serde(rename = "hub.reason", default)]
    pub reason: String,
}

/// Router serving `/:feed_id`, to be nested under the callback URL path.
pub fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/:feed_id", get(verify).post(push))
        .with_state(state)
}

async fn verify(
    State(state): State<CallbackState>,
    Path(feed_id): Path<i64>,
    Query(params): Query<VerifyParams>,
) -> std::result::Result<Response, ApiError> {
    debug!(
        "Hub verification for feed {}: mode={} topic={}",
        feed_id, params.mode, params.topic
    );

    match params.mode.as_str() {
        "subscribe" => {
            let lease = params.lease_seconds.unwrap_or(0);
            if !state.hub.confirm_subscription(feed_id, lease).await? {
                return Err(ApiError::not_found(format!("subscription {feed_id}")));
            }
            Ok((StatusCode::OK, params.challenge).into_response())
        }
        "unsubscribe" => Ok((StatusCode::OK, params.challenge).into_response()),
        "denied" => {
            if !state.hub.deny_subscription(feed_id, &params.reason).await? {
                return Err(ApiError::not_found(format!("subscription {feed_id}")));
            }
            Ok(StatusCode::OK.into_response())
        }
        other => Err(ApiError::bad_request(format!("unknown hub.mode: {other}"))),
    }
}

async fn push(
    State(state): State<CallbackState>,
    Path(feed_id): Path<i64>,
    body: Bytes,
) -> std::result::Result<StatusCode, ApiError> {
    if state.hub.active_subscription(feed_id).await?.is_none() {
        return Err(ApiError::not_found(format!("subscription {feed_id}")));
    }

    // Ingest failures are recorded on the feed itself.
    if let Err(e) = state.sink.push(feed_id, body.to_vec()).await {
        warn!("Pushed content for feed {} was not ingested: {}", feed_id, e);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{Config, TimeoutConfig};
    use crate::db::{Database, FeedRepository, Subscription, SubscriptionRepository};
    use crate::feed::NewFeed;
    use crate::http::build_client;
    use axum_test::TestServer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        pushed: Mutex<Vec<(i64, Vec<u8>)>>,
    }

    #[async_trait]
    impl PushSink for Recorder {
        async fn push(&self, feed_id: i64, body: Vec<u8>) -> Result<()> {
            self.pushed.lock().unwrap().push((feed_id, body));
            Ok(())
        }
    }

    async fn setup() -> (TestServer, Database, i64, Arc<Recorder>) {
        let db = Database::open_in_memory().await.unwrap();
        let feed = FeedRepository::new(db.pool())
            .create(&NewFeed::new("https://example.com/feed").with_hub_link("https://hub.invalid/"))
            .await
            .unwrap();
        SubscriptionRepository::new(db.pool())
            .update(&Subscription::pending(feed.id, "https://hub.invalid/"))
            .await
            .unwrap();

        let mut config = Config::default();
        config.hubbub.callback_url = "https://me.example.com/hubbub".to_string();
        let hub = Arc::new(HubManager::new(
            &config,
            db.clone(),
            build_client(&TimeoutConfig::default()).unwrap(),
            Arc::new(SystemClock),
        ));
        let recorder = Arc::new(Recorder::default());
        let router = callback_router(CallbackState {
            hub,
            sink: recorder.clone(),
        });

        (TestServer::new(router).unwrap(), db, feed.id, recorder)
    }

    #[tokio::test]
    async fn test_subscribe_verification_echoes_challenge() {
        let (server, db, feed_id, _) = setup().await;

        let response = server
            .get(&format!("/{feed_id}"))
            .add_query_param("hub.mode", "subscribe")
            .add_query_param("hub.challenge", "c4a11e7")
            .add_query_param("hub.lease_seconds", "3600")
            .add_query_param("hub.topic", "https://example.com/feed")
            .await;

        response.assert_status_ok();
        assert_eq!(response.text(), "c4a11e7");

        let stored = SubscriptionRepository::new(db.pool())
            .get(feed_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.lease_duration, 3600);
    }

    #[tokio::test]
    async fn test_verification_of_unknown_feed_is_not_found() {
        let (server, _, feed_id, _) = setup().await;

        let response = server
            .get(&format!("/{}", feed_id + 1))
            .add_query_param("hub.mode", "subscribe")
            .add_query_param("hub.challenge", "x")
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_unknown_modes() {
        let (server, _, feed_id, _) = setup().await;

        let response = server
            .get(&format!("/{feed_id}"))
            .add_query_param("hub.mode", "unsubscribe")
            .add_query_param("hub.challenge", "bye")
            .await;
        response.assert_status_ok();
        assert_eq!(response.text(), "bye");

        let response = server
            .get(&format!("/{feed_id}"))
            .add_query_param("hub.mode", "bogus")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_requires_active_subscription() {
        let (server, _, feed_id, recorder) = setup().await;

        let response = server.post(&format!("/{feed_id}")).text("<rss/>").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert!(recorder.pushed.lock().unwrap().is_empty());

        server
            .get(&format!("/{feed_id}"))
            .add_query_param("hub.mode", "subscribe")
            .add_query_param("hub.challenge", "ok")
            .add_query_param("hub.lease_seconds", "600")
            .await
            .assert_status_ok();

        let response = server.post(&format!("/{feed_id}")).text("<rss/>").await;
        response.assert_status(StatusCode::NO_CONTENT);
        let pushed = recorder.pushed.lock().unwrap();
        assert_eq!(pushed.as_slice(), &[(feed_id, b"<rss/>".to_vec())]);
    }

    #[tokio::test]
    async fn test_denied_records_reason() {
        let (server, db, feed_id, _) = setup().await;

        server
            .get(&format!("/{feed_id}"))
            .add_query_param("hub.mode", "denied")
            .add_query_param("hub.reason", "no thanks")
            .await
            .assert_status_ok();

        let feed = FeedRepository::new(db.pool())
            .get(feed_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.subscribe_error, "no thanks");
    }
}
