//! WebSub (PubSubHubbub) subscriptions.
//!
//! The [`HubManager`] posts subscription requests to hubs, records the
//! verification handshake received on the callback endpoint and keeps leases
//! renewed from a single background renewer task. Feeds whose verified
//! subscription fails are handed back for polling.

pub mod callback;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::{Database, FeedRepository, Subscription, SubscriptionRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::Feed;
use crate::manager::Lifecycle;

pub use callback::{callback_router, CallbackState, PushSink};

/// Changes reported to the renewer.
#[derive(Debug)]
enum HubCommand {
    Subscribed(Subscription),
    Verified(Subscription),
    Unsubscribed(i64),
}

/// Manages hub subscriptions for feeds that advertise a hub.
pub struct HubManager {
    inner: Arc<HubInner>,
    commands: Mutex<Option<mpsc::UnboundedSender<HubCommand>>>,
}

struct HubInner {
    db: Database,
    client: Client,
    clock: Arc<dyn Clock>,
    callback_url: String,
    from: String,
    renew_interval: Duration,
    fallback: Mutex<Option<mpsc::UnboundedSender<Feed>>>,
}

impl HubManager {
    pub fn new(config: &Config, db: Database, client: Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                db,
                client,
                clock,
                callback_url: config.hubbub.callback_url.trim_end_matches('/').to_string(),
                from: config.hubbub.from.clone(),
                renew_interval: config.feed_manager.update_interval(),
                fallback: Mutex::new(None),
            }),
            commands: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.inner.callback_url.is_empty()
    }

    /// Callback URL registered with the hub for `feed_id`.
    pub fn callback_for(&self, feed_id: i64) -> String {
        self.inner.callback_for(feed_id)
    }

    /// Start the renewer. It resubscribes every persisted subscription, then
    /// renews leases on each tick until the lifecycle is cancelled.
    ///
    /// A feed whose verified subscription fails (renewal rejected or
    /// verification denied) is sent to `fallback` so it is polled again.
    pub fn start(&self, lifecycle: &Lifecycle, fallback: mpsc::UnboundedSender<Feed>) {
        *self
            .inner
            .fallback
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(fallback);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        lifecycle.spawn(run_renewer(
            self.inner.clone(),
            rx,
            lifecycle.token().clone(),
        ));
    }

    /// Request a subscription for `feed`.
    ///
    /// Feeds without a hub link are left alone. The pending row is persisted
    /// before the hub is contacted; the hub must answer `202 Accepted`.
    /// Failures are recorded in the feed's `subscribe_error` and the request
    /// is retried by the renewer.
    pub async fn subscribe(&self, feed: &Feed) -> Result<()> {
        if !self.is_configured() {
            return Err(FeedcoreError::NotConfigured("hubbub".to_string()));
        }
        let Some(hub) = feed.hub_link.as_deref().filter(|h| !h.is_empty()) else {
            return Ok(());
        };

        let subscription = Subscription::pending(feed.id, hub);
        SubscriptionRepository::new(self.inner.db.pool())
            .update(&subscription)
            .await?;

        match self.inner.request(hub, feed, "subscribe").await {
            Ok(()) => {
                info!("Requested hub subscription for feed {} at {}", feed.id, hub);
                self.inner.set_subscribe_error(feed.id, "").await;
                self.send(HubCommand::Subscribed(subscription));
                Ok(())
            }
            Err(e) => {
                warn!("Hub subscription for feed {} failed: {}", feed.id, e);
                self.inner.set_subscribe_error(feed.id, &e.to_string()).await;
                self.send(HubCommand::Subscribed(subscription));
                Err(e)
            }
        }
    }

    /// Cancel the subscription of `feed`, if any.
    pub async fn unsubscribe(&self, feed: &Feed) -> Result<()> {
        if !self.is_configured() {
            return Err(FeedcoreError::NotConfigured("hubbub".to_string()));
        }
        let repo = SubscriptionRepository::new(self.inner.db.pool());
        let Some(subscription) = repo.get(feed.id).await? else {
            return Ok(());
        };

        let result = self
            .inner
            .request(&subscription.link, feed, "unsubscribe")
            .await;
        repo.delete(feed.id).await?;
        self.send(HubCommand::Unsubscribed(feed.id));

        if let Err(e) = &result {
            warn!("Hub unsubscription for feed {} failed: {}", feed.id, e);
        }
        result
    }

    /// Subscription of `feed_id` if it is verified and not failed.
    pub async fn active_subscription(&self, feed_id: i64) -> Result<Option<Subscription>> {
        Ok(SubscriptionRepository::new(self.inner.db.pool())
            .get(feed_id)
            .await?
            .filter(Subscription::is_active))
    }

    /// Record a successful `subscribe` verification.
    ///
    /// Returns false when no subscription exists for `feed_id`.
    pub async fn confirm_subscription(&self, feed_id: i64, lease_seconds: i64) -> Result<bool> {
        let repo = SubscriptionRepository::new(self.inner.db.pool());
        let Some(mut subscription) = repo.get(feed_id).await? else {
            return Ok(false);
        };

        subscription.subscription_failure = false;
        subscription.verification_time = Some(self.inner.clock.now());
        subscription.lease_duration = lease_seconds;
        repo.update(&subscription).await?;
        self.inner.set_subscribe_error(feed_id, "").await;

        info!(
            "Hub verified subscription for feed {} (lease {}s)",
            feed_id, lease_seconds
        );
        self.send(HubCommand::Verified(subscription));
        Ok(true)
    }

    /// Record a hub's refusal of a subscription.
    ///
    /// Returns false when no subscription exists for `feed_id`.
    pub async fn deny_subscription(&self, feed_id: i64, reason: &str) -> Result<bool> {
        let repo = SubscriptionRepository::new(self.inner.db.pool());
        let Some(mut subscription) = repo.get(feed_id).await? else {
            return Ok(false);
        };

        let was_active = subscription.is_active();
        subscription.subscription_failure = true;
        repo.update(&subscription).await?;
        let reason = if reason.is_empty() {
            "subscription denied by hub"
        } else {
            reason
        };
        warn!("Hub denied subscription for feed {}: {}", feed_id, reason);
        self.inner.set_subscribe_error(feed_id, reason).await;
        if was_active {
            if let Some(feed) = FeedRepository::new(self.inner.db.pool()).get(feed_id).await? {
                self.inner.fall_back(feed);
            }
        }
        self.send(HubCommand::Verified(subscription));
        Ok(true)
    }

    fn send(&self, command: HubCommand) {
        if let Some(tx) = self
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(command);
        }
    }
}

impl HubInner {
    fn callback_for(&self, feed_id: i64) -> String {
        format!("{}/{}", self.callback_url, feed_id)
    }

    /// Hand `feed` back to the scheduler.
    fn fall_back(&self, feed: Feed) {
        info!("Feed {} lost its hub subscription; polling it", feed.id);
        if let Some(tx) = self
            .fallback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(feed);
        }
    }

    /// POST a subscription request for `feed` to `hub`.
    async fn request(&self, hub: &str, feed: &Feed, mode: &str) -> Result<()> {
        let callback = self.callback_for(feed.id);
        let form = [
            ("hub.mode", mode),
            ("hub.callback", callback.as_str()),
            ("hub.topic", feed.link.as_str()),
        ];

        let mut request = self.client.post(hub).form(&form);
        if !self.from.is_empty() {
            request = request.header(reqwest::header::FROM, &self.from);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedcoreError::Hub(e.to_string()))?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(FeedcoreError::Hub(format!(
                "HTTP Status: {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    async fn set_subscribe_error(&self, feed_id: i64, message: &str) {
        let repo = FeedRepository::new(self.db.pool());
        match repo.get(feed_id).await {
            Ok(Some(mut feed)) => {
                if feed.subscribe_error == message {
                    return;
                }
                feed.subscribe_error = message.to_string();
                if let Err(e) = repo.update_metadata(&feed).await {
                    error!("Failed to record subscribe error of feed {}: {}", feed_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to load feed {}: {}", feed_id, e),
        }
    }

    /// Resubscribe `subscription`. Returns false when its feed no longer
    /// exists and the subscription was dropped.
    async fn renew(&self, subscription: &mut Subscription) -> bool {
        let feed = match FeedRepository::new(self.db.pool())
            .get(subscription.feed_id)
            .await
        {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                if let Err(e) = SubscriptionRepository::new(self.db.pool())
                    .delete(subscription.feed_id)
                    .await
                {
                    error!("Failed to drop orphaned subscription: {}", e);
                }
                return false;
            }
            Err(e) => {
                error!("Failed to load feed {}: {}", subscription.feed_id, e);
                return true;
            }
        };

        debug!("Renewing hub subscription for feed {}", feed.id);
        match self.request(&subscription.link, &feed, "subscribe").await {
            Ok(()) => self.set_subscribe_error(feed.id, "").await,
            Err(e) => {
                warn!("Hub renewal for feed {} failed: {}", feed.id, e);
                let was_active = subscription.is_active();
                subscription.subscription_failure = true;
                if let Err(e) = SubscriptionRepository::new(self.db.pool())
                    .update(subscription)
                    .await
                {
                    error!("Failed to persist subscription of feed {}: {}", feed.id, e);
                }
                self.set_subscribe_error(feed.id, &e.to_string()).await;
                if was_active {
                    self.fall_back(feed);
                }
            }
        }
        true
    }
}

async fn run_renewer(
    inner: Arc<HubInner>,
    mut commands: mpsc::UnboundedReceiver<HubCommand>,
    token: CancellationToken,
) {
    let mut subscriptions: HashMap<i64, Subscription> =
        match SubscriptionRepository::new(inner.db.pool()).all().await {
            Ok(all) => all.into_iter().map(|s| (s.feed_id, s)).collect(),
            Err(e) => {
                error!("Failed to load hub subscriptions: {}", e);
                HashMap::new()
            }
        };
    info!(
        "Hub renewer started with {} subscription(s)",
        subscriptions.len()
    );

    let mut dropped = Vec::new();
    for subscription in subscriptions.values_mut() {
        if token.is_cancelled() {
            break;
        }
        if !inner.renew(subscription).await {
            dropped.push(subscription.feed_id);
        }
    }
    for id in dropped.drain(..) {
        subscriptions.remove(&id);
    }

    let mut timer = interval(inner.renew_interval.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(HubCommand::Subscribed(s)) | Some(HubCommand::Verified(s)) => {
                    subscriptions.insert(s.feed_id, s);
                }
                Some(HubCommand::Unsubscribed(feed_id)) => {
                    subscriptions.remove(&feed_id);
                }
                None => break,
            },
            _ = timer.tick() => {
                let now = inner.clock.now();
                for subscription in subscriptions.values_mut() {
                    if token.is_cancelled() {
                        break;
                    }
                    if subscription.needs_renewal(now) && !inner.renew(subscription).await {
                        dropped.push(subscription.feed_id);
                    }
                }
                for id in dropped.drain(..) {
                    subscriptions.remove(&id);
                }
            }
        }
    }

    info!("Hub renewer stopped");
}
