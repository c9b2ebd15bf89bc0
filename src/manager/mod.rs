//! The feed manager facade and its background machinery.
//!
//! `FeedManager` owns the scheduler, the enrichment pipeline, the hub
//! manager and the scoring loop. Everything it spawns shares one
//! [`Lifecycle`] per `start`/`stop` cycle.

pub mod lifecycle;
pub mod notifier;
pub mod pipeline;
pub(crate) mod reactor;
pub(crate) mod updater;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::content::{
    AbsolutizeUrls, ArticleProcessor, DescriptionThumbnailer, ExtractThumbnailer, Extractor,
    HtmlExtractor, HttpsProbe, ProxyHttp, RelativeUrl, Thumbnailer,
};
use crate::db::{Database, FeedRepository};
use crate::error::{FeedcoreError, Result};
use crate::feed::{normalize_link, DiscoveredFeed, Discoverer, Feed, FeedUpdate, NewFeed};
use crate::http::{build_client, build_probe_client};
use crate::hubbub::{callback_router, CallbackState, HubManager, PushSink};
use crate::monitor::{
    run_stale_sweeper, MemoryIndex, Monitor, SearchIndex, SearchMonitor, ThumbnailMonitor,
    UnreadMonitor,
};
use crate::popularity::{providers_from_config, PopularityScorer, ScoreProvider};

pub use lifecycle::Lifecycle;
pub use notifier::UpdateNotifier;
pub use pipeline::Pipeline;

use reactor::{retire_feed, Reactor, ReactorHandle, RetireContext};
use updater::LoopContext;

/// Builder for [`FeedManager`]. Optional collaborators replace the ones
/// selected by configuration.
pub struct FeedManagerBuilder {
    config: Config,
    db: Database,
    clock: Option<Arc<dyn Clock>>,
    search_index: Option<Arc<dyn SearchIndex>>,
    extractor: Option<Arc<dyn Extractor>>,
    thumbnailer: Option<Arc<dyn Thumbnailer>>,
    score_providers: Option<Vec<Arc<dyn ScoreProvider>>>,
}

impl FeedManagerBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }

    pub fn with_score_providers(mut self, providers: Vec<Arc<dyn ScoreProvider>>) -> Self {
        self.score_providers = Some(providers);
        self
    }

    /// Validate the configuration and wire every component.
    pub fn build(self) -> Result<FeedManager> {
        self.config.validate()?;
        let config = self.config;
        let db = self.db;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let client = build_client(&config.timeout)?;

        let mut processors: Vec<Arc<dyn ArticleProcessor>> = Vec::new();
        for name in &config.content.article_processors {
            let processor: Arc<dyn ArticleProcessor> = match name.as_str() {
                "absolutize-urls" => Arc::new(AbsolutizeUrls),
                "relative-url" => Arc::new(RelativeUrl::new(Arc::new(HttpsProbe::new(
                    db.clone(),
                    build_probe_client()?,
                )))),
                "proxy-http" => Arc::new(ProxyHttp::new(
                    config.feed_parser.proxy_http_url_template.clone(),
                )),
                other => {
                    return Err(FeedcoreError::Config(format!(
                        "unknown article processor: {other}"
                    )))
                }
            };
            processors.push(processor);
        }

        let extractor: Option<Arc<dyn Extractor>> = match self.extractor {
            Some(extractor) => Some(extractor),
            None if config.content.extractor == "html" => {
                Some(Arc::new(HtmlExtractor::new(client.clone())))
            }
            None => None,
        };

        // Fixed call order: unread, thumbnailer, index.
        let mut monitors: Vec<Arc<dyn Monitor>> = Vec::new();
        if config.feed_manager.has_monitor("unread") {
            monitors.push(Arc::new(UnreadMonitor::new(db.clone(), clock.clone())));
        }
        if config.feed_manager.has_monitor("thumbnailer") {
            let thumbnailer: Arc<dyn Thumbnailer> = match (self.thumbnailer, &extractor) {
                (Some(thumbnailer), _) => thumbnailer,
                (None, Some(extractor)) if config.content.thumbnailer == "extract" => Arc::new(
                    ExtractThumbnailer::new(db.clone(), client.clone(), extractor.clone()),
                ),
                (None, _) => Arc::new(DescriptionThumbnailer::new(db.clone(), client.clone())),
            };
            monitors.push(Arc::new(ThumbnailMonitor::new(
                thumbnailer,
                config.feed_manager.thumbnail_workers,
            )));
        }
        if config.feed_manager.has_monitor("index") {
            let index: Option<Arc<dyn SearchIndex>> = match self.search_index {
                Some(index) => Some(index),
                None if config.content.search_provider == "memory" => {
                    Some(Arc::new(MemoryIndex::new()))
                }
                None => None,
            };
            match index {
                Some(index) => monitors.push(Arc::new(SearchMonitor::new(index, db.clone()))),
                None => warn!("Index monitor configured without a search provider; skipping it"),
            }
        }

        let pipeline = Arc::new(Pipeline::new(
            db.clone(),
            client.clone(),
            processors,
            monitors,
            Arc::new(UpdateNotifier::new()),
        ));
        info!("Feed pipeline monitors: {:?}", pipeline.monitor_names());

        let hub = Arc::new(HubManager::new(
            &config,
            db.clone(),
            client.clone(),
            clock.clone(),
        ));

        let providers = self
            .score_providers
            .unwrap_or_else(|| providers_from_config(&config.popularity, &client));
        let scorer = (!providers.is_empty()).then(|| {
            Arc::new(PopularityScorer::new(
                db.clone(),
                providers,
                clock.clone(),
                config.popularity.delay(),
                config.popularity.interval(),
            ))
        });

        let loop_ctx = Arc::new(LoopContext {
            db: db.clone(),
            pipeline: pipeline.clone(),
            clock: clock.clone(),
            global_interval: config.feed_manager.update_interval(),
            min_interval: config.feed_manager.min_interval(),
        });
        let retire_ctx = Arc::new(RetireContext {
            db: db.clone(),
            pipeline: pipeline.clone(),
            hub: hub.clone(),
        });

        Ok(FeedManager {
            inner: Arc::new(ManagerInner {
                db,
                clock,
                discoverer: Discoverer::new(client),
                pipeline,
                hub,
                scorer,
                loop_ctx,
                retire_ctx,
                running: Mutex::new(None),
            }),
        })
    }
}

struct Running {
    lifecycle: Lifecycle,
    reactor: ReactorHandle,
}

struct ManagerInner {
    db: Database,
    clock: Arc<dyn Clock>,
    discoverer: Discoverer,
    pipeline: Arc<Pipeline>,
    hub: Arc<HubManager>,
    scorer: Option<Arc<PopularityScorer>>,
    loop_ctx: Arc<LoopContext>,
    retire_ctx: Arc<RetireContext>,
    running: Mutex<Option<Running>>,
}

impl ManagerInner {
    fn running(&self) -> Option<(Lifecycle, ReactorHandle)> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| (r.lifecycle.clone(), r.reactor.clone()))
    }
}

#[async_trait]
impl PushSink for ManagerInner {
    async fn push(&self, feed_id: i64, body: Vec<u8>) -> Result<()> {
        let feed = FeedRepository::new(self.db.pool())
            .get(feed_id)
            .await?
            .ok_or_else(|| FeedcoreError::NotFound(format!("feed {feed_id}")))?;
        let Some((lifecycle, _)) = self.running() else {
            return Err(FeedcoreError::Validation(
                "feed manager is not running".to_string(),
            ));
        };
        debug!("Ingesting pushed content for feed {}", feed_id);
        self.pipeline.ingest(feed, &body, &lifecycle).await?;
        Ok(())
    }
}

/// Entry point of the ingestion core.
#[derive(Clone)]
pub struct FeedManager {
    inner: Arc<ManagerInner>,
}

impl FeedManager {
    pub fn builder(config: Config, db: Database) -> FeedManagerBuilder {
        FeedManagerBuilder {
            config,
            db,
            clock: None,
            search_index: None,
            extractor: None,
            thumbnailer: None,
            score_providers: None,
        }
    }

    /// Build a manager with every collaborator chosen by configuration.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        Self::builder(config, db).build()
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn hub(&self) -> &Arc<HubManager> {
        &self.inner.hub
    }

    pub fn is_running(&self) -> bool {
        self.inner.running().is_some()
    }

    /// Start every background task. Calling `start` on a running manager
    /// does nothing.
    pub fn start(&self) {
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            debug!("Feed manager already running");
            return;
        }

        let lifecycle = Lifecycle::new();
        let (reactor, handle) = Reactor::new(
            self.inner.loop_ctx.clone(),
            self.inner.retire_ctx.clone(),
            lifecycle.clone(),
        );
        lifecycle.spawn(reactor.run());

        let db = self.inner.db.clone();
        let bootstrap = handle.clone();
        lifecycle.spawn(async move {
            match FeedRepository::new(db.pool()).all_unsubscribed().await {
                Ok(feeds) => {
                    info!("Scheduling {} feed(s)", feeds.len());
                    for feed in feeds {
                        bootstrap.add(feed);
                    }
                }
                Err(e) => warn!("Failed to load feeds for scheduling: {}", e),
            }
        });

        if let Some(scorer) = &self.inner.scorer {
            scorer.start(&lifecycle);
        }
        lifecycle.spawn(run_stale_sweeper(
            self.inner.db.clone(),
            self.inner.clock.clone(),
            lifecycle.token().clone(),
        ));
        if self.inner.hub.is_configured() {
            let (fallback, returned) = mpsc::unbounded_channel();
            self.inner.hub.start(&lifecycle, fallback);
            lifecycle.spawn(poll_returned_feeds(
                returned,
                handle.clone(),
                lifecycle.token().clone(),
            ));
        }

        info!("Feed manager started");
        *running = Some(Running {
            lifecycle,
            reactor: handle,
        });
    }

    /// Cancel every background task and wait for it to finish.
    pub async fn stop(&self) {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            running.lifecycle.shutdown().await;
            info!("Feed manager stopped");
        }
    }

    /// Stateless feed discovery starting at `link`.
    pub async fn discover_feeds(&self, link: &str) -> Result<Vec<DiscoveredFeed>> {
        self.inner.discoverer.discover(link).await
    }

    /// Return the feed at `link`, discovering and storing it first if needed,
    /// and schedule it for updates.
    pub async fn add_feed_by_link(&self, link: &str) -> Result<Feed> {
        let link = normalize_link(link)?;
        let repo = FeedRepository::new(self.inner.db.pool());

        let feed = match repo.find_by_link(&link).await? {
            Some(feed) => feed,
            None => {
                let candidate = self
                    .discover_feeds(&link)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| FeedcoreError::NoFeed(link.clone()))?;
                match repo.find_by_link(&candidate.link).await? {
                    Some(feed) => feed,
                    None => {
                        let feed = repo
                            .create(&NewFeed::from_parsed(&candidate.link, &candidate.parsed))
                            .await?;
                        info!("Added feed {} ({})", feed.id, feed.link);
                        feed
                    }
                }
            }
        };

        if let Some((_, reactor)) = self.inner.running() {
            reactor.add(feed.clone());
        }
        if self.inner.hub.is_configured() && feed.hub_link.is_some() {
            // Failures are recorded in the feed's subscribe_error.
            if let Err(e) = self.inner.hub.subscribe(&feed).await {
                debug!("Subscription of feed {} failed: {}", feed.id, e);
            }
        }
        Ok(feed)
    }

    /// Unschedule the feed at `link` and delete it once no user is attached.
    /// An unknown link is not an error.
    pub async fn remove_feed_by_link(&self, link: &str) -> Result<()> {
        let link = normalize_link(link)?;
        let Some(feed) = FeedRepository::new(self.inner.db.pool())
            .find_by_link(&link)
            .await?
        else {
            debug!("No feed to remove at {}", link);
            return Ok(());
        };
        self.remove_feed(feed).await
    }

    async fn remove_feed(&self, feed: Feed) -> Result<()> {
        match self.inner.running() {
            Some((_, reactor)) if reactor.remove(feed.clone()) => Ok(()),
            _ => retire_feed(&self.inner.retire_ctx, &feed).await.map(|_| ()),
        }
    }

    /// Add the feed at `link` and attach it to `login`.
    pub async fn attach_feed(&self, login: &str, link: &str) -> Result<Feed> {
        let feed = self.add_feed_by_link(link).await?;
        FeedRepository::new(self.inner.db.pool())
            .attach_to(feed.id, login)
            .await?;
        Ok(feed)
    }

    /// Detach `feed` from `login` and remove it when no user remains.
    pub async fn detach_feed(&self, login: &str, feed: &Feed) -> Result<()> {
        let repo = FeedRepository::new(self.inner.db.pool());
        repo.detach_from(feed.id, login).await?;
        if repo.users(feed.id).await?.is_empty() {
            self.remove_feed(feed.clone()).await?;
        }
        Ok(())
    }

    /// Register `tx` to receive every successful feed update.
    pub async fn add_update_receiver(&self, tx: mpsc::Sender<FeedUpdate>) {
        self.inner.pipeline.notifier().add(tx).await;
    }

    pub async fn remove_update_receiver(&self, tx: &mpsc::Sender<FeedUpdate>) {
        self.inner.pipeline.notifier().remove(tx).await;
    }

    /// Hub callback routes, to be nested under the callback URL path.
    pub fn callback_router(&self) -> Router {
        callback_router(CallbackState {
            hub: self.inner.hub.clone(),
            sink: self.inner.clone(),
        })
    }
}

/// Schedule feeds handed back by the hub manager.
async fn poll_returned_feeds(
    mut returned: mpsc::UnboundedReceiver<Feed>,
    reactor: ReactorHandle,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            feed = returned.recv() => match feed {
                Some(feed) => {
                    reactor.add(feed);
                }
                None => break,
            },
        }
    }
}
