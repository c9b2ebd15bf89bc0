//! Per-feed update loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::lifecycle::Lifecycle;
use super::pipeline::Pipeline;
use crate::clock::Clock;
use crate::db::{Database, FeedRepository};
use crate::feed::Feed;

/// Everything a feed loop needs.
pub(crate) struct LoopContext {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
    pub clock: Arc<dyn Clock>,
    pub global_interval: Duration,
    pub min_interval: Duration,
}

/// Poll `feed` until `token` is cancelled or the feed disappears.
///
/// The first cycle fetches immediately; later cycles honour the feed's skip
/// hours and days. The feed is reloaded before every cycle so metadata
/// changes made elsewhere are picked up. The feed id is sent on `exited`
/// when the loop ends.
pub(crate) async fn run(
    ctx: Arc<LoopContext>,
    mut feed: Feed,
    lifecycle: Lifecycle,
    token: CancellationToken,
    exited: mpsc::UnboundedSender<i64>,
) {
    let feed_id = feed.id;
    info!("Update loop started for feed {} ({})", feed_id, feed.link);
    let mut first = true;

    while !token.is_cancelled() {
        match FeedRepository::new(ctx.db.pool()).get(feed_id).await {
            Ok(Some(current)) => feed = current,
            Ok(None) => {
                info!("Feed {} no longer exists", feed_id);
                break;
            }
            Err(e) => error!("Failed to reload feed {}: {}", feed_id, e),
        }

        if !first && feed.skips(ctx.clock.now()) {
            debug!("Skipping update of feed {} (skip hours/days)", feed_id);
        } else {
            match ctx.pipeline.refresh(feed.clone(), &lifecycle).await {
                Ok(update) => feed = update.feed,
                Err(e) => debug!("Update of feed {} failed: {}", feed_id, e),
            }
        }
        first = false;

        let wait = feed.update_interval(ctx.global_interval, ctx.min_interval);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep(wait) => {}
        }
    }

    info!("Update loop stopped for feed {}", feed_id);
    let _ = exited.send(feed_id);
}
