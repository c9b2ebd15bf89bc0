//! The change reactor: sole owner of the set of active feed loops.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lifecycle::Lifecycle;
use super::pipeline::Pipeline;
use super::updater::{self, LoopContext};
use crate::db::{Database, FeedRepository};
use crate::error::Result;
use crate::feed::Feed;
use crate::hubbub::HubManager;

#[derive(Debug)]
enum Command {
    Add(Feed),
    Remove(Feed),
}

/// Sends activation and removal requests to a running reactor.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ReactorHandle {
    /// Activate `feed`. Returns false when the reactor has stopped.
    pub fn add(&self, feed: Feed) -> bool {
        self.tx.send(Command::Add(feed)).is_ok()
    }

    /// Deactivate `feed` and retire it once its loop has exited.
    pub fn remove(&self, feed: Feed) -> bool {
        self.tx.send(Command::Remove(feed)).is_ok()
    }
}

/// Collaborators needed to retire a feed.
pub(crate) struct RetireContext {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
    pub hub: Arc<HubManager>,
}

/// Delete `feed` if no user is attached to it.
///
/// Monitors see the deletion first, then the hub subscription is cancelled.
/// Returns false when users remain and nothing was deleted.
pub(crate) async fn retire_feed(ctx: &RetireContext, feed: &Feed) -> Result<bool> {
    let repo = FeedRepository::new(ctx.db.pool());
    let users = repo.users(feed.id).await?;
    if !users.is_empty() {
        debug!("Feed {} still has {} user(s)", feed.id, users.len());
        return Ok(false);
    }

    ctx.pipeline.feed_deleted(feed).await;
    if ctx.hub.is_configured() {
        if let Err(e) = ctx.hub.unsubscribe(feed).await {
            warn!("Failed to unsubscribe feed {}: {}", feed.id, e);
        }
    }
    repo.delete(feed.id).await?;
    info!("Feed {} removed ({})", feed.id, feed.link);
    Ok(true)
}

enum LoopState {
    Active(CancellationToken),
    /// Cancelled, waiting for the loop to report its exit.
    Draining {
        readd: Option<Feed>,
        retire: Option<Feed>,
    },
}

pub(crate) struct Reactor {
    commands: mpsc::UnboundedReceiver<Command>,
    handle: ReactorHandle,
    loop_ctx: Arc<LoopContext>,
    retire_ctx: Arc<RetireContext>,
    lifecycle: Lifecycle,
    loops: HashMap<i64, LoopState>,
    exited_tx: mpsc::UnboundedSender<i64>,
    exited_rx: mpsc::UnboundedReceiver<i64>,
}

impl Reactor {
    pub fn new(
        loop_ctx: Arc<LoopContext>,
        retire_ctx: Arc<RetireContext>,
        lifecycle: Lifecycle,
    ) -> (Self, ReactorHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = mpsc::unbounded_channel();
        let handle = ReactorHandle { tx };
        let reactor = Self {
            commands,
            handle: handle.clone(),
            loop_ctx,
            retire_ctx,
            lifecycle,
            loops: HashMap::new(),
            exited_tx,
            exited_rx,
        };
        (reactor, handle)
    }

    pub async fn run(mut self) {
        info!("Feed reactor started");
        let token = self.lifecycle.token().clone();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(feed_id) = self.exited_rx.recv() => self.on_exit(feed_id),
                command = self.commands.recv() => match command {
                    Some(Command::Add(feed)) => self.on_add(feed),
                    Some(Command::Remove(feed)) => self.on_remove(feed),
                    None => break,
                },
            }
        }

        info!("Feed reactor stopped ({} active loop(s))", self.active_count());
    }

    fn active_count(&self) -> usize {
        self.loops
            .values()
            .filter(|s| matches!(s, LoopState::Active(_)))
            .count()
    }

    fn on_add(&mut self, feed: Feed) {
        match self.loops.remove(&feed.id) {
            Some(active @ LoopState::Active(_)) => {
                debug!("Feed {} is already active", feed.id);
                self.loops.insert(feed.id, active);
            }
            Some(LoopState::Draining { .. }) => {
                debug!("Feed {} is draining; re-adding after exit", feed.id);
                self.loops.insert(
                    feed.id,
                    LoopState::Draining {
                        readd: Some(feed),
                        retire: None,
                    },
                );
            }
            None => self.spawn_loop(feed),
        }
    }

    fn on_remove(&mut self, feed: Feed) {
        match self.loops.remove(&feed.id) {
            Some(state) => {
                if let LoopState::Active(token) = state {
                    token.cancel();
                }
                self.loops.insert(
                    feed.id,
                    LoopState::Draining {
                        readd: None,
                        retire: Some(feed),
                    },
                );
            }
            None => self.spawn_retire(feed),
        }
    }

    fn on_exit(&mut self, feed_id: i64) {
        match self.loops.remove(&feed_id) {
            Some(LoopState::Draining {
                readd: Some(feed), ..
            }) => self.spawn_loop(feed),
            Some(LoopState::Draining {
                retire: Some(feed), ..
            }) => self.spawn_retire(feed),
            _ => debug!("Loop of feed {} exited", feed_id),
        }
    }

    fn spawn_loop(&mut self, feed: Feed) {
        let token = self.lifecycle.token().child_token();
        self.loops.insert(feed.id, LoopState::Active(token.clone()));
        self.lifecycle.spawn(updater::run(
            self.loop_ctx.clone(),
            feed,
            self.lifecycle.clone(),
            token,
            self.exited_tx.clone(),
        ));
    }

    /// Retire `feed` in the background. A feed that still has users is
    /// handed back to the reactor and keeps polling.
    fn spawn_retire(&self, feed: Feed) {
        let ctx = self.retire_ctx.clone();
        let handle = self.handle.clone();
        let token = self.lifecycle.token().clone();
        self.lifecycle.spawn(async move {
            match retire_feed(&ctx, &feed).await {
                Ok(true) => {}
                Ok(false) => {
                    if !token.is_cancelled() {
                        handle.add(feed);
                    }
                }
                Err(e) => error!("Failed to remove feed {}: {}", feed.id, e),
            }
        });
    }
}
