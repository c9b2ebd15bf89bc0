//! Update receivers.

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::feed::FeedUpdate;

/// Registered destinations for per-update notifications, notified in
/// registration order.
#[derive(Default)]
pub struct UpdateNotifier {
    receivers: RwLock<Vec<mpsc::Sender<FeedUpdate>>>,
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, tx: mpsc::Sender<FeedUpdate>) {
        self.receivers.write().await.push(tx);
    }

    /// Remove `tx` and every other sender of the same channel.
    pub async fn remove(&self, tx: &mpsc::Sender<FeedUpdate>) {
        self.receivers.write().await.retain(|r| !r.same_channel(tx));
    }

    pub async fn len(&self) -> usize {
        self.receivers.read().await.len()
    }

    /// Deliver `update` to each receiver in turn. Closed receivers are
    /// dropped; delivery stops when `token` is cancelled.
    pub async fn notify(&self, update: &FeedUpdate, token: &CancellationToken) {
        let receivers = self.receivers.read().await.clone();
        let mut closed = Vec::new();

        for tx in &receivers {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                sent = tx.send(update.clone()) => {
                    if sent.is_err() {
                        closed.push(tx.clone());
                    }
                }
            }
        }

        if !closed.is_empty() {
            debug!("Dropping {} closed update receiver(s)", closed.len());
            self.receivers
                .write()
                .await
                .retain(|r| !closed.iter().any(|c| c.same_channel(r)));
        }
    }
}
