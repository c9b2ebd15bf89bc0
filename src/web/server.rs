//! HTTP listener for the hub callback endpoint.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::Config;
use crate::error::{FeedcoreError, Result};
use crate::manager::FeedManager;

/// Serves the hub callback routes under the path of the configured
/// callback URL, plus `/health`.
pub struct CallbackServer {
    addr: SocketAddr,
    router: Router,
}

impl CallbackServer {
    pub fn new(config: &Config, manager: &FeedManager) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| FeedcoreError::Config(format!("invalid server address: {e}")))?;

        let prefix = callback_path(&config.hubbub.callback_url)?;
        let callbacks = manager.callback_router();
        let router = match prefix.as_str() {
            "" => callbacks,
            path => Router::new().nest(path, callbacks),
        };
        let router = router
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http());

        Ok(Self { addr, router })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("Callback server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }

    /// Bind, serve in the background and return the bound address.
    ///
    /// Useful with port 0.
    pub async fn run_with_addr(self, shutdown: CancellationToken) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Callback server listening on http://{}", local_addr);

        let router = self.router;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                tracing::error!("Callback server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Path component of the callback URL without a trailing slash. Empty when
/// hubbub is not configured or the URL has no path.
fn callback_path(callback_url: &str) -> Result<String> {
    if callback_url.is_empty() {
        return Ok(String::new());
    }
    let url = Url::parse(callback_url)?;
    Ok(url.path().trim_end_matches('/').to_string())
}
