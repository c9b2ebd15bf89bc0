use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedcore::{CallbackServer, Config, Database, FeedManager};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedcore::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedcore::logging::init_console_only(&config.logging.level);
    }

    info!("feedcore - feed aggregator ingestion core");

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> feedcore::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let manager = FeedManager::new(config.clone(), db)?;
    manager.start();

    let shutdown = CancellationToken::new();
    let server = if manager.hub().is_configured() {
        let server = CallbackServer::new(&config, &manager)?;
        info!("Hub callbacks at {}", config.hubbub.callback_url);
        Some(tokio::spawn(server.run(shutdown.clone())))
    } else {
        None
    };

    shutdown_signal().await;
    info!("Shutting down");

    shutdown.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!("Callback server error: {}", e),
            Err(e) => error!("Callback server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    manager.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
