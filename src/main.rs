use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber;

use holdgate::config::{HoldgateConfig, StoreBackend};
use holdgate::gate::{GatePipeline, GateStore, InMemoryStore, RedisStore};
use holdgate::http::{AppState, HttpServer};

#[derive(Parser, Debug)]
#[command(name = "holdgate")]
#[command(about = "Per-identity access gate and abuse-limiting reverse proxy")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Override the protected upstream base URL
    #[arg(short, long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Holdgate Access Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // File config if given, then environment overrides, then CLI overrides
    let mut config = match &args.config {
        Some(path) => HoldgateConfig::from_file(path)?,
        None => HoldgateConfig::default(),
    };
    config.apply_env()?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(upstream) = args.upstream {
        config.server.upstream_url = upstream;
    }
    config.validate()?;

    info!(
        bind_addr = %config.server.bind_addr,
        upstream = %config.server.upstream_url,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    // Select the gate store backend
    let store: Arc<dyn GateStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new(&config.gate)),
        StoreBackend::Redis => {
            let store = RedisStore::new(&config.store, &config.gate)?;
            if store.ping().await {
                info!("Redis connected");
            } else {
                warn!("Redis ping failed; gate will fail closed until the store is reachable");
            }
            Arc::new(store)
        }
    };

    let pipeline = GatePipeline::new(config.gate.clone(), store);
    info!("Gate pipeline initialized");

    let state = Arc::new(AppState {
        pipeline,
        client: reqwest::Client::new(),
        upstream_url: config.server.upstream_url.clone(),
    });

    // Run the server with graceful shutdown on Ctrl+C
    let server = HttpServer::new(config.server.bind_addr, state);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Holdgate Access Gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
