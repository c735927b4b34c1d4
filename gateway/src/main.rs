//! Media gateway entry point.
//!
//! Serves files stored as Telegram channel messages over plain HTTP with
//! byte-range support. Chunk reads go through an MTProto bridge service;
//! finished files can be kept in a local disk cache.

mod background;
mod bridge;
mod cache;
mod config;
mod error;
mod fetcher;
mod handlers;
mod helpers;
mod metrics;
mod remote;
mod resolver;
mod session;
mod state;
mod stream;
#[cfg(test)]
mod testing;

use anyhow::Result;
use bridge::BridgeClient;
use cache::CacheManager;
use clap::Parser;
use config::GatewayConfig;
use fetcher::ChunkFetcher;
use metrics::Metrics;
use remote::ConfiguredStorageLocation;
use resolver::ContentResolver;
use session::SessionPool;
use state::AppState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream::MediaStreamer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file (defaults apply when it is missing)
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<String>,

    /// Port to listen on (overrides the config file and PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting media gateway");

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if config.storage_channel().is_none() {
        warn!("No storage channel configured; media routes will return 500");
    }

    let metrics = Metrics::new();
    let bridge = Arc::new(BridgeClient::new(
        &config.telegram.bridge_url,
        config.telegram.bridge_api_key.clone(),
        Duration::from_secs(config.tuning.bridge_connect_timeout_secs),
        Duration::from_secs(config.tuning.bridge_request_timeout_secs),
    )?);
    info!(bridge_url = %config.telegram.bridge_url, "Using MTProto bridge");

    let sessions = Arc::new(SessionPool::new(bridge.clone(), metrics.clone()));
    let fetcher = Arc::new(ChunkFetcher::new(
        sessions.clone(),
        metrics.clone(),
        config.tuning.transient_backoff(),
    ));
    let resolver = Arc::new(ContentResolver::new(
        bridge,
        Arc::new(ConfiguredStorageLocation::new(config.storage_channel())),
        config.tuning.metadata_cache_entries,
        metrics.clone(),
    ));
    let streamer = Arc::new(MediaStreamer::new(
        fetcher,
        resolver,
        config.tuning.chunk_size,
    ));

    let cache = if config.cache.enabled {
        let cache = CacheManager::init(
            &config.cache.dir,
            config.cache.max_file_bytes,
            streamer.clone(),
            metrics.clone(),
        )
        .await?;
        Some(Arc::new(cache))
    } else {
        info!("Disk cache disabled");
        None
    };

    if let Some(cache) = &cache
        && config.cache.max_total_bytes > 0
    {
        tokio::spawn(background::cache_sweep_loop(
            cache.clone(),
            config.cache.max_total_bytes,
            Duration::from_secs(config.cache.sweep_interval_secs),
        ));
    }

    let app_state = Arc::new(AppState {
        streamer,
        cache: cache.clone(),
        metrics,
        templates: state::load_templates()?,
        bot_username: config.telegram.bot_username.clone(),
        bot_username_file: config.telegram.bot_username_file.clone(),
        public_url: config.server.public_url.clone(),
        started_at: Instant::now(),
    });

    let app = handlers::build_router(app_state);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!(addr = %addr, "Gateway listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("Shutting down");
    if let Some(cache) = &cache {
        cache.shutdown().await;
    }
    sessions.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
