//! Cross-marketplace cosmetic arbitrage engine.
//!
//! Continuously fetches catalogues from two marketplaces, matches them on a
//! shared canonical key, and serves the ranked price differentials over an
//! HTTP/JSON API.

mod api;
mod client;
mod config;
mod credentials;
mod error;
mod fetcher;
mod keycache;
mod matcher;
mod middleware;
mod models;
mod orchestrator;
mod query;
mod scheduler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware as axum_mw;
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::{MarketAClient, MarketBClient};
use crate::config::{ConfigStore, RuntimeParams};
use crate::credentials::CredentialStore;
use crate::keycache::KeyCache;
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use crate::orchestrator::Orchestrator;
use crate::query::QuerySurface;

/// Cross-marketplace cosmetic arbitrage engine.
#[derive(Debug, Parser)]
#[command(name = "crossmarket-arb")]
struct Cli {
    /// Address the HTTP facade binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind_addr: SocketAddr,

    /// URL prefix the API is mounted under.
    #[arg(long, env = "API_BASE_PATH", default_value = "/api")]
    api_base_path: String,

    /// On-disk path for the credential store (§3, §4.1).
    #[arg(long, env = "CREDENTIALS_PATH", default_value = "./data/credentials.json")]
    credentials_path: PathBuf,

    /// On-disk path for the interesting-key cache (§4.5).
    #[arg(long, env = "KEY_CACHE_PATH", default_value = "./data/interesting_keys.json")]
    key_cache_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let api_base_path = cli.api_base_path.clone();

    let key_cache = Arc::new(KeyCache::new(cli.key_cache_path));
    let config = Arc::new(ConfigStore::new(RuntimeParams::default(), key_cache.clone()));
    let credentials = Arc::new(CredentialStore::new(cli.credentials_path));

    let params = config.get();
    let client_a = Arc::new(MarketAClient::new(credentials.clone(), params.a_min_delay()));
    let client_b = Arc::new(MarketBClient::new(credentials.clone(), params.b_min_delay()));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        key_cache.clone(),
        client_a.clone(),
        client_b.clone(),
    ));
    let query = Arc::new(QuerySurface::new(orchestrator.result_set()));

    scheduler::spawn(orchestrator.clone(), config.clone());

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    tokio::spawn(rate_limit_cleanup_loop(rate_limiter.clone()));

    let state = api::AppState {
        config,
        credentials,
        orchestrator,
        query,
        client_a,
        client_b,
    };

    let app = axum::Router::new()
        .nest(&api_base_path, api::router(state))
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(request_logging))
        .layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let listener = TcpListener::bind(cli.bind_addr).await?;
    info!("listening on {}", cli.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

/// Evicts stale per-IP rate-limit entries so the map doesn't grow with every
/// distinct client that has ever connected.
async fn rate_limit_cleanup_loop(limiter: RateLimitLayer) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crossmarket_arb=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
