mod config;
mod handler;
mod routes;
mod service;

use config::ApiConfig;
use connectors::{
    coingecko::CoinGeckoProxy,
    livecoinwatch::{LiveCoinWatchConfig, LiveCoinWatchConnector},
};
use handler::AppState;
use service::{CacheConfig, PriceCache, ProxyCache};
use std::net::SocketAddr;
use std::sync::Arc;
use store::{GroupStore, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Coinboard API");

    let config = ApiConfig::from_env()
        .map_err(|e| format!("Failed to load API configuration: {}", e))?;
    let store_config = StoreConfig::from_env()
        .map_err(|e| format!("Failed to load store configuration: {}", e))?;
    let provider_config = LiveCoinWatchConfig::from_env()
        .map_err(|e| format!("Failed to load price provider configuration: {}", e))?;

    let kv = store::open(&store_config)
        .await
        .map_err(|e| format!("Failed to open key-value store: {}", e))?;

    let groups = GroupStore::new(kv.clone(), store_config.clone());
    let proxy = ProxyCache::new(
        kv.clone(),
        CoinGeckoProxy::from_env(),
        store_config,
        config.proxy_ttl,
    );
    let prices = PriceCache::new(
        groups.clone(),
        kv,
        Arc::new(LiveCoinWatchConnector::new(provider_config)),
        CacheConfig {
            ttl: config.price_ttl,
            currency: config.currency.clone(),
        },
    );
    info!(
        "Price cache TTL {:?}, proxy cache TTL {:?}, scope mode {:?}",
        config.price_ttl, config.proxy_ttl, config.scope_mode
    );

    let state = Arc::new(AppState {
        groups,
        prices,
        proxy,
        scope_mode: config.scope_mode.clone(),
        identity_header: config.identity_header.clone(),
    });

    let app = routes::app(state, config.static_dir.as_deref());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
