use chrono::Utc;
use axum::http::HeaderMap;
use common::{
    models::{Group, PriceEntry, PriceSnapshot},
    Error, Result,
};
use connectors::{
    coingecko::{CoinGeckoProxy, ProxyResponse},
    CoinQuote, PriceProvider,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use store::{GroupStore, KeyValueStore, StoreConfig};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Snapshots younger than this are served without calling upstream
    pub ttl: Duration,
    /// Currency the upstream prices are denominated in
    pub currency: String,
}

/// Read-through cache of upstream prices for a scope's coin set.
///
/// Snapshots carry their own `updatedAt` and are stored without expiry.
/// A snapshot older than `ttl` triggers a refetch but is kept as a fallback
/// in case the upstream call fails. Group writes delete the snapshot (see
/// [`GroupStore::invalidate_prices`]).
pub struct PriceCache {
    groups: GroupStore,
    kv: Arc<dyn KeyValueStore>,
    provider: Arc<dyn PriceProvider>,
    config: CacheConfig,
}

impl PriceCache {
    pub fn new(
        groups: GroupStore,
        kv: Arc<dyn KeyValueStore>,
        provider: Arc<dyn PriceProvider>,
        config: CacheConfig,
    ) -> Self {
        Self {
            groups,
            kv,
            provider,
            config,
        }
    }

    /// Get aggregated prices for every coin referenced by the scope's groups
    pub async fn get_prices(&self, scope: &str) -> Result<PriceSnapshot> {
        let coins = collect_coins(&self.groups.get_groups(scope).await);
        if coins.is_empty() {
            debug!("No coins in groups for {}, skipping upstream", scope);
            return Ok(PriceSnapshot::empty());
        }

        let key = self.groups.config().price_key(scope);
        let cached = self.read_snapshot(&key).await;

        if let Some(snapshot) = &cached {
            if snapshot.is_fresh(Utc::now().timestamp_millis(), self.config.ttl) {
                debug!("Price cache hit for {}", key);
                return Ok(snapshot.clone());
            }
            debug!("Price cache for {} is stale, refetching", key);
        } else {
            debug!("Price cache miss for {}", key);
        }

        let quotes = match self
            .provider
            .fetch_prices(&coins, &self.config.currency)
            .await
        {
            Ok(quotes) => quotes,
            Err(e) => {
                return match cached {
                    Some(stale) => {
                        warn!(
                            "Upstream price fetch failed, serving stale snapshot from {}: {}",
                            stale.updated_at, e
                        );
                        Ok(stale)
                    }
                    None => {
                        error!("Upstream price fetch failed for {} coins: {}", coins.len(), e);
                        Err(match e {
                            Error::UpstreamError(msg) => Error::UpstreamError(msg),
                            other => Error::UpstreamError(other.to_string()),
                        })
                    }
                };
            }
        };

        let snapshot = PriceSnapshot::new(normalize(quotes));
        info!(
            "Fetched {} of {} requested prices for {}",
            snapshot.data.len(),
            coins.len(),
            scope
        );
        self.write_snapshot(&key, &snapshot).await;

        Ok(snapshot)
    }

    async fn read_snapshot(&self, key: &str) -> Option<PriceSnapshot> {
        match self.kv.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Ignoring malformed price snapshot under {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read price cache {}: {}", key, e);
                None
            }
        }
    }

    async fn write_snapshot(&self, key: &str, snapshot: &PriceSnapshot) {
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to encode price snapshot: {}", e);
                return;
            }
        };

        if let Err(e) = self.kv.put(key, &value, None).await {
            warn!("Failed to write price cache {}: {}", key, e);
        }
    }
}

/// Successful proxy response as kept in the key-value store
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl From<CachedResponse> for ProxyResponse {
    fn from(cached: CachedResponse) -> Self {
        ProxyResponse {
            status: cached.status,
            content_type: cached.content_type,
            body: cached.body.into_bytes(),
        }
    }
}

/// CoinGecko pass-through with a short-lived response cache.
///
/// Only 2xx responses are cached, with a store-side expiry of `ttl`, under
/// the proxy namespace keyed by path and query. Errors are relayed uncached.
pub struct ProxyCache {
    kv: Arc<dyn KeyValueStore>,
    proxy: CoinGeckoProxy,
    config: StoreConfig,
    ttl: Duration,
}

impl ProxyCache {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        proxy: CoinGeckoProxy,
        config: StoreConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            kv,
            proxy,
            config,
            ttl,
        }
    }

    pub async fn fetch(&self, path_and_query: &str, headers: &HeaderMap) -> Result<ProxyResponse> {
        let key = self.config.proxy_key(path_and_query);

        if let Some(cached) = self.read_response(&key).await {
            debug!("Proxy cache hit for {}", key);
            return Ok(cached.into());
        }

        let response = self.proxy.forward(path_and_query, headers).await?;
        if response.is_success() && !self.ttl.is_zero() {
            self.write_response(&key, &response).await;
        }

        Ok(response)
    }

    async fn read_response(&self, key: &str) -> Option<CachedResponse> {
        match self.kv.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    warn!("Ignoring malformed proxy response under {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read proxy cache {}: {}", key, e);
                None
            }
        }
    }

    async fn write_response(&self, key: &str, response: &ProxyResponse) {
        let Ok(body) = std::str::from_utf8(&response.body) else {
            debug!("Not caching non-UTF-8 proxy response for {}", key);
            return;
        };
        let cached = CachedResponse {
            status: response.status,
            content_type: response.content_type.clone(),
            body: body.to_string(),
        };

        let value = match serde_json::to_value(&cached) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to encode proxy response: {}", e);
                return;
            }
        };

        if let Err(e) = self.kv.put(key, &value, Some(self.ttl)).await {
            warn!("Failed to write proxy cache {}: {}", key, e);
        }
    }
}

/// Union of all coin codes across `groups`, first occurrence wins
pub fn collect_coins(groups: &[Group]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut coins = Vec::new();
    for code in groups.iter().flat_map(|group| &group.coins) {
        if seen.insert(code.as_str()) {
            coins.push(code.clone());
        }
    }
    coins
}

/// Map upstream quotes to snapshot entries. Coins without a rate are dropped.
pub fn normalize(quotes: Vec<CoinQuote>) -> HashMap<String, PriceEntry> {
    quotes
        .into_iter()
        .filter_map(|quote| {
            let Some(price) = quote.rate else {
                debug!("Upstream returned no rate for {}", quote.code);
                return None;
            };
            let entry = PriceEntry {
                price,
                delta_24h: quote
                    .delta
                    .and_then(|delta| delta.day)
                    .map_or(0.0, |day| day - 1.0),
                market_cap: quote.cap.unwrap_or(0.0),
            };
            Some((quote.code, entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::QuoteDelta;
    use mockall::mock;
    use axum::{
        extract::State,
        http::{HeaderValue, StatusCode},
        routing::get,
        Router,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use store::MemoryStore;

    mock! {
        Provider {}

        #[async_trait]
        impl PriceProvider for Provider {
            async fn fetch_prices(&self, codes: &[String], currency: &str) -> Result<Vec<CoinQuote>>;
        }
    }

    fn quote(code: &str, rate: f64, day: f64, cap: f64) -> CoinQuote {
        CoinQuote {
            code: code.to_string(),
            rate: Some(rate),
            delta: Some(QuoteDelta { day: Some(day) }),
            cap: Some(cap),
        }
    }

    fn quotes_for(codes: &[String]) -> Vec<CoinQuote> {
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| quote(code, 100.0 * (i + 1) as f64, 1.05, 1_000.0))
            .collect()
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    struct Fixture {
        kv: Arc<MemoryStore>,
        groups: GroupStore,
        cache: PriceCache,
    }

    fn fixture(provider: MockProvider, ttl: Duration) -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let groups = GroupStore::new(kv.clone(), StoreConfig::default());
        let cache = PriceCache::new(
            groups.clone(),
            kv.clone(),
            Arc::new(provider),
            CacheConfig {
                ttl,
                currency: "USD".to_string(),
            },
        );
        Fixture { kv, groups, cache }
    }

    #[test]
    fn test_collect_coins_dedups_in_first_seen_order() {
        let groups = vec![
            Group::new("x", &["BTC", "ETH"]),
            Group::new("y", &["ETH"]),
            Group::new("z", &["SOL", "BTC", "eth"]),
        ];

        assert_eq!(collect_coins(&groups), codes(&["BTC", "ETH", "SOL", "eth"]));
        assert!(collect_coins(&[]).is_empty());
    }

    #[test]
    fn test_normalize_converts_day_multiplier_to_fraction() {
        let data = normalize(vec![
            quote("BTC", 65000.0, 1.025, 1.2e12),
            CoinQuote {
                code: "NEW".to_string(),
                rate: Some(0.5),
                delta: None,
                cap: None,
            },
            CoinQuote {
                code: "DEAD".to_string(),
                rate: None,
                delta: Some(QuoteDelta { day: Some(1.0) }),
                cap: Some(1.0),
            },
        ]);

        assert_eq!(data.len(), 2);
        let btc = data["BTC"];
        assert_eq!(btc.price, 65000.0);
        assert!((btc.delta_24h - 0.025).abs() < 1e-9);
        assert_eq!(btc.market_cap, 1.2e12);
        assert_eq!(
            data["NEW"],
            PriceEntry {
                price: 0.5,
                delta_24h: 0.0,
                market_cap: 0.0
            }
        );
        assert!(!data.contains_key("DEAD"));
    }

    #[tokio::test]
    async fn test_no_coins_returns_empty_snapshot_without_upstream_call() {
        let mut provider = MockProvider::new();
        provider.expect_fetch_prices().times(0);
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("default", &[Group::new("empty", &[])])
            .await
            .unwrap();

        let before = Utc::now().timestamp_millis();
        let snapshot = f.cache.get_prices("default").await.unwrap();

        assert!(snapshot.data.is_empty());
        assert!(snapshot.updated_at >= before);
        assert_eq!(f.kv.get("prices-default").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upstream_receives_deduplicated_coins_in_usd() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .withf(|coins, currency| {
                coins.to_vec() == vec!["BTC".to_string(), "ETH".to_string()] && currency == "USD"
            })
            .times(1)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups(
                "default",
                &[Group::new("x", &["BTC", "ETH"]), Group::new("y", &["ETH"])],
            )
            .await
            .unwrap();

        let snapshot = f.cache.get_prices("default").await.unwrap();

        assert_eq!(snapshot.data.len(), 2);
        assert_eq!(snapshot.data["BTC"].price, 100.0);
        assert_eq!(snapshot.data["ETH"].price, 200.0);
    }

    #[tokio::test]
    async fn test_repeated_reads_within_ttl_call_upstream_once() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .times(1)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();

        let first = f.cache.get_prices("default").await.unwrap();
        let second = f.cache.get_prices("default").await.unwrap();
        let third = f.cache.get_prices("default").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn test_snapshot_is_persisted_under_price_namespace() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .times(1)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("alice", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();

        let snapshot = f.cache.get_prices("alice").await.unwrap();

        let stored = f.kv.get("prices-alice").await.unwrap().unwrap();
        let stored: PriceSnapshot = serde_json::from_value(stored).unwrap();
        assert_eq!(stored, snapshot);
    }

    #[tokio::test]
    async fn test_group_write_forces_refetch() {
        let mut provider = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_fetch_prices()
            .withf(|coins, _| coins.to_vec() == vec!["BTC".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|coins, _| Ok(quotes_for(coins)));
        provider
            .expect_fetch_prices()
            .withf(|coins, _| coins.to_vec() == vec!["DOGE".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::from_secs(3600));

        f.groups
            .replace_groups("default", &[Group::new("a", &["BTC"])])
            .await
            .unwrap();
        let before = f.cache.get_prices("default").await.unwrap();
        assert!(before.data.contains_key("BTC"));

        f.groups
            .replace_groups("default", &[Group::new("b", &["DOGE"])])
            .await
            .unwrap();
        let after = f.cache.get_prices("default").await.unwrap();

        assert!(after.data.contains_key("DOGE"));
        assert!(!after.data.contains_key("BTC"));
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_refetched_after_ttl() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .times(2)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::ZERO);
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();

        f.cache.get_prices("default").await.unwrap();
        f.cache.get_prices("default").await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_failure_serves_stale_snapshot() {
        let mut provider = MockProvider::new();
        let mut calls = 0;
        provider.expect_fetch_prices().times(2).returning(move |coins, _| {
            calls += 1;
            if calls == 1 {
                Ok(quotes_for(coins))
            } else {
                Err(Error::UpstreamError("503 Service Unavailable".to_string()))
            }
        });
        let f = fixture(provider, Duration::ZERO);
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC", "ETH"])])
            .await
            .unwrap();

        let fresh = f.cache.get_prices("default").await.unwrap();
        let fallback = f.cache.get_prices("default").await.unwrap();

        assert_eq!(fallback, fresh);
    }

    #[tokio::test]
    async fn test_upstream_failure_without_cache_is_upstream_error() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .times(1)
            .returning(|_, _| Err(Error::InternalError("connection refused".to_string())));
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();

        let err = f.cache.get_prices("default").await.unwrap_err();

        assert!(matches!(err, Error::UpstreamError(ref msg) if msg.contains("connection refused")));
        assert_eq!(f.kv.get("prices-default").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upstream_failure_after_group_write_has_no_fallback() {
        let mut provider = MockProvider::new();
        let mut calls = 0;
        provider.expect_fetch_prices().times(2).returning(move |coins, _| {
            calls += 1;
            if calls == 1 {
                Ok(quotes_for(coins))
            } else {
                Err(Error::UpstreamError("timeout".to_string()))
            }
        });
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();
        f.cache.get_prices("default").await.unwrap();

        f.groups
            .replace_groups("default", &[Group::new("x", &["ETH"])])
            .await
            .unwrap();

        assert!(matches!(
            f.cache.get_prices("default").await,
            Err(Error::UpstreamError(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_cached_snapshot_is_a_miss() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_prices()
            .times(1)
            .returning(|coins, _| Ok(quotes_for(coins)));
        let f = fixture(provider, Duration::from_secs(60));
        f.groups
            .replace_groups("default", &[Group::new("x", &["BTC"])])
            .await
            .unwrap();
        f.kv.put("prices-default", &json!({ "prices": "garbage" }), None)
            .await
            .unwrap();

        let snapshot = f.cache.get_prices("default").await.unwrap();

        assert_eq!(snapshot.data.len(), 1);
    }

    async fn serve(app: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        format!("http://{}", addr)
    }

    // Fake CoinGecko counting how often it is reached
    async fn coingecko(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/api/v3/ping",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        [("content-type", "application/json")],
                        format!(r#"{{"gecko_says":"(V3) To the Moon!","n":{}}}"#, n),
                    )
                }),
            )
            .route(
                "/api/v3/coins/unknown",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, r#"{"error":"coin not found"}"#)
                }),
            )
            .with_state(hits);
        serve(app).await
    }

    fn proxy_cache(kv: Arc<MemoryStore>, base_url: String, ttl: Duration) -> ProxyCache {
        ProxyCache::new(kv, CoinGeckoProxy::new(base_url), StoreConfig::default(), ttl)
    }

    #[tokio::test]
    async fn test_proxy_success_is_cached_under_proxy_namespace() {
        let hits = Arc::new(AtomicUsize::new(0));
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv.clone(), coingecko(hits.clone()).await, Duration::from_secs(60));

        let first = cache.fetch("/api/v3/ping", &HeaderMap::new()).await.unwrap();
        let second = cache.fetch("/api/v3/ping", &HeaderMap::new()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first.status, 200);
        assert_eq!(first.content_type.as_deref(), Some("application/json"));
        let stored = kv.get("coingecko-/api/v3/ping").await.unwrap().unwrap();
        assert_eq!(stored["status"], 200);
        assert_eq!(stored["contentType"], "application/json");
    }

    #[tokio::test]
    async fn test_proxy_cache_keys_on_query_string() {
        let hits = Arc::new(AtomicUsize::new(0));
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv, coingecko(hits.clone()).await, Duration::from_secs(60));

        cache.fetch("/api/v3/ping?a=1", &HeaderMap::new()).await.unwrap();
        cache.fetch("/api/v3/ping?a=2", &HeaderMap::new()).await.unwrap();
        cache.fetch("/api/v3/ping?a=1", &HeaderMap::new()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_proxy_error_status_is_relayed_but_not_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv.clone(), coingecko(hits.clone()).await, Duration::from_secs(60));

        let first = cache.fetch("/api/v3/coins/unknown", &HeaderMap::new()).await.unwrap();
        cache.fetch("/api/v3/coins/unknown", &HeaderMap::new()).await.unwrap();

        assert_eq!(first.status, 404);
        assert_eq!(first.body, br#"{"error":"coin not found"}"#.to_vec());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_proxy_cache_expires_after_ttl() {
        let hits = Arc::new(AtomicUsize::new(0));
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv, coingecko(hits.clone()).await, Duration::from_millis(50));

        cache.fetch("/api/v3/ping", &HeaderMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let refreshed = cache.fetch("/api/v3/ping", &HeaderMap::new()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(String::from_utf8(refreshed.body).unwrap().contains(r#""n":2"#));
    }

    #[tokio::test]
    async fn test_proxy_forwards_api_key_header() {
        let app = Router::new().route(
            "/api/v3/ping",
            get(|headers: HeaderMap| async move {
                match headers.get("x-cg-pro-api-key") {
                    Some(key) if key == "CG-pro" => (StatusCode::OK, "pong"),
                    _ => (StatusCode::UNAUTHORIZED, "missing key"),
                }
            }),
        );
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv, serve(app).await, Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        headers.insert("x-cg-pro-api-key", HeaderValue::from_static("CG-pro"));

        let response = cache.fetch("/api/v3/ping", &headers).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong".to_vec());
    }

    #[tokio::test]
    async fn test_proxy_unreachable_upstream_is_error_and_not_cached() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let kv = Arc::new(MemoryStore::new());
        let cache = proxy_cache(kv.clone(), format!("http://{}", addr), Duration::from_secs(60));

        let err = cache.fetch("/api/v3/ping", &HeaderMap::new()).await.unwrap_err();

        assert!(matches!(err, Error::HttpError(_)));
        assert!(kv.is_empty().await);
    }
}
