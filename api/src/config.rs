use axum::http::{HeaderMap, HeaderName};
use common::Error;
use std::path::PathBuf;
use std::time::Duration;

/// Header set by the access proxy in front of the API (`Cf-Access-Authenticated-User-Email`)
pub const DEFAULT_IDENTITY_HEADER: &str = "cf-access-authenticated-user-email";

/// How requests are mapped to the key under which groups and prices live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeMode {
    /// Every caller shares one constant scope
    Single(String),
    /// Each authenticated caller gets the scope named by the identity header
    Identity,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub scope_mode: ScopeMode,
    pub identity_header: HeaderName,
    /// Directory served for unmatched paths, if any
    pub static_dir: Option<PathBuf>,
    /// Age after which a cached price snapshot is refetched
    pub price_ttl: Duration,
    pub currency: String,
    /// Store-side expiry of cached CoinGecko responses
    pub proxy_ttl: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            scope_mode: ScopeMode::Single("default".to_string()),
            identity_header: HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
            static_dir: None,
            price_ttl: Duration::from_secs(60),
            currency: "USD".to_string(),
            proxy_ttl: Duration::from_secs(60),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let host = std::env::var("API_HOST").unwrap_or(defaults.host);
        let port = std::env::var("API_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let identity_header = match std::env::var("IDENTITY_HEADER") {
            Ok(name) => HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("Invalid IDENTITY_HEADER '{}': {}", name, e))?,
            Err(_) => defaults.identity_header,
        };

        let single_scope = std::env::var("SINGLE_SCOPE").unwrap_or_else(|_| "default".to_string());
        let scope_mode = parse_scope_mode(
            std::env::var("SCOPE_MODE").ok().as_deref(),
            single_scope,
        )?;

        let static_dir = std::env::var("STATIC_DIR").ok().map(PathBuf::from);

        let price_ttl = env_seconds("PRICE_CACHE_TTL_SECS")?.unwrap_or(defaults.price_ttl);
        let proxy_ttl = env_seconds("COINGECKO_CACHE_TTL_SECS")?.unwrap_or(defaults.proxy_ttl);

        let currency = std::env::var("PRICE_CURRENCY").unwrap_or(defaults.currency);

        Ok(Self {
            host,
            port,
            scope_mode,
            identity_header,
            static_dir,
            price_ttl,
            currency,
            proxy_ttl,
        })
    }
}

fn env_seconds(name: &str) -> Result<Option<Duration>, String> {
    match std::env::var(name) {
        Ok(secs) => parse_seconds(name, &secs).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_seconds(name: &str, secs: &str) -> Result<Duration, String> {
    secs.trim()
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| format!("Invalid {} '{}'", name, secs))
}

fn parse_scope_mode(mode: Option<&str>, single_scope: String) -> Result<ScopeMode, String> {
    match mode {
        None | Some("single") => Ok(ScopeMode::Single(single_scope)),
        Some("header") => Ok(ScopeMode::Identity),
        Some(other) => Err(format!(
            "Unknown SCOPE_MODE: {}. Supported modes: single, header",
            other
        )),
    }
}

/// Caller identity as asserted by the access proxy
pub fn caller_identity(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ScopeMode {
    pub fn resolve(&self, headers: &HeaderMap, identity_header: &HeaderName) -> Result<String, Error> {
        match self {
            ScopeMode::Single(scope) => Ok(scope.clone()),
            ScopeMode::Identity => caller_identity(headers, identity_header)
                .ok_or_else(|| Error::Unauthorized("Missing access authentication.".to_string())),
        }
    }
}
