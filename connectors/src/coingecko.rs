use common::{Error, Result};
use reqwest::header::HeaderMap;
use tracing::{debug, error};

const COINGECKO_API_URL: &str = "https://api.coingecko.com";

/// Caller headers passed on to CoinGecko; everything else (cookies, host,
/// access-proxy identity) stays at the edge
const FORWARDED_HEADERS: [&str; 5] = [
    "accept",
    "accept-language",
    "user-agent",
    "x-cg-demo-api-key",
    "x-cg-pro-api-key",
];

/// Upstream response relayed back to the caller unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pass-through client for the public CoinGecko `/api/v3` API
pub struct CoinGeckoProxy {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoProxy {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("COINGECKO_BASE_URL")
            .unwrap_or_else(|_| COINGECKO_API_URL.to_string());
        Self::new(base_url)
    }

    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path_and_query)
    }

    /// GET `path_and_query` from CoinGecko with the caller's forwardable
    /// headers. Any HTTP status is relayed, only transport failures are errors.
    pub async fn forward(&self, path_and_query: &str, headers: &HeaderMap) -> Result<ProxyResponse> {
        let url = self.target_url(path_and_query);
        debug!("Proxying to CoinGecko: {}", url);

        let mut request = self.client.get(&url);
        for name in FORWARDED_HEADERS {
            for value in headers.get_all(name) {
                request = request.header(name, value.clone());
            }
        }

        let response = request.send().await.map_err(|e| {
            error!("CoinGecko request failed: {}", e);
            Error::HttpError(e)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(Error::HttpError)?.to_vec();

        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }
}
