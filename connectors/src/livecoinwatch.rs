use crate::{CoinQuote, PriceProvider};
use async_trait::async_trait;
use common::{Error, Result};
use serde::Serialize;
use tracing::{debug, error};

const LIVECOINWATCH_API_URL: &str = "https://api.livecoinwatch.com";

#[derive(Debug, Clone)]
pub struct LiveCoinWatchConfig {
    pub base_url: String,
    pub api_key: String,
}

impl LiveCoinWatchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: LIVECOINWATCH_API_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Load from `LCW_API_KEY` (required) and `LCW_BASE_URL`
    pub fn from_env() -> std::result::Result<Self, String> {
        let api_key = std::env::var("LCW_API_KEY")
            .map_err(|_| "LCW_API_KEY environment variable not set")?;
        let base_url = std::env::var("LCW_BASE_URL")
            .unwrap_or_else(|_| LIVECOINWATCH_API_URL.to_string());

        Ok(Self { base_url, api_key })
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct CoinsMapRequest<'a> {
    codes: &'a [String],
    currency: &'a str,
    sort: &'static str,
    order: &'static str,
    offset: u32,
    limit: u32,
    meta: bool,
}

impl<'a> CoinsMapRequest<'a> {
    fn new(codes: &'a [String], currency: &'a str) -> Self {
        Self {
            codes,
            currency,
            sort: "rank",
            order: "ascending",
            offset: 0,
            limit: 0,
            meta: false,
        }
    }
}

/// Client for the LiveCoinWatch `/coins/map` endpoint
pub struct LiveCoinWatchConnector {
    client: reqwest::Client,
    config: LiveCoinWatchConfig,
}

impl LiveCoinWatchConnector {
    pub fn new(config: LiveCoinWatchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl PriceProvider for LiveCoinWatchConnector {
    async fn fetch_prices(&self, codes: &[String], currency: &str) -> Result<Vec<CoinQuote>> {
        let url = format!("{}/coins/map", self.config.base_url.trim_end_matches('/'));

        debug!("Fetching {} coins from LiveCoinWatch in {}", codes.len(), currency);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .json(&CoinsMapRequest::new(codes, currency))
            .send()
            .await
            .map_err(Error::HttpError)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("LiveCoinWatch API error: {} - {}", status, error_text);
            return Err(Error::UpstreamError(format!(
                "LiveCoinWatch API error: {} - {}",
                status, error_text
            )));
        }

        response.json::<Vec<CoinQuote>>().await.map_err(|e| {
            Error::UpstreamError(format!("Failed to parse LiveCoinWatch response: {}", e))
        })
    }
}
