pub mod coingecko;
pub mod livecoinwatch;

use async_trait::async_trait;
use common::Result;
use serde::Deserialize;

/// Day-over-day change as reported by the provider
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct QuoteDelta {
    /// Multiplier relative to 24h ago (1.023 = +2.3%)
    pub day: Option<f64>,
}

/// Raw per-coin market data returned by a price provider
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CoinQuote {
    pub code: String,
    pub rate: Option<f64>,
    /// Absent or `null` when the provider has no history for the coin
    #[serde(default)]
    pub delta: Option<QuoteDelta>,
    pub cap: Option<f64>,
}

/// Trait defining the interface for upstream price providers
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Fetch market data for all `codes` in one round trip, priced in `currency`
    async fn fetch_prices(&self, codes: &[String], currency: &str) -> Result<Vec<CoinQuote>>;
}
