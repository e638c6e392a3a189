use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Normalized market data for a single coin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceEntry {
    /// Price in the requested currency
    pub price: f64,
    /// Fractional day-over-day change (0.023 = +2.3%)
    pub delta_24h: f64,
    /// Market capitalisation in the requested currency
    pub market_cap: f64,
}

/// Aggregated prices for a scope's coin set, stamped with the fetch time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
    pub data: HashMap<String, PriceEntry>,
}

impl PriceSnapshot {
    pub fn new(data: HashMap<String, PriceEntry>) -> Self {
        Self {
            updated_at: Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Whether the snapshot is younger than `ttl` at `now_ms`
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.updated_at) < ttl_ms
    }
}
