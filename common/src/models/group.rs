use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named set of coin codes the user wants priced together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    /// Coin codes as supplied by the client (e.g., "BTC", "ETH")
    pub coins: Vec<String>,
    /// Any other fields the client sent, stored and returned untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Group {
    pub fn new(name: impl Into<String>, coins: &[&str]) -> Self {
        Self {
            name: name.into(),
            coins: coins.iter().map(|c| c.to_string()).collect(),
            extra: Map::new(),
        }
    }
}
