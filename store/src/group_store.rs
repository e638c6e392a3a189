use crate::{KeyValueStore, StoreConfig};
use common::{models::Group, Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// CRUD surface over the per-scope group list.
///
/// Every write also drops the scope's cached price snapshot so the next
/// price read is computed against the new groups.
#[derive(Clone)]
pub struct GroupStore {
    kv: Arc<dyn KeyValueStore>,
    config: StoreConfig,
}

impl GroupStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self { kv, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read the groups for `scope`. Never fails: absent, unreadable or
    /// malformed data all read as an empty list.
    pub async fn get_groups(&self, scope: &str) -> Vec<Group> {
        let key = self.config.group_key(scope);

        let value = match self.kv.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read groups for {}: {}", key, e);
                return Vec::new();
            }
        };

        match serde_json::from_value::<Vec<Group>>(value) {
            Ok(groups) => groups,
            Err(e) => {
                warn!("Stored groups under {} are malformed: {}", key, e);
                Vec::new()
            }
        }
    }

    /// Validate a client-supplied body and replace the scope's groups with it
    pub async fn put_groups(&self, scope: &str, body: &Value) -> Result<()> {
        let items = body
            .as_array()
            .ok_or_else(|| Error::ValidationError("Body must be an array.".to_string()))?;

        let groups = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<Group>(item.clone()).map_err(|e| {
                    Error::ValidationError(format!("Invalid group at index {}: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.replace_groups(scope, &groups).await
    }

    /// Persist `groups` as the scope's full list and invalidate its price cache
    pub async fn replace_groups(&self, scope: &str, groups: &[Group]) -> Result<()> {
        let key = self.config.group_key(scope);
        let value = serde_json::to_value(groups)
            .map_err(|e| Error::InternalError(format!("Failed to encode groups: {}", e)))?;

        debug!("Storing {} groups under {}", groups.len(), key);
        self.kv.put(&key, &value, None).await?;

        self.invalidate_prices(scope).await
    }

    /// Drop the cached price snapshot for `scope`
    pub async fn invalidate_prices(&self, scope: &str) -> Result<()> {
        let key = self.config.price_key(scope);
        self.kv.delete(&key).await.map_err(|e| {
            error!("Failed to invalidate price cache {}: {}", key, e);
            Error::from(e)
        })
    }
}
