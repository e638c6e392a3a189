use crate::{KeyValueStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct StoredValue {
    /// Serialized JSON, kept as text like a remote store would
    data: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// In-process key-value store with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let data = self.data.read().await;
        data.values().filter(|v| !v.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, raw: &str) {
        self.data.write().await.insert(
            key.to_string(),
            StoredValue {
                data: raw.to_string(),
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Instant::now();
        {
            let data = self.data.read().await;
            match data.get(key) {
                None => return Ok(None),
                Some(stored) if !stored.is_expired(now) => {
                    return serde_json::from_str(&stored.data)
                        .map(Some)
                        .map_err(StoreError::from);
                }
                Some(_) => {}
            }
        }

        // Expired: purge, unless a writer replaced it in the meantime
        let mut data = self.data.write().await;
        if data.get(key).map_or(false, |stored| stored.is_expired(now)) {
            debug!("Purging expired key {}", key);
            data.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let data = serde_json::to_string(value)
            .map_err(|e| StoreError::WriteError(e.to_string()))?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        self.data
            .write()
            .await
            .insert(key.to_string(), StoredValue { data, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}
