use crate::{KeyValueStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Key-value store backed by Redis, values kept as JSON strings
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to Redis");

        let client = redis::Client::open(redis_url).map_err(|e| {
            StoreError::ConfigError(format!("Invalid Redis URL: {}", e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::ConnectionError(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self { connection })
    }
}

/// Redis `SET EX` takes whole seconds and rejects zero
fn expiry_seconds(ttl: Duration) -> usize {
    ttl.as_secs().max(1) as usize
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::ReadError(e.to_string()))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let data = serde_json::to_string(value)
            .map_err(|e| StoreError::WriteError(e.to_string()))?;
        let mut conn = self.connection.clone();

        let result = match ttl {
            Some(ttl) => {
                debug!("SET {} with expiry {:?}", key, ttl);
                conn.set_ex::<_, _, ()>(key, data, expiry_seconds(ttl)).await
            }
            None => conn.set::<_, _, ()>(key, data).await,
        };
        result.map_err(|e| StoreError::WriteError(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::WriteError(e.to_string()))
    }
}
