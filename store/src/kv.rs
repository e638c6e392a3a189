use crate::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Key-value storage holding JSON documents with optional expiry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    /// With `ttl` set the store purges the entry once it elapses.
    async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
