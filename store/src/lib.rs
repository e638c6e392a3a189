mod config;
mod error;
mod group_store;
mod kv;
mod memory;
mod redis_store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use group_store::GroupStore;
pub use kv::KeyValueStore;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::sync::Arc;
use tracing::info;

/// Open the backend selected by `config`: Redis when a URL is set, memory otherwise
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match &config.redis_url {
        Some(url) => {
            info!("Using Redis key-value store");
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
        None => {
            info!("REDIS_URL not set, using in-memory key-value store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
