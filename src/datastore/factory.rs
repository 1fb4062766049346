//! Datastore backend factory

use std::sync::Arc;

use crate::config::StoreSettings;
use crate::redis::RedisPool;

use super::memory::MemoryDatastore;
use super::redis_backend::RedisDatastore;
use super::Datastore;

/// Create a datastore based on configuration.
///
/// - `"redis"` (default): `RedisDatastore` over the given pool
/// - `"memory"`: process-local `MemoryDatastore`, only useful for a single node
///
/// Falls back to memory when Redis is requested without a pool.
pub fn create_datastore(
    settings: &StoreSettings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn Datastore> {
    match settings.backend.as_str() {
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory datastore");
            Arc::new(MemoryDatastore::new())
        }
        _ => match redis_pool {
            Some(pool) => {
                tracing::info!(backend = "redis", url = %pool.url(), "Creating Redis datastore");
                Arc::new(RedisDatastore::new(pool))
            }
            None => {
                tracing::warn!("Redis datastore requested but no pool provided, falling back to memory");
                Arc::new(MemoryDatastore::new())
            }
        },
    }
}
