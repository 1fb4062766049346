use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::redis::RedisPool;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<Store>,
    /// Present when the store runs against Redis
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<Store>, redis_pool: Option<Arc<RedisPool>>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            redis_pool,
            start_time: Instant::now(),
        }
    }
}
