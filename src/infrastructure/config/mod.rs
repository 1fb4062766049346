mod settings;

pub use settings::{LoggingConfig, RedisConfig, ServerConfig, Settings, StoreSettings};
