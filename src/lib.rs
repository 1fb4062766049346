// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::redis;

// Store components
pub mod bus;
pub mod client;
pub mod datastore;
pub mod presence;
pub mod rooms;
pub mod store;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod telemetry;

pub use client::{ClientHandle, ClientSink, Delivery};
pub use store::{Store, StoreConfig, StoreError, StoreResult};
