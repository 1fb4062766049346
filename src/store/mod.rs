//! Store facade and the pieces every component shares: key naming,
//! connection ids, configuration and errors.

mod facade;
mod id;
mod keys;
mod types;

pub use facade::Store;
pub use id::generate_id;
pub use keys::{KeyNamespacer, KEY_SEPARATOR};
pub use types::{
    disconnect_force_topic, disconnect_topic, heartbeat_topic, message_topic, StoreConfig,
    StoreError, StoreResult, DEFAULT_NAMESPACE,
};
