//! Store configuration, errors and event topic names

use thiserror::Error;

use crate::datastore::DatastoreError;

use super::keys::KEY_SEPARATOR;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "socket.io";

/// Construction parameters of a [`Store`](super::Store); fixed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Prefix of every key and channel
    pub namespace: String,
}

impl StoreConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Reject namespaces that would reach into another namespace's keys or
    /// channels: empty, containing the key separator, or containing Redis
    /// glob metacharacters.
    pub fn validate(&self) -> StoreResult<()> {
        let ns = &self.namespace;
        if ns.is_empty() {
            return Err(StoreError::InvalidNamespace(
                "namespace must not be empty".to_string(),
            ));
        }
        if ns.contains(KEY_SEPARATOR) {
            return Err(StoreError::InvalidNamespace(format!(
                "namespace {:?} must not contain '{}'",
                ns, KEY_SEPARATOR
            )));
        }
        if let Some(c) = ns.chars().find(|c| GLOB_METACHARACTERS.contains(c)) {
            return Err(StoreError::InvalidNamespace(format!(
                "namespace {:?} must not contain '{}'",
                ns, c
            )));
        }
        Ok(())
    }
}

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The shared datastore rejected or could not run an operation
    #[error("Datastore unavailable: {0}")]
    DatastoreUnavailable(#[from] DatastoreError),

    #[error("Client {0} is not handshaken")]
    NotHandshaken(String),

    /// Operation on a client handle after teardown
    #[error("Client {0} was already destroyed")]
    AlreadyDestroyed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Packets relayed to the process owning a connection's transport.
pub fn message_topic(id: &str) -> String {
    format!("message:{}", id)
}

pub fn disconnect_topic(id: &str) -> String {
    format!("disconnect:{}", id)
}

pub fn disconnect_force_topic(id: &str) -> String {
    format!("disconnect-force:{}", id)
}

/// Liveness signal consumed by the framing layer.
pub fn heartbeat_topic(id: &str) -> String {
    format!("heartbeat-clear:{}", id)
}
