//! Datastore capability consumed by the store.
//!
//! The store never talks to Redis directly: presence, rooms and the event
//! bus go through the [`Datastore`] trait, which covers the hash/set
//! commands, grouped atomic writes and pattern pub/sub they need.
//! [`RedisDatastore`] is the production backend; [`MemoryDatastore`] keeps
//! everything in-process and can be shared by several stores to stand in
//! for several processes.

mod factory;
mod memory;
mod redis_backend;

pub use factory::create_datastore;
pub use memory::MemoryDatastore;
pub use redis_backend::RedisDatastore;

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

/// Errors raised by datastore operations.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Circuit breaker is open
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Connection not available
    #[error("Connection not available: {0}")]
    ConnectionUnavailable(String),

    /// Key holds a structure of another kind
    #[error("Wrong value type at key {0}")]
    WrongType(String),

    /// Subscription or key pattern is not a valid glob
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Integer increment left the i64 range
    #[error("Increment or decrement would overflow at {0}")]
    Overflow(String),
}

/// A message delivered on a pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Messages matching a pattern subscription. Dropping the stream ends the
/// subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = PubSubMessage> + Send>>;

/// One write inside an [`Datastore::exec_atomic`] group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    HSet { key: String, field: String, value: String },
    HDel { key: String, field: String },
    Del { key: String },
}

impl Command {
    pub fn sadd(key: impl Into<String>, member: impl Into<String>) -> Self {
        Command::SAdd {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn srem(key: impl Into<String>, member: impl Into<String>) -> Self {
        Command::SRem {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn hset(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hdel(key: impl Into<String>, field: impl Into<String>) -> Self {
        Command::HDel {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Command::Del { key: key.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreBackend {
    Memory,
    Redis,
}

impl DatastoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatastoreBackend::Memory => "memory",
            DatastoreBackend::Redis => "redis",
        }
    }
}

/// Key/value and pub/sub capability shared by all store components.
///
/// Semantics follow Redis: a hash or set that loses its last element no
/// longer exists, set operations are idempotent, and `exec_atomic` runs its
/// commands without interleaving other clients' commands.
#[async_trait]
pub trait Datastore: Send + Sync {
    fn backend_type(&self) -> DatastoreBackend;

    // Hash operations

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DatastoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DatastoreError>;

    /// Set the field only if absent; true when it was written.
    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, DatastoreError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, DatastoreError>;

    async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64, DatastoreError>;

    // Set operations

    /// True when the member was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, DatastoreError>;

    /// True when the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, DatastoreError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, DatastoreError>;

    async fn smembers(&self, key: &str) -> Result<HashSet<String>, DatastoreError>;

    // Key operations

    async fn del(&self, key: &str) -> Result<bool, DatastoreError>;

    async fn exists(&self, key: &str) -> Result<bool, DatastoreError>;

    /// Run a group of writes as one transaction.
    async fn exec_atomic(&self, commands: Vec<Command>) -> Result<(), DatastoreError>;

    // Pub/sub

    /// Publish to a channel; returns how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, DatastoreError>;

    /// Subscribe to every channel matching a glob pattern. The subscription
    /// is active when this returns.
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, DatastoreError>;
}
