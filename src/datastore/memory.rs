//! In-process datastore backend.
//!
//! Hashes and sets live in one mutex-guarded map, pub/sub rides a tokio
//! broadcast channel with glob filtering per subscription. Data is lost on
//! restart; clone the `Arc` to let several stores share one instance.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::{future, StreamExt};
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{
    Command, Datastore, DatastoreBackend, DatastoreError, MessageStream, PubSubMessage,
};

/// Broadcast capacity; slower subscribers lag and lose messages beyond it.
const PUBSUB_CAPACITY: usize = 4096;

#[derive(Debug)]
enum Entry {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, String>>, DatastoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(Some(hash)),
            Some(Entry::Set(_)) => Err(DatastoreError::WrongType(key.to_string())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, DatastoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(hash) => Ok(hash),
            Entry::Set(_) => Err(DatastoreError::WrongType(key.to_string())),
        }
    }

    fn set(&self, key: &str) -> Result<Option<&HashSet<String>>, DatastoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Set(set)) => Ok(Some(set)),
            Some(Entry::Hash(_)) => Err(DatastoreError::WrongType(key.to_string())),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut HashSet<String>, DatastoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()))
        {
            Entry::Set(set) => Ok(set),
            Entry::Hash(_) => Err(DatastoreError::WrongType(key.to_string())),
        }
    }

    /// Drop the key once its structure is empty.
    fn prune(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::Hash(hash)) => hash.is_empty(),
            Some(Entry::Set(set)) => set.is_empty(),
            None => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), DatastoreError> {
        self.hash_mut(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<bool, DatastoreError> {
        if self.hash(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.hash_mut(key)?.remove(field).is_some();
        self.prune(key);
        Ok(removed)
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        Ok(self.set_mut(key)?.insert(member.to_string()))
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        if self.set(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.set_mut(key)?.remove(member);
        self.prune(key);
        Ok(removed)
    }

    fn apply(&mut self, command: &Command) -> Result<(), DatastoreError> {
        match command {
            Command::SAdd { key, member } => self.sadd(key, member).map(|_| ()),
            Command::SRem { key, member } => self.srem(key, member).map(|_| ()),
            Command::HSet { key, field, value } => self.hset(key, field, value),
            Command::HDel { key, field } => self.hdel(key, field).map(|_| ()),
            Command::Del { key } => {
                self.entries.remove(key);
                Ok(())
            }
        }
    }
}

/// In-memory datastore with Redis-like hash, set and pub/sub semantics.
pub struct MemoryDatastore {
    keyspace: Mutex<Keyspace>,
    pubsub: broadcast::Sender<PubSubMessage>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        let (pubsub, _) = broadcast::channel(PUBSUB_CAPACITY);
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            pubsub,
        }
    }

    /// Number of keys currently stored.
    pub fn key_count(&self) -> usize {
        self.keyspace.lock().entries.len()
    }

    /// Snapshot of stored keys matching a glob pattern.
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>, DatastoreError> {
        let matcher = compile_pattern(pattern)?;
        let mut keys: Vec<String> = self
            .keyspace
            .lock()
            .entries
            .keys()
            .filter(|key| matcher.is_match(key.as_str()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    fn backend_type(&self) -> DatastoreBackend {
        DatastoreBackend::Memory
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DatastoreError> {
        let keyspace = self.keyspace.lock();
        Ok(keyspace.hash(key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DatastoreError> {
        self.keyspace.lock().hset(key, field, value)
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, DatastoreError> {
        let mut keyspace = self.keyspace.lock();
        let hash = keyspace.hash_mut(key)?;
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, DatastoreError> {
        self.keyspace.lock().hdel(key, field)
    }

    async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64, DatastoreError> {
        let mut keyspace = self.keyspace.lock();
        let hash = keyspace.hash_mut(key)?;
        let current = match hash.get(field) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| DatastoreError::WrongType(format!("{}.{}", key, field)))?,
            None => 0,
        };
        let next = current
            .checked_add(increment)
            .ok_or_else(|| DatastoreError::Overflow(format!("{}.{}", key, field)))?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        self.keyspace.lock().sadd(key, member)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        self.keyspace.lock().srem(key, member)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        let keyspace = self.keyspace.lock();
        Ok(keyspace
            .set(key)?
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>, DatastoreError> {
        let keyspace = self.keyspace.lock();
        Ok(keyspace.set(key)?.cloned().unwrap_or_default())
    }

    async fn del(&self, key: &str) -> Result<bool, DatastoreError> {
        Ok(self.keyspace.lock().entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, DatastoreError> {
        Ok(self.keyspace.lock().entries.contains_key(key))
    }

    async fn exec_atomic(&self, commands: Vec<Command>) -> Result<(), DatastoreError> {
        let mut keyspace = self.keyspace.lock();
        for command in &commands {
            keyspace.apply(command)?;
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, DatastoreError> {
        let message = PubSubMessage {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        };
        // No subscribers is not an error for pub/sub
        Ok(self.pubsub.send(message).unwrap_or(0))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, DatastoreError> {
        let matcher = compile_pattern(pattern)?;
        let pattern = pattern.to_string();
        let stream = BroadcastStream::new(self.pubsub.subscribe()).filter_map(move |item| {
            let matched = match item {
                Ok(message) if matcher.is_match(message.channel.as_str()) => Some(message),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, pattern = %pattern, "Memory pub/sub subscriber lagged");
                    None
                }
            };
            future::ready(matched)
        });
        Ok(Box::pin(stream))
    }
}

/// Compile a Redis-style pattern. `*` also spans `:` and `/`, and a
/// backslash escapes the next character.
fn compile_pattern(pattern: &str) -> Result<GlobMatcher, DatastoreError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| DatastoreError::InvalidPattern(e.to_string()))
}
