//! Handshake status and per-connection attributes.
//!
//! The datastore is the only copy: `<ns>:handshaken` (set of ids),
//! `<ns>:clients` (id -> client meta JSON) and `<ns>:client:<id>`
//! (attribute hash).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::datastore::{Command, Datastore};
use crate::store::{KeyNamespacer, StoreResult};

/// Attribute counting transport requests for a connection
pub const COUNT_ATTRIBUTE: &str = "count";

/// Placeholder stored under `<ns>:clients` for a known client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub id: String,
}

pub struct PresenceLedger {
    keys: KeyNamespacer,
    datastore: Arc<dyn Datastore>,
}

impl PresenceLedger {
    pub fn new(keys: KeyNamespacer, datastore: Arc<dyn Datastore>) -> Self {
        Self { keys, datastore }
    }

    /// Idempotent.
    pub async fn mark_handshaken(&self, id: &str) -> StoreResult<()> {
        self.datastore.sadd(&self.keys.handshaken(), id).await?;
        tracing::debug!(id = %id, "Marked handshaken");
        Ok(())
    }

    pub async fn is_handshaken(&self, id: &str) -> StoreResult<bool> {
        Ok(self.datastore.sismember(&self.keys.handshaken(), id).await?)
    }

    pub async fn get_attribute(&self, id: &str, key: &str) -> StoreResult<Option<String>> {
        Ok(self.datastore.hget(&self.keys.client(id), key).await?)
    }

    pub async fn set_attribute(&self, id: &str, key: &str, value: &str) -> StoreResult<()> {
        self.datastore.hset(&self.keys.client(id), key, value).await?;
        Ok(())
    }

    /// Returns the value after incrementing.
    pub async fn increment_attribute(&self, id: &str, key: &str, by: i64) -> StoreResult<i64> {
        Ok(self.datastore.hincrby(&self.keys.client(id), key, by).await?)
    }

    /// Write the client meta placeholder unless one exists; true when written.
    pub async fn ensure_client_record(&self, id: &str) -> StoreResult<bool> {
        let meta = serde_json::to_string(&ClientMeta { id: id.to_string() })?;
        let created = self
            .datastore
            .hsetnx(&self.keys.clients(), id, &meta)
            .await?;
        if created {
            tracing::debug!(id = %id, "Initialized client record");
        }
        Ok(created)
    }

    pub async fn client_record(&self, id: &str) -> StoreResult<Option<ClientMeta>> {
        match self.datastore.hget(&self.keys.clients(), id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove handshake flag, client meta and attributes in one transaction.
    pub async fn clear(&self, id: &str) -> StoreResult<()> {
        self.datastore
            .exec_atomic(vec![
                Command::srem(self.keys.handshaken(), id),
                Command::hdel(self.keys.clients(), id),
                Command::del(self.keys.client(id)),
            ])
            .await?;
        tracing::debug!(id = %id, "Cleared presence record");
        Ok(())
    }
}
