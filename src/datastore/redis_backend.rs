//! Redis datastore backend.
//!
//! Commands share the pool's multiplexed connection and are recorded on
//! its circuit breaker. Each pattern subscription opens its own pub/sub
//! connection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;

use crate::metrics::DatastoreMetrics;
use crate::redis::RedisPool;

use super::{
    Command, Datastore, DatastoreBackend, DatastoreError, MessageStream, PubSubMessage,
};

pub struct RedisDatastore {
    pool: Arc<RedisPool>,
}

impl RedisDatastore {
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }
}

fn tracked<T>(operation: &'static str, result: Result<T, DatastoreError>) -> Result<T, DatastoreError> {
    if let Err(e) = &result {
        DatastoreMetrics::record_error(operation);
        tracing::warn!(operation, error = %e, "Redis operation failed");
    }
    result
}

#[async_trait]
impl Datastore for RedisDatastore {
    fn backend_type(&self) -> DatastoreBackend {
        DatastoreBackend::Redis
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DatastoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.hget(&key, &field).await })
            .await;
        tracked("hget", result)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DatastoreError> {
        let (key, field, value) = (key.to_string(), field.to_string(), value.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.hset::<_, _, _, ()>(&key, &field, &value).await })
            .await;
        tracked("hset", result)
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, DatastoreError> {
        let (key, field, value) = (key.to_string(), field.to_string(), value.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.hset_nx(&key, &field, &value).await })
            .await;
        tracked("hsetnx", result)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, DatastoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.hdel(&key, &field).await })
            .await;
        tracked("hdel", result)
    }

    async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64, DatastoreError> {
        let (key, field) = (key.to_string(), field.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.hincr(&key, &field, increment).await })
            .await;
        tracked("hincrby", result)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.sadd(&key, &member).await })
            .await;
        tracked("sadd", result)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.srem(&key, &member).await })
            .await;
        tracked("srem", result)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.sismember(&key, &member).await })
            .await;
        tracked("sismember", result)
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>, DatastoreError> {
        let key = key.to_string();
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.smembers(&key).await })
            .await;
        tracked("smembers", result)
    }

    async fn del(&self, key: &str) -> Result<bool, DatastoreError> {
        let key = key.to_string();
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.del(&key).await })
            .await;
        tracked("del", result)
    }

    async fn exists(&self, key: &str) -> Result<bool, DatastoreError> {
        let key = key.to_string();
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.exists(&key).await })
            .await;
        tracked("exists", result)
    }

    async fn exec_atomic(&self, commands: Vec<Command>) -> Result<(), DatastoreError> {
        if commands.is_empty() {
            return Ok(());
        }

        // MULTI ... EXEC
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            match command {
                Command::SAdd { key, member } => pipe.sadd(key, member).ignore(),
                Command::SRem { key, member } => pipe.srem(key, member).ignore(),
                Command::HSet { key, field, value } => pipe.hset(key, field, value).ignore(),
                Command::HDel { key, field } => pipe.hdel(key, field).ignore(),
                Command::Del { key } => pipe.del(key).ignore(),
            };
        }

        let result = self
            .pool
            .execute(move |mut conn| async move {
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await;
        tracked("exec_atomic", result)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, DatastoreError> {
        let (channel, payload) = (channel.to_string(), payload.to_vec());
        let result = self
            .pool
            .execute(move |mut conn| async move { conn.publish(&channel, payload).await })
            .await;
        tracked("publish", result)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, DatastoreError> {
        let health = self.pool.health();

        let mut pubsub = match self.pool.client().get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                health.set_reconnecting();
                return tracked("psubscribe", Err(DatastoreError::Redis(e)));
            }
        };
        tracked(
            "psubscribe",
            pubsub.psubscribe(pattern).await.map_err(DatastoreError::from),
        )?;

        tracing::debug!(pattern = %pattern, "Subscribed to Redis pattern");

        let stream = pubsub.into_on_message().map(|msg| PubSubMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(Box::pin(stream))
    }
}
