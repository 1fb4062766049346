//! Redis command connection with circuit breaker integration.
//!
//! The store issues every key/value command through one multiplexed
//! connection. Pub/sub uses a dedicated connection opened by the
//! datastore backend, because a subscribed connection cannot run commands.

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::datastore::DatastoreError;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RedisHealth};

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    url: String,
}

impl RedisPool {
    pub fn new(
        config: &RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<RedisHealth>,
    ) -> Result<Self, DatastoreError> {
        let url = config.url();
        let client = Client::open(url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health,
            url,
        })
    }

    /// Pool with its own breaker and health tracker built from `config`.
    pub fn from_config(config: &RedisConfig) -> Result<Self, DatastoreError> {
        Self::new(
            config,
            Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(config))),
            Arc::new(RedisHealth::new()),
        )
    }

    /// The underlying client, for opening dedicated pub/sub connections.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn health(&self) -> Arc<RedisHealth> {
        self.health.clone()
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.circuit_breaker.clone()
    }

    /// Shared connection, established lazily. Fails fast while the
    /// circuit is open.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, DatastoreError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(DatastoreError::CircuitOpen);
        }

        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, DatastoreError> {
        let mut guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.url, "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, url = %self.url, "Failed to connect to Redis");
                Err(DatastoreError::Redis(e))
            }
        }
    }

    /// Run one command (or pipeline) and record the outcome on the breaker.
    /// Dropped connections are discarded so the next call reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, DatastoreError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *self.connection.write().await = None;
                    self.health.set_reconnecting();
                }
                self.circuit_breaker.record_failure();
                Err(DatastoreError::Redis(e))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ping(&self) -> Result<(), DatastoreError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
