use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::metrics::StoreMetrics;
use crate::presence::{PresenceLedger, COUNT_ATTRIBUTE};
use crate::store::{StoreError, StoreResult};

use super::sink::{ClientSink, Delivery};

struct HandleState {
    paused: bool,
    buffer: Vec<Value>,
    sink: Option<Box<dyn ClientSink>>,
    destroyed: bool,
}

/// Process-local view of one connection.
///
/// Messages published while paused are buffered (unbounded) until a sink
/// is attached with [`consume`](Self::consume); while flowing they go
/// straight to the sink. Each process touching an id holds its own handle.
pub struct ClientHandle {
    id: String,
    ledger: Arc<PresenceLedger>,
    state: Mutex<HandleState>,
}

impl ClientHandle {
    pub fn new(id: impl Into<String>, ledger: Arc<PresenceLedger>) -> Self {
        Self {
            id: id.into(),
            ledger,
            state: Mutex::new(HandleState {
                paused: true,
                buffer: Vec::new(),
                sink: None,
                destroyed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn publish(&self, message: Value) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(StoreError::AlreadyDestroyed(self.id.clone()));
        }

        if !state.paused {
            if let Some(sink) = state.sink.as_mut() {
                sink.deliver(Delivery::Single(message));
                return Ok(());
            }
        }

        state.buffer.push(message);
        StoreMetrics::record_buffered(1);
        Ok(())
    }

    /// Attach `sink` and start flowing, flushing the buffer to it as one
    /// batch first. Replaces any sink already attached.
    pub fn consume<S>(&self, sink: S) -> StoreResult<()>
    where
        S: ClientSink + 'static,
    {
        let mut sink: Box<dyn ClientSink> = Box::new(sink);
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(StoreError::AlreadyDestroyed(self.id.clone()));
        }

        state.paused = false;
        if !state.buffer.is_empty() {
            let batch = std::mem::take(&mut state.buffer);
            StoreMetrics::record_unbuffered(batch.len());
            tracing::debug!(id = %self.id, messages = batch.len(), "Flushing client buffer");
            sink.deliver(Delivery::Batch(batch));
        }
        state.sink = Some(sink);
        Ok(())
    }

    /// Stop flowing; later messages are buffered again. The sink stays
    /// attached until the next `consume` replaces it.
    pub fn pause(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(StoreError::AlreadyDestroyed(self.id.clone()));
        }
        state.paused = true;
        Ok(())
    }

    /// Release the buffer and sink. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.paused = true;
        state.sink = None;
        if !state.buffer.is_empty() {
            StoreMetrics::record_unbuffered(state.buffer.len());
            tracing::debug!(
                id = %self.id,
                dropped = state.buffer.len(),
                "Discarding undelivered client messages"
            );
        }
        state.buffer = Vec::new();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_alive()?;
        self.ledger.get_attribute(&self.id, key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_alive()?;
        self.ledger.set_attribute(&self.id, key, value).await
    }

    /// Count one more transport request; returns the new total.
    pub async fn count(&self) -> StoreResult<i64> {
        self.ensure_alive()?;
        self.ledger
            .increment_attribute(&self.id, COUNT_ATTRIBUTE, 1)
            .await
    }

    fn ensure_alive(&self) -> StoreResult<()> {
        if self.is_destroyed() {
            return Err(StoreError::AlreadyDestroyed(self.id.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("paused", &state.paused)
            .field("buffered", &state.buffer.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
