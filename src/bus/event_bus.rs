use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::datastore::{Datastore, MessageStream, PubSubMessage};
use crate::metrics::BusMetrics;
use crate::redis::{BackoffConfig, ExponentialBackoff};
use crate::store::{KeyNamespacer, StoreResult};

use super::types::{BusEvent, Envelope, EventOrigin, Listener, ListenerId};

/// Publish/subscribe hub shared by every component of a process.
///
/// Listeners run synchronously inside `publish` for local publications and
/// inside the receive loop for remote ones. One pattern subscription on
/// `<ns>:*` carries every topic; deliveries are demultiplexed by exact topic.
pub struct EventBus {
    node_id: String,
    keys: KeyNamespacer,
    datastore: Arc<dyn Datastore>,
    listeners: DashMap<String, Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    backoff: BackoffConfig,
    shutdown: broadcast::Sender<()>,
    receiver: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Held across the initial subscription so concurrent starts spawn one loop
    starting: AsyncMutex<()>,
}

impl EventBus {
    pub fn new(keys: KeyNamespacer, datastore: Arc<dyn Datastore>) -> Self {
        Self::with_backoff(keys, datastore, BackoffConfig::default())
    }

    /// `backoff` paces resubscription after the pub/sub stream is lost.
    pub fn with_backoff(
        keys: KeyNamespacer,
        datastore: Arc<dyn Datastore>,
        backoff: BackoffConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            keys,
            datastore,
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            backoff,
            shutdown,
            receiver: parking_lot::Mutex::new(None),
            starting: AsyncMutex::new(()),
        }
    }

    /// Identifier stamped on every publication of this process.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_running(&self) -> bool {
        self.receiver
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to the namespace pattern and spawn the receive loop.
    ///
    /// Returns once the subscription is active, so publications made by
    /// other processes afterwards are received. Calling it again while the
    /// loop runs does nothing, also when the calls overlap.
    pub async fn start(self: &Arc<Self>) -> StoreResult<()> {
        let _starting = self.starting.lock().await;
        if self.is_running() {
            return Ok(());
        }

        let pattern = self.keys.channel_pattern();
        let stream = self.datastore.psubscribe(&pattern).await?;
        tracing::info!(pattern = %pattern, node_id = %self.node_id, "Event bus subscribed");

        let task = tokio::spawn(receive_loop(
            Arc::downgrade(self),
            self.datastore.clone(),
            pattern,
            stream,
            self.backoff.clone(),
            self.shutdown.subscribe(),
        ));
        *self.receiver.lock() = Some(task);
        Ok(())
    }

    /// Stop the receive loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let task = self.receiver.lock().take();
        if let Some(task) = task {
            let _ = self.shutdown.send(());
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Event bus receive loop ended abnormally");
            }
            tracing::info!("Event bus stopped");
        }
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        tracing::trace!(topic = %topic, listener = id.0, "Listener added");
        self.listeners
            .entry(topic)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener; true when it was registered.
    pub fn remove_listener(&self, topic: &str, id: ListenerId) -> bool {
        let mut removed = false;
        let now_empty = match self.listeners.get_mut(topic) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(listener_id, _)| *listener_id != id);
                removed = entry.len() != before;
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.listeners.remove_if(topic, |_, listeners| listeners.is_empty());
        }
        removed
    }

    /// Remove every listener of `topic`; returns how many.
    pub fn unsubscribe(&self, topic: &str) -> usize {
        self.listeners
            .remove(topic)
            .map(|(_, listeners)| listeners.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Deliver to local listeners, then relay to other processes.
    ///
    /// A failing relay is returned after local listeners already ran.
    pub async fn publish(&self, topic: &str, payload: Value) -> StoreResult<()> {
        self.emit(topic, Some(payload)).await
    }

    /// Publish without a payload.
    pub async fn publish_bare(&self, topic: &str) -> StoreResult<()> {
        self.emit(topic, None).await
    }

    async fn emit(&self, topic: &str, payload: Option<Value>) -> StoreResult<()> {
        let envelope = Envelope {
            origin: self.node_id.clone(),
            data: payload,
        };
        let encoded = serde_json::to_vec(&envelope)?;

        self.dispatch(&BusEvent {
            topic: topic.to_string(),
            payload: envelope.data,
            origin: EventOrigin::Local,
        });

        let receivers = self
            .datastore
            .publish(&self.keys.channel(topic), &encoded)
            .await?;
        BusMetrics::record_published(topic);
        tracing::trace!(topic = %topic, receivers, "Published bus event");
        Ok(())
    }

    fn dispatch(&self, event: &BusEvent) {
        // Clone out so listeners may subscribe or unsubscribe re-entrantly
        let listeners: Vec<Listener> = match self.listeners.get(&event.topic) {
            Some(entry) => entry.iter().map(|(_, listener)| listener.clone()).collect(),
            None => return,
        };
        for listener in listeners {
            listener(event);
        }
    }

    fn handle_remote(&self, message: PubSubMessage) {
        let Some(topic) = self.keys.topic_of(&message.channel) else {
            return;
        };

        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel = %message.channel,
                    "Dropping undecodable bus payload"
                );
                BusMetrics::record_dropped();
                return;
            }
        };

        // Already dispatched synchronously by `publish`
        if envelope.origin == self.node_id {
            return;
        }

        BusMetrics::record_received(topic);
        self.dispatch(&BusEvent {
            topic: topic.to_string(),
            payload: envelope.data,
            origin: EventOrigin::Remote,
        });
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(task) = self.receiver.get_mut().take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    bus: Weak<EventBus>,
    datastore: Arc<dyn Datastore>,
    pattern: String,
    mut stream: MessageStream,
    backoff: BackoffConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = ExponentialBackoff::with_config(backoff);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(pattern = %pattern, "Event bus received shutdown signal");
                break;
            }
            message = stream.next() => {
                match message {
                    Some(message) => {
                        let Some(bus) = bus.upgrade() else { break };
                        bus.handle_remote(message);
                    }
                    None => {
                        tracing::warn!(pattern = %pattern, "Pub/sub stream ended, resubscribing");
                        match resubscribe(&*datastore, &pattern, &mut backoff, &mut shutdown_rx).await {
                            Some(resumed) => stream = resumed,
                            None => break,
                        }
                    }
                }
            }
        }
    }
}

/// Retry the pattern subscription until it succeeds or shutdown is signalled.
async fn resubscribe(
    datastore: &dyn Datastore,
    pattern: &str,
    backoff: &mut ExponentialBackoff,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Option<MessageStream> {
    loop {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = shutdown_rx.recv() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match datastore.psubscribe(pattern).await {
            Ok(stream) => {
                tracing::info!(
                    pattern = %pattern,
                    attempts = backoff.attempt(),
                    "Event bus resubscribed"
                );
                backoff.reset();
                BusMetrics::record_resubscribe();
                return Some(stream);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    pattern = %pattern,
                    retry_in_ms = delay.as_millis() as u64,
                    "Event bus resubscription failed"
                );
            }
        }
    }
}
