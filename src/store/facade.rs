use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};

use crate::bus::{BusEvent, EventBus, ListenerId};
use crate::client::ClientHandle;
use crate::datastore::{Datastore, DatastoreBackend};
use crate::metrics::StoreMetrics;
use crate::presence::PresenceLedger;
use crate::redis::BackoffConfig;
use crate::rooms::RoomIndex;

use super::id::generate_id;
use super::keys::KeyNamespacer;
use super::types::{
    disconnect_force_topic, disconnect_topic, heartbeat_topic, message_topic, StoreConfig,
    StoreError, StoreResult,
};

/// A handle living in this process plus the bus listeners feeding it.
struct LocalClient {
    handle: Arc<ClientHandle>,
    listeners: Vec<(String, ListenerId)>,
}

/// Connection-state store shared by every process of a deployment.
///
/// Presence and rooms live in the datastore; client handles live in this
/// process only and are fed through the event bus, so a message relayed
/// from any process reaches the handle wherever it was created.
pub struct Store {
    config: StoreConfig,
    keys: KeyNamespacer,
    datastore: Arc<dyn Datastore>,
    ledger: Arc<PresenceLedger>,
    rooms: RoomIndex,
    bus: Arc<EventBus>,
    clients: DashMap<String, LocalClient>,
    this: Weak<Store>,
}

impl Store {
    /// Fails with `InvalidNamespace` when the namespace could overlap
    /// another store's keys or channels.
    pub fn new(config: StoreConfig, datastore: Arc<dyn Datastore>) -> StoreResult<Arc<Self>> {
        Self::with_backoff(config, datastore, BackoffConfig::default())
    }

    /// Like [`new`](Self::new) with explicit bus resubscription pacing.
    pub fn with_backoff(
        config: StoreConfig,
        datastore: Arc<dyn Datastore>,
        backoff: BackoffConfig,
    ) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let keys = KeyNamespacer::new(config.namespace.clone());
        let ledger = Arc::new(PresenceLedger::new(keys.clone(), datastore.clone()));
        let rooms = RoomIndex::new(keys.clone(), datastore.clone());
        let bus = Arc::new(EventBus::with_backoff(
            keys.clone(),
            datastore.clone(),
            backoff,
        ));

        Ok(Arc::new_cyclic(|this| Self {
            config,
            keys,
            datastore,
            ledger,
            rooms,
            bus,
            clients: DashMap::new(),
            this: this.clone(),
        }))
    }

    /// Establish the bus subscription. Events published by other processes
    /// before this returns are not seen.
    pub async fn start(&self) -> StoreResult<()> {
        self.bus.start().await?;
        tracing::info!(
            namespace = %self.keys.namespace(),
            backend = self.datastore.backend_type().as_str(),
            node_id = %self.bus.node_id(),
            "Store started"
        );
        Ok(())
    }

    /// Stop relaying and destroy every local handle. Shared state is kept.
    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
        let ids: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        for id in &ids {
            self.evict(id);
        }
        tracing::info!(released = ids.len(), "Store shut down");
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        self.keys.namespace()
    }

    pub fn node_id(&self) -> &str {
        self.bus.node_id()
    }

    pub fn backend_type(&self) -> DatastoreBackend {
        self.datastore.backend_type()
    }

    pub fn is_running(&self) -> bool {
        self.bus.is_running()
    }

    pub fn local_client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_local_client(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn presence(&self) -> &PresenceLedger {
        &self.ledger
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // Connection lifecycle

    /// Issue a fresh id and record it as handshaken.
    pub async fn handshake(&self) -> StoreResult<String> {
        let id = generate_id();
        self.ledger.mark_handshaken(&id).await?;
        StoreMetrics::record_handshake();
        tracing::debug!(id = %id, "Handshake issued");
        Ok(id)
    }

    pub async fn is_handshaken(&self, id: &str) -> StoreResult<bool> {
        self.ledger.is_handshaken(id).await
    }

    /// This process's handle for `id`, created on first access.
    ///
    /// A new handle receives `message:<id>` payloads into its buffer and is
    /// destroyed on `disconnect:<id>`.
    pub async fn client(&self, id: &str) -> StoreResult<Arc<ClientHandle>> {
        if let Some(local) = self.clients.get(id) {
            return Ok(local.handle.clone());
        }

        self.ledger.ensure_client_record(id).await?;

        let handle = match self.clients.entry(id.to_string()) {
            Entry::Occupied(entry) => return Ok(entry.get().handle.clone()),
            Entry::Vacant(entry) => {
                let handle = Arc::new(ClientHandle::new(id, self.ledger.clone()));
                let listeners = self.attach(&handle);
                entry.insert(LocalClient {
                    handle: handle.clone(),
                    listeners,
                });
                handle
            }
        };

        StoreMetrics::set_local_clients(self.clients.len());
        tracing::debug!(id = %id, "Client handle created");
        Ok(handle)
    }

    /// Tear down `id` everywhere.
    ///
    /// Removes room memberships and the presence record, then announces
    /// the disconnect so every process destroys its handle. An id that is
    /// not handshaken only loses its local handle.
    pub async fn disconnect(&self, id: &str, force: bool, reason: &str) -> StoreResult<()> {
        if !self.ledger.is_handshaken(id).await? {
            self.evict(id);
            return Err(StoreError::NotHandshaken(id.to_string()));
        }

        self.rooms.leave_all(id).await?;
        self.ledger.clear(id).await?;

        if force {
            self.bus
                .publish(&disconnect_force_topic(id), json!(reason))
                .await?;
        }
        self.bus.publish(&disconnect_topic(id), json!(reason)).await?;

        StoreMetrics::record_disconnect(force);
        tracing::debug!(id = %id, force, reason = %reason, "Client disconnected");
        Ok(())
    }

    /// Tell the process holding the transport that `id` is alive.
    pub async fn heartbeat(&self, id: &str) -> StoreResult<()> {
        self.bus.publish_bare(&heartbeat_topic(id)).await
    }

    /// Relay a packet to `id`'s handle in whichever process holds it.
    pub async fn message(&self, id: &str, packet: Value) -> StoreResult<()> {
        self.bus.publish(&message_topic(id), packet).await
    }

    // Rooms

    pub async fn join(&self, id: &str, room: &str) -> StoreResult<()> {
        self.rooms.join(id, room).await
    }

    pub async fn leave(&self, id: &str, room: &str) -> StoreResult<()> {
        self.rooms.leave(id, room).await
    }

    /// Members of `room`; the empty name is the default room.
    pub async fn clients(&self, room: &str) -> StoreResult<HashSet<String>> {
        self.rooms.members_of(room).await
    }

    // Event bus pass-through

    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, listener)
    }

    pub fn unsubscribe(&self, topic: &str) -> usize {
        self.bus.unsubscribe(topic)
    }

    pub fn remove_listener(&self, topic: &str, id: ListenerId) -> bool {
        self.bus.remove_listener(topic, id)
    }

    pub async fn publish(&self, topic: &str, payload: Value) -> StoreResult<()> {
        self.bus.publish(topic, payload).await
    }

    pub async fn publish_bare(&self, topic: &str) -> StoreResult<()> {
        self.bus.publish_bare(topic).await
    }

    fn attach(&self, handle: &Arc<ClientHandle>) -> Vec<(String, ListenerId)> {
        let id = handle.id().to_string();

        let target = Arc::downgrade(handle);
        let message = message_topic(&id);
        let message_listener = self.bus.subscribe(message.clone(), move |event: &BusEvent| {
            let Some(handle) = target.upgrade() else {
                return;
            };
            let packet = event.payload.clone().unwrap_or(Value::Null);
            if let Err(e) = handle.publish(packet) {
                tracing::debug!(id = %handle.id(), error = %e, "Dropped message for released client");
            }
        });

        let store = self.this.clone();
        let disconnect = disconnect_topic(&id);
        let disconnect_listener = self.bus.subscribe(disconnect.clone(), move |_: &BusEvent| {
            if let Some(store) = store.upgrade() {
                store.evict(&id);
            }
        });

        vec![(message, message_listener), (disconnect, disconnect_listener)]
    }

    /// Destroy and forget the local handle for `id`, if any.
    fn evict(&self, id: &str) {
        let Some((_, local)) = self.clients.remove(id) else {
            return;
        };

        local.handle.destroy();
        for (topic, listener) in local.listeners {
            self.bus.remove_listener(&topic, listener);
        }
        StoreMetrics::set_local_clients(self.clients.len());
        tracing::debug!(id = %id, "Client handle released");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.keys.namespace())
            .field("node_id", &self.bus.node_id())
            .field("local_clients", &self.clients.len())
            .finish()
    }
}
