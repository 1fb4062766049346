//! Store integration tests
//!
//! Several `Store` instances sharing one `MemoryDatastore` stand in for
//! several server processes, so these run without Redis.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use ara_connection_store::bus::BusEvent;
use ara_connection_store::client::{ChannelSink, Delivery};
use ara_connection_store::datastore::{Datastore, MemoryDatastore};
use ara_connection_store::store::{Store, StoreConfig, StoreError};

fn shared_datastore() -> Arc<MemoryDatastore> {
    Arc::new(MemoryDatastore::new())
}

fn store_on(datastore: &Arc<MemoryDatastore>, namespace: &str) -> Arc<Store> {
    Store::new(StoreConfig::with_namespace(namespace), datastore.clone()).unwrap()
}

async fn started_store(datastore: &Arc<MemoryDatastore>, namespace: &str) -> Arc<Store> {
    let store = store_on(datastore, namespace);
    assert_ok!(store.start().await);
    store
}

/// Poll until `condition` holds; remote deliveries arrive on a background task.
async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Presence and rooms
// =============================================================================

mod presence_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_join_disconnect_scenario() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "socket.io");

        let id = assert_ok!(store.handshake().await);
        assert!(assert_ok!(store.is_handshaken(&id).await));

        assert_ok!(store.join(&id, "lobby").await);
        assert_eq!(
            assert_ok!(store.clients("lobby").await),
            HashSet::from([id.clone()])
        );

        assert_ok!(store.disconnect(&id, false, "client left").await);
        assert!(!assert_ok!(store.is_handshaken(&id).await));
        assert!(assert_ok!(store.clients("lobby").await).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_no_keys_behind() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");

        let id = assert_ok!(store.handshake().await);
        let handle = assert_ok!(store.client(&id).await);
        assert_ok!(handle.set("nickname", "ada").await);
        assert_ok!(handle.count().await);
        assert_ok!(store.join(&id, "").await);
        assert_ok!(store.join(&id, "lobby").await);

        assert_ok!(store.disconnect(&id, false, "bye").await);

        assert_eq!(datastore.key_count(), 0, "left: {:?}", datastore.keys("*"));
    }

    #[tokio::test]
    async fn test_join_twice_equals_join_once() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");

        assert_ok!(store.join("a", "lobby").await);
        let once = assert_ok!(store.clients("lobby").await);
        assert_ok!(store.join("a", "lobby").await);

        assert_eq!(assert_ok!(store.clients("lobby").await), once);
    }

    #[tokio::test]
    async fn test_default_room_is_distinct() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");

        assert_ok!(store.join("a", "").await);
        assert_ok!(store.join("b", "lobby").await);
        assert_ok!(store.leave("a", "lobby").await);

        assert_eq!(assert_ok!(store.clients("").await), HashSet::from(["a".to_string()]));
        assert_eq!(
            assert_ok!(store.clients("lobby").await),
            HashSet::from(["b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_membership_visible_across_processes() {
        let datastore = shared_datastore();
        let node_a = store_on(&datastore, "ns");
        let node_b = store_on(&datastore, "ns");

        let id = assert_ok!(node_a.handshake().await);
        assert_ok!(node_b.join(&id, "lobby").await);

        assert!(assert_ok!(node_b.is_handshaken(&id).await));
        assert!(assert_ok!(node_a.clients("lobby").await).contains(&id));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let datastore = shared_datastore();
        let store_a = store_on(&datastore, "a");
        let store_b = store_on(&datastore, "b");

        let id = assert_ok!(store_a.handshake().await);
        assert_ok!(store_a.join(&id, "lobby").await);

        assert!(!assert_ok!(store_b.is_handshaken(&id).await));
        assert!(assert_ok!(store_b.clients("lobby").await).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_id_fails() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");

        let err = assert_err!(store.disconnect("never-seen", true, "x").await);
        assert!(matches!(err, StoreError::NotHandshaken(id) if id == "never-seen"));
    }

    #[tokio::test]
    async fn test_count_shared_between_processes() {
        let datastore = shared_datastore();
        let node_a = store_on(&datastore, "ns");
        let node_b = store_on(&datastore, "ns");

        let id = assert_ok!(node_a.handshake().await);
        let on_a = assert_ok!(node_a.client(&id).await);
        let on_b = assert_ok!(node_b.client(&id).await);

        assert_eq!(assert_ok!(on_a.count().await), 1);
        assert_eq!(assert_ok!(on_b.count().await), 2);
        assert_ok!(on_b.set("transport", "websocket").await);
        assert_eq!(
            assert_ok!(on_a.get("transport").await),
            Some("websocket".to_string())
        );
    }
}

// =============================================================================
// Client handles and relay
// =============================================================================

mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn test_client_handle_is_per_process() {
        let datastore = shared_datastore();
        let node_a = store_on(&datastore, "ns");
        let node_b = store_on(&datastore, "ns");

        let first = assert_ok!(node_a.client("x").await);
        let again = assert_ok!(node_a.client("x").await);
        let other = assert_ok!(node_b.client("x").await);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(node_a.local_client_count(), 1);
        assert_eq!(node_b.local_client_count(), 1);
    }

    #[tokio::test]
    async fn test_message_relayed_to_other_process() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let id = assert_ok!(node_a.handshake().await);
        let handle = assert_ok!(node_b.client(&id).await);

        assert_ok!(node_a.message(&id, json!({"type": "event", "name": "chat"})).await);
        eventually(|| handle.buffered_len() == 1).await;

        let (sink, mut rx) = ChannelSink::pair();
        assert_ok!(handle.consume(sink));
        assert_eq!(
            rx.recv().await,
            Some(Delivery::Batch(vec![json!({"type": "event", "name": "chat"})]))
        );

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_each_process_gets_message_once() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let on_a = assert_ok!(node_a.client("x").await);
        let on_b = assert_ok!(node_b.client("x").await);

        assert_ok!(node_a.message("x", json!(1)).await);
        eventually(|| on_b.buffered_len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(on_a.buffered_len(), 1);
        assert_eq!(on_b.buffered_len(), 1);

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_buffer_flush_then_flowing() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");
        let handle = assert_ok!(store.client("x").await);

        assert_ok!(store.message("x", json!("m1")).await);
        assert_ok!(store.message("x", json!("m2")).await);
        assert_ok!(store.message("x", json!("m3")).await);

        let (sink, mut rx) = ChannelSink::pair();
        assert_ok!(handle.consume(sink));
        assert_ok!(store.message("x", json!("m4")).await);

        assert_eq!(
            rx.recv().await,
            Some(Delivery::Batch(vec![json!("m1"), json!("m2"), json!("m3")]))
        );
        assert_eq!(rx.recv().await, Some(Delivery::Single(json!("m4"))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pause_rebuffers_relayed_messages() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");
        let handle = assert_ok!(store.client("x").await);

        let (sink, mut rx) = ChannelSink::pair();
        assert_ok!(handle.consume(sink));
        assert_ok!(handle.pause());
        assert_ok!(store.message("x", json!("held")).await);

        assert!(rx.try_recv().is_err());
        assert_eq!(handle.buffered_len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_destroys_handles_everywhere() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let id = assert_ok!(node_a.handshake().await);
        let on_a = assert_ok!(node_a.client(&id).await);
        let on_b = assert_ok!(node_b.client(&id).await);

        assert_ok!(node_a.disconnect(&id, true, "kicked").await);

        assert!(on_a.is_destroyed());
        eventually(|| on_b.is_destroyed()).await;
        eventually(|| node_b.local_client_count() == 0).await;
        assert_eq!(node_a.local_client_count(), 0);

        let err = assert_err!(on_b.publish(json!("late")));
        assert!(matches!(err, StoreError::AlreadyDestroyed(_)));

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_recreated_handle_after_disconnect_is_fresh() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");

        let id = assert_ok!(store.handshake().await);
        let old = assert_ok!(store.client(&id).await);
        assert_ok!(store.disconnect(&id, false, "bye").await);

        let fresh = assert_ok!(store.client(&id).await);
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!fresh.is_destroyed());
        assert!(fresh.is_paused());
    }
}

// =============================================================================
// Framing-layer signals
// =============================================================================

mod signal_tests {
    use super::*;

    fn record(store: &Store, topic: String) -> Arc<Mutex<Vec<BusEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(topic, move |event: &BusEvent| sink.lock().push(event.clone()));
        seen
    }

    #[tokio::test]
    async fn test_forced_disconnect_reaches_transport_owner() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let id = assert_ok!(node_a.handshake().await);
        let forced = record(&node_b, format!("disconnect-force:{}", id));
        let plain = record(&node_b, format!("disconnect:{}", id));

        assert_ok!(node_a.disconnect(&id, true, "kicked").await);

        eventually(|| forced.lock().len() == 1 && plain.lock().len() == 1).await;
        assert_eq!(forced.lock()[0].payload, Some(json!("kicked")));
        assert_eq!(plain.lock()[0].payload, Some(json!("kicked")));

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_message_reaches_remote_listener() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let seen = record(&node_b, "message:x".to_string());
        assert_ok!(node_a.message("x", json!({"type": "ping"})).await);

        eventually(|| seen.lock().len() == 1).await;
        assert_eq!(seen.lock()[0].payload, Some(json!({"type": "ping"})));

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_heartbeat_relayed_without_payload() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let seen = record(&node_b, "heartbeat-clear:x".to_string());
        assert_ok!(node_a.heartbeat("x").await);

        eventually(|| seen.lock().len() == 1).await;
        assert_eq!(seen.lock()[0].payload, None);

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_relay() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "ns").await;
        let node_b = started_store(&datastore, "ns").await;

        let seen = record(&node_b, "custom".to_string());
        assert_eq!(node_b.unsubscribe("custom"), 1);
        assert_ok!(node_a.publish("custom", json!(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen.lock().is_empty());

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_namespace_not_relayed() {
        let datastore = shared_datastore();
        let node_a = started_store(&datastore, "a").await;
        let node_b = started_store(&datastore, "b").await;

        let seen = record(&node_b, "custom".to_string());
        assert_ok!(node_a.publish("custom", json!(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen.lock().is_empty());

        node_a.shutdown().await;
        node_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_channel_layout() {
        let datastore = shared_datastore();
        let store = store_on(&datastore, "ns");
        let mut raw = assert_ok!(datastore.psubscribe("ns:message:*").await);

        assert_ok!(store.message("x", json!({"n": 1})).await);

        let message = tokio::time::timeout(Duration::from_secs(1), futures::StreamExt::next(&mut raw))
            .await
            .expect("no message")
            .expect("stream ended");
        assert_eq!(message.channel, "ns:message:x");
        let envelope: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(envelope["data"], json!({"n": 1}));
        assert_eq!(envelope["origin"], json!(store.node_id()));
    }
}

// =============================================================================
// Datastore failures and concurrent startup
// =============================================================================

mod failure_tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use ara_connection_store::datastore::{
        Command, DatastoreBackend, DatastoreError, MessageStream,
    };

    /// Memory datastore that can be taken offline. Subscribing yields once
    /// first, as a network round trip would.
    #[derive(Default)]
    struct SwitchableDatastore {
        inner: MemoryDatastore,
        offline: AtomicBool,
    }

    impl SwitchableDatastore {
        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), DatastoreError> {
            if self.offline.load(Ordering::SeqCst) {
                Err(DatastoreError::ConnectionUnavailable("offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Datastore for SwitchableDatastore {
        fn backend_type(&self) -> DatastoreBackend {
            DatastoreBackend::Memory
        }

        async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DatastoreError> {
            self.check()?;
            self.inner.hget(key, field).await
        }

        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DatastoreError> {
            self.check()?;
            self.inner.hset(key, field, value).await
        }

        async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.hsetnx(key, field, value).await
        }

        async fn hdel(&self, key: &str, field: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.hdel(key, field).await
        }

        async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64, DatastoreError> {
            self.check()?;
            self.inner.hincrby(key, field, increment).await
        }

        async fn sadd(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.sadd(key, member).await
        }

        async fn srem(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.srem(key, member).await
        }

        async fn sismember(&self, key: &str, member: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.sismember(key, member).await
        }

        async fn smembers(&self, key: &str) -> Result<HashSet<String>, DatastoreError> {
            self.check()?;
            self.inner.smembers(key).await
        }

        async fn del(&self, key: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.del(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, DatastoreError> {
            self.check()?;
            self.inner.exists(key).await
        }

        async fn exec_atomic(&self, commands: Vec<Command>) -> Result<(), DatastoreError> {
            self.check()?;
            self.inner.exec_atomic(commands).await
        }

        async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, DatastoreError> {
            self.check()?;
            self.inner.publish(channel, payload).await
        }

        async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, DatastoreError> {
            tokio::task::yield_now().await;
            self.check()?;
            self.inner.psubscribe(pattern).await
        }
    }

    fn switchable() -> Arc<SwitchableDatastore> {
        Arc::new(SwitchableDatastore::default())
    }

    fn store_with(datastore: &Arc<SwitchableDatastore>) -> Arc<Store> {
        Store::new(StoreConfig::with_namespace("ns"), datastore.clone()).unwrap()
    }

    fn is_unavailable<T>(result: Result<T, StoreError>) -> bool {
        matches!(result, Err(StoreError::DatastoreUnavailable(_)))
    }

    #[tokio::test]
    async fn test_overlapping_starts_deliver_once() {
        let datastore = switchable();
        let node_a = store_with(&datastore);
        let node_b = store_with(&datastore);
        assert_ok!(node_a.start().await);

        let (first, second) = tokio::join!(node_b.start(), node_b.start());
        assert_ok!(first);
        assert_ok!(second);

        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        node_b.subscribe("message:x", move |_: &BusEvent| *counter.lock() += 1);

        assert_ok!(node_a.message("x", json!("hi")).await);
        eventually(|| *count.lock() >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*count.lock(), 1);

        // No receive loop may outlive shutdown
        node_b.shutdown().await;
        assert_ok!(node_a.message("x", json!("late")).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*count.lock(), 1);

        node_a.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_while_datastore_offline() {
        let datastore = switchable();
        let store = store_with(&datastore);

        datastore.set_offline(true);
        assert!(is_unavailable(store.start().await));
        assert!(!store.is_running());

        datastore.set_offline(false);
        assert_ok!(store.start().await);
        assert!(store.is_running());
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_surface_datastore_errors() {
        let datastore = switchable();
        let store = store_with(&datastore);
        let id = assert_ok!(store.handshake().await);

        datastore.set_offline(true);

        assert!(is_unavailable(store.handshake().await));
        assert!(is_unavailable(store.join(&id, "lobby").await));
        assert!(is_unavailable(store.disconnect(&id, false, "bye").await));
        assert!(is_unavailable(store.message(&id, json!(1)).await));
        assert!(is_unavailable(store.is_handshaken(&id).await));
    }

    #[tokio::test]
    async fn test_failed_client_creation_keeps_local_state() {
        let datastore = switchable();
        let store = store_with(&datastore);

        datastore.set_offline(true);
        assert!(is_unavailable(store.client("x").await));

        assert_eq!(store.local_client_count(), 0);
        assert!(!store.has_local_client("x"));
        assert_eq!(store.bus().listener_count("message:x"), 0);
        assert_eq!(store.bus().listener_count("disconnect:x"), 0);
    }

    #[tokio::test]
    async fn test_store_recovers_with_datastore() {
        let datastore = switchable();
        let store = store_with(&datastore);
        let id = assert_ok!(store.handshake().await);
        let existing = assert_ok!(store.client(&id).await);

        datastore.set_offline(true);
        assert_err!(store.client("other").await);
        assert_err!(store.disconnect(&id, false, "bye").await);
        datastore.set_offline(false);

        // The failed disconnect removed nothing
        assert!(assert_ok!(store.is_handshaken(&id).await));
        assert!(Arc::ptr_eq(&existing, &assert_ok!(store.client(&id).await)));
        assert!(!existing.is_destroyed());

        let other = assert_ok!(store.client("other").await);
        assert_ok!(store.join("other", "lobby").await);
        assert_eq!(
            assert_ok!(store.clients("lobby").await),
            HashSet::from(["other".to_string()])
        );
        assert_eq!(store.local_client_count(), 2);
        assert!(!other.is_destroyed());
    }
}
