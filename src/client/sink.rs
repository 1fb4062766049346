//! Where a flowing client handle writes its messages.

use serde_json::Value;
use tokio::sync::mpsc;

/// What a sink receives from a client handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Everything buffered while paused, oldest first
    Batch(Vec<Value>),
    /// One message published while flowing
    Single(Value),
}

impl Delivery {
    pub fn len(&self) -> usize {
        match self {
            Delivery::Batch(messages) => messages.len(),
            Delivery::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_messages(self) -> Vec<Value> {
        match self {
            Delivery::Batch(messages) => messages,
            Delivery::Single(message) => vec![message],
        }
    }
}

/// Consumer attached by the framing layer when its transport can write.
///
/// Called synchronously while the handle is locked: implementations must
/// not block and must not call back into the same handle.
pub trait ClientSink: Send {
    fn deliver(&mut self, delivery: Delivery);
}

impl<F> ClientSink for F
where
    F: FnMut(Delivery) + Send,
{
    fn deliver(&mut self, delivery: Delivery) {
        self(delivery)
    }
}

/// Sink forwarding deliveries to an async writer task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { tx }
    }

    /// A sink together with the receiving end for the writer task.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ClientSink for ChannelSink {
    fn deliver(&mut self, delivery: Delivery) {
        let count = delivery.len();
        if self.tx.send(delivery).is_err() {
            tracing::debug!(messages = count, "Client writer gone, dropping delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivery_messages() {
        let batch = Delivery::Batch(vec![json!(1), json!(2)]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.into_messages(), vec![json!(1), json!(2)]);

        let single = Delivery::Single(json!("x"));
        assert_eq!(single.len(), 1);
        assert!(!single.is_empty());
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |delivery: Delivery| seen.extend(delivery.into_messages());
            sink.deliver(Delivery::Single(json!("a")));
        }
        assert_eq!(seen, vec![json!("a")]);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (mut sink, mut rx) = ChannelSink::pair();
        sink.deliver(Delivery::Single(json!({"type": "ping"})));

        assert_eq!(
            rx.recv().await,
            Some(Delivery::Single(json!({"type": "ping"})))
        );
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (mut sink, rx) = ChannelSink::pair();
        drop(rx);
        sink.deliver(Delivery::Single(json!(1)));
    }
}
