use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a dispatched event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Published by this process
    Local,
    /// Received from another process through the datastore
    Remote,
}

/// Event handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Option<Value>,
    pub origin: EventOrigin,
}

/// Wire format of a bus publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Node id of the publishing process
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Handle returned by `subscribe`, used to remove that one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

pub type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;
