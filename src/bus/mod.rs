//! Cross-process event bus over datastore pub/sub.

mod event_bus;
mod types;

pub use event_bus::EventBus;
pub use types::{BusEvent, Envelope, EventOrigin, Listener, ListenerId};
