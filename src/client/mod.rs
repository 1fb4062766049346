//! Per-connection client handles with buffered, pausable delivery.

mod handle;
mod sink;

pub use handle::ClientHandle;
pub use sink::{ChannelSink, ClientSink, Delivery};
