//! Data models for relay-link.
//!
//! Connection configuration and the lifecycle events emitted by
//! [`ReconnectingMessageStream`](crate::ReconnectingMessageStream).

pub mod connection_options;
pub mod heartbeat_options;
#[cfg(not(target_arch = "wasm32"))]
pub mod stream_event;

#[cfg(test)]
mod tests;

pub use connection_options::ConnectionOptions;
pub use heartbeat_options::HeartbeatOptions;
#[cfg(not(target_arch = "wasm32"))]
pub use stream_event::{StreamEvent, StreamEventKind};
