//! # relay-link
//!
//! Resilient, validated, bidirectional JSON message streams over WebSockets.
//!
//! ## Features
//!
//! - **Reconnecting stream**: one long-lived sequence of lifecycle and data
//!   events that survives any number of reconnects
//! - **Schema validation**: every inbound frame and outbound value is checked;
//!   bad frames are dropped without closing the connection
//! - **Presence gating**: no connection attempts while the host is offline or
//!   hidden
//! - **Liveness heartbeat**: idle ping and forced close of silent connections
//! - **Backpressure signal**: buffered streams report their backlog
//!
//! ## Targets
//!
//! The connection, heartbeat and reconnect loop run on a tokio runtime and
//! are not built for `wasm32`. There the crate provides the runtime-free
//! parts: schemas, buffered streams, the outbound mux and the presence gate,
//! with `BrowserPresence` feeding it under the `wasm` feature.
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use relay_link::{
//!     ConnectionOptions, EventHandlers, HeartbeatOptions, ReconnectingMessageStream, Schema,
//!     StreamEvent, ValidationError,
//! };
//!
//! # async fn example() -> relay_link::Result<()> {
//! let options = ConnectionOptions::new("wss://example.com/feed")
//!     .with_headless_online(true)
//!     .with_heartbeat(HeartbeatOptions::new(15_000, 30_000, serde_json::json!("ping")));
//!
//! let receive = Schema::<String>::new(|s| {
//!     if s.is_empty() {
//!         Err(ValidationError::new("empty message"))
//!     } else {
//!         Ok(())
//!     }
//! });
//!
//! let stream = ReconnectingMessageStream::<String, String>::websocket(
//!     options,
//!     receive,
//!     Schema::any(),
//!     EventHandlers::new().on_disconnect(|reason| eprintln!("lost connection: {}", reason)),
//! )?;
//!
//! let mut events = stream.messages().expect("events already taken");
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::Message(text) = event {
//!         println!("{}", text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffered_stream;
#[cfg(not(target_arch = "wasm32"))]
pub mod connection;
pub mod error;
pub mod event_handlers;
#[cfg(not(target_arch = "wasm32"))]
pub mod heartbeat;
pub mod models;
pub mod mux;
pub mod presence;
#[cfg(not(target_arch = "wasm32"))]
pub mod reconnect;
pub mod schema;
pub mod timeouts;
pub mod transport;

pub use buffered_stream::{BufferedStream, StreamReader};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{ConnectionOptions, HeartbeatOptions};
pub use mux::{MuxSubscription, OutboundMux};
pub use presence::{
    HeadlessPresence, NetworkPresenceGate, PresenceSink, PresenceSource, PresenceState,
};
pub use schema::{Schema, ValidationError};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use transport::{memory_pair, Connector, MemoryPeer, MemorySocket, Socket, TransportEvent};

#[cfg(not(target_arch = "wasm32"))]
pub use connection::{ConnectionHandle, ValidatedSocketConnection};
#[cfg(not(target_arch = "wasm32"))]
pub use heartbeat::{HeartbeatMode, HeartbeatMonitor, PingFrame};
#[cfg(not(target_arch = "wasm32"))]
pub use models::{StreamEvent, StreamEventKind};
#[cfg(not(target_arch = "wasm32"))]
pub use reconnect::ReconnectingMessageStream;
#[cfg(not(target_arch = "wasm32"))]
pub use transport::{WebSocketConnector, WebSocketSocket};

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub use presence::BrowserPresence;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
