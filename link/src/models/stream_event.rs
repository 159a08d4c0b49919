use std::fmt;

use crate::connection::ConnectionHandle;
use crate::event_handlers::DisconnectReason;

/// Lifecycle and data events of a reconnecting message stream, in the order
/// the conditions became true.
#[derive(Debug, Clone)]
pub enum StreamEvent<R, S> {
    /// Top of a loop iteration: not yet eligible to attempt a connection.
    Offline,
    /// The presence gate is open and a connection attempt has started.
    Connecting,
    /// Handshake succeeded. The handle is scoped to this connection: sends
    /// through it are dropped once this connection ends, and
    /// [`ConnectionHandle::reconnect`] only ever closes this connection.
    Connected(ConnectionHandle<S>),
    /// One validated inbound value.
    Message(R),
    /// The current connection attempt ended, successfully opened or not.
    Disconnected(DisconnectReason),
}

/// Payload-free discriminant of [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    Offline,
    Connecting,
    Connected,
    Message,
    Disconnected,
}

impl<R, S> StreamEvent<R, S> {
    pub fn kind(&self) -> StreamEventKind {
        match self {
            StreamEvent::Offline => StreamEventKind::Offline,
            StreamEvent::Connecting => StreamEventKind::Connecting,
            StreamEvent::Connected(_) => StreamEventKind::Connected,
            StreamEvent::Message(_) => StreamEventKind::Message,
            StreamEvent::Disconnected(_) => StreamEventKind::Disconnected,
        }
    }

    /// The inbound value, if this is a `Message`.
    pub fn into_message(self) -> Option<R> {
        match self {
            StreamEvent::Message(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamEventKind::Offline => "offline",
            StreamEventKind::Connecting => "connecting",
            StreamEventKind::Connected => "connected",
            StreamEventKind::Message => "message",
            StreamEventKind::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
