//! Error types for relay-link.

use crate::schema::ValidationError;
use thiserror::Error;

/// Result type for relay-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors surfaced by relay-link.
///
/// None of these escape the background reconnect loop: connect failures are
/// reported as `Disconnected` events and validation failures are logged and
/// dropped. They are returned directly only by the lower-level building
/// blocks (`ValidatedSocketConnection::connect`, `Connector`, option
/// validation).
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation failed {0}")]
    ValidationError(ValidationError),

    #[error("Connection closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,
}

impl LinkError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LinkError::WebSocketError(_) | LinkError::TimeoutError(_) | LinkError::Closed
        )
    }
}

impl From<ValidationError> for LinkError {
    fn from(err: ValidationError) -> Self {
        LinkError::ValidationError(err)
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::WebSocketError(err.to_string())
    }
}
