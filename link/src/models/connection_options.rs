use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::timeouts::LinkTimeouts;

use super::heartbeat_options::HeartbeatOptions;

/// Connection-level options for a reconnecting message stream.
///
/// Deserializable with per-field defaults, so only `url` is required in a
/// configuration file.
///
/// # Example
///
/// ```rust
/// use relay_link::{ConnectionOptions, HeartbeatOptions};
///
/// let options = ConnectionOptions::new("wss://example.com/socket")
///     .with_protocol("chat.v1")
///     .with_reconnect_delay_ms(2000)
///     .with_heartbeat(HeartbeatOptions::new(10_000, 20_000, serde_json::json!("ping")));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,

    /// Subprotocol offered during the handshake (`Sec-WebSocket-Protocol`).
    #[serde(default)]
    pub protocol: Option<String>,

    /// Time allowed for a connection attempt to open.
    /// Default: 10000ms. `0` disables the timeout.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Pause between a connection ending and the next attempt. Cut short
    /// when the presence gate goes offline.
    /// Default: 3000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Idle ping / liveness close. `None` disables the heartbeat.
    #[serde(default)]
    pub heartbeat: Option<HeartbeatOptions>,

    /// Presence state assumed when the host offers no presence signals.
    /// Default: `false` (never connect until a signal says otherwise).
    #[serde(default)]
    pub headless_online: bool,

    /// Inbound text frames larger than this are dropped like malformed frames.
    /// Default: 64 MiB
    #[serde(default = "default_max_text_frame_bytes")]
    pub max_text_frame_bytes: usize,
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_max_text_frame_bytes() -> usize {
    64 << 20
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocol: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat: None,
            headless_online: false,
            max_text_frame_bytes: default_max_text_frame_bytes(),
        }
    }
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = ms;
        self
    }

    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = ms;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatOptions) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn with_headless_online(mut self, online: bool) -> Self {
        self.headless_online = online;
        self
    }

    pub fn with_max_text_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_text_frame_bytes = bytes;
        self
    }

    /// Copy the connection timeout and reconnect delay from `timeouts`.
    /// The heartbeat tick is applied only when a heartbeat is configured.
    pub fn with_timeouts(mut self, timeouts: &LinkTimeouts) -> Self {
        self.connection_timeout_ms = timeouts.connection_timeout.as_millis() as u64;
        self.reconnect_delay_ms = timeouts.reconnect_delay.as_millis() as u64;
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.tick_ms = timeouts.heartbeat_tick.as_millis() as u64;
        }
        self
    }

    /// Timers derived from these options.
    pub fn timeouts(&self) -> LinkTimeouts {
        LinkTimeouts::builder()
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
            .heartbeat_tick(
                self.heartbeat
                    .as_ref()
                    .map(HeartbeatOptions::tick)
                    .unwrap_or(Duration::from_secs(1)),
            )
            .build()
    }

    /// Reject endpoints the WebSocket transport cannot dial.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(self.url.trim()).map_err(|e| {
            LinkError::ConfigurationError(format!("Invalid url '{}': {}", self.url, e))
        })?;

        match url.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(LinkError::ConfigurationError(format!(
                    "url must use ws:// or wss:// (found '{}')",
                    other
                )));
            },
        }

        if url.host_str().is_none() {
            return Err(LinkError::ConfigurationError("url must include a host".to_string()));
        }

        if let Some(protocol) = &self.protocol {
            if protocol.trim().is_empty() || protocol.contains(',') {
                return Err(LinkError::ConfigurationError(format!(
                    "protocol must be a single non-empty token (found '{}')",
                    protocol
                )));
            }
        }

        Ok(())
    }
}
