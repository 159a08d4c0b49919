use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Idle-based liveness heartbeat.
///
/// After `ping_idle_ms` without inbound traffic the monitor sends
/// `ping_payload` through the connection; if the silence reaches
/// `close_idle_ms` the connection is force-closed. `ping_idle_ms` must be
/// strictly less than `close_idle_ms`, otherwise the heartbeat disables
/// itself.
///
/// The payload is plain JSON so it can live in configuration; it is
/// converted into the stream's outbound type and checked against the send
/// schema once, when the stream is built (see `PingFrame`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatOptions {
    pub ping_idle_ms: u64,
    pub close_idle_ms: u64,

    /// Sampling period of the monitor.
    /// Default: 1000ms
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    pub ping_payload: serde_json::Value,
}

fn default_tick_ms() -> u64 {
    1000
}

impl HeartbeatOptions {
    pub fn new(ping_idle_ms: u64, close_idle_ms: u64, ping_payload: serde_json::Value) -> Self {
        Self {
            ping_idle_ms,
            close_idle_ms,
            tick_ms: default_tick_ms(),
            ping_payload,
        }
    }

    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Thresholds are usable only when the ping fires before the close.
    pub fn is_valid(&self) -> bool {
        self.ping_idle_ms < self.close_idle_ms
    }

    pub fn ping_idle(&self) -> Duration {
        Duration::from_millis(self.ping_idle_ms)
    }

    pub fn close_idle(&self) -> Duration {
        Duration::from_millis(self.close_idle_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}
