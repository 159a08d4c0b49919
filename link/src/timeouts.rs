//! Timeout configuration for relay-link.
//!
//! Centralizes the timers of the link: how long a connection attempt may
//! take, how long to wait before retrying, and how often the heartbeat
//! monitor samples connection activity.

use std::time::Duration;

/// Timer configuration.
///
/// # Examples
///
/// ```rust
/// use relay_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults
/// let timeouts = LinkTimeouts::default();
///
/// // Custom
/// let timeouts = LinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(60))
///     .reconnect_delay_secs(10)
///     .build();
///
/// // Tight timers for local development
/// let timeouts = LinkTimeouts::fast();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Time allowed from starting a connection attempt until the socket
    /// reports open. Zero disables the timeout.
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Upper bound of the pause between one connection ending and the next
    /// attempt. Cut short when the presence gate goes offline.
    /// Default: 3 seconds
    pub reconnect_delay: Duration,

    /// Sampling period of the heartbeat monitor.
    /// Default: 1 second
    pub heartbeat_tick: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
            heartbeat_tick: Duration::from_secs(1),
        }
    }
}

impl LinkTimeouts {
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Short timers suitable for localhost.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(500),
            heartbeat_tick: Duration::from_millis(250),
        }
    }

    /// Long timers for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(10),
            heartbeat_tick: Duration::from_secs(1),
        }
    }

    /// Timers for tests driving scripted connections.
    pub fn for_testing(reconnect_delay_ms: u64) -> Self {
        Self {
            connection_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            heartbeat_tick: Duration::from_millis(100),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365) // > 1 year
    }
}

/// Builder for [`LinkTimeouts`].
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.timeouts.reconnect_delay = delay;
        self
    }

    pub fn reconnect_delay_secs(self, secs: u64) -> Self {
        self.reconnect_delay(Duration::from_secs(secs))
    }

    /// Set the heartbeat sampling period. A zero period is replaced by 1ms
    /// when the monitor starts.
    pub fn heartbeat_tick(mut self, tick: Duration) -> Self {
        self.timeouts.heartbeat_tick = tick;
        self
    }

    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}
