//! Idle-based liveness heartbeat.
//!
//! A periodic tick compares the time since the last inbound activity with
//! two thresholds: past `ping_idle` a ping payload is sent once, past
//! `close_idle` (with the ping still unanswered by any traffic) the
//! connection is force-closed. Any inbound message counts as activity.

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::event_handlers::DisconnectReason;
use crate::models::HeartbeatOptions;
use crate::schema::Schema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    AwaitingTraffic,
    PingSent,
}

/// A ping checked against the send schema and serialized once, so every
/// connection of a stream sends the same frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    text: String,
}

impl PingFrame {
    /// Ping from a typed outbound value.
    pub fn new<S: Serialize>(send_schema: &Schema<S>, ping: &S) -> Result<Self> {
        send_schema.check(ping)?;
        Ok(Self {
            text: serde_json::to_string(ping)?,
        })
    }

    /// Ping from `options.ping_payload`, converted into the outbound type
    /// first.
    pub fn from_options<S>(send_schema: &Schema<S>, options: &HeartbeatOptions) -> Result<Self>
    where
        S: Serialize + DeserializeOwned,
    {
        let ping = send_schema.parse_value(options.ping_payload.clone())?;
        Self::new(send_schema, &ping)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

struct Activity {
    last: Instant,
    mode: HeartbeatMode,
}

struct Thresholds {
    ping_idle: Duration,
    close_idle: Duration,
    tick: Duration,
}

/// Heartbeat attached to one connection. Stops when that connection
/// closes or when the monitor is dropped.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    activity: Arc<Mutex<Activity>>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("idle", &self.last.elapsed())
            .field("mode", &self.mode)
            .finish()
    }
}

fn lock(activity: &Mutex<Activity>) -> MutexGuard<'_, Activity> {
    activity.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HeartbeatMonitor {
    /// Start monitoring `connection`.
    ///
    /// Returns `None` (after logging) when `ping_idle_ms >= close_idle_ms`;
    /// the connection itself is unaffected.
    pub fn start<S: 'static>(
        connection: &ConnectionHandle<S>,
        options: &HeartbeatOptions,
        ping: PingFrame,
    ) -> Option<Self> {
        if !options.is_valid() {
            log::error!(
                "[relay-link] Heartbeat disabled: ping_idle_ms ({}) must be less than close_idle_ms ({})",
                options.ping_idle_ms,
                options.close_idle_ms
            );
            return None;
        }

        let activity = Arc::new(Mutex::new(Activity {
            last: Instant::now(),
            mode: HeartbeatMode::AwaitingTraffic,
        }));
        let thresholds = Thresholds {
            ping_idle: options.ping_idle(),
            close_idle: options.close_idle(),
            tick: options.tick(),
        };
        let task = tokio::spawn(monitor_task(
            connection.clone(),
            ping,
            thresholds,
            activity.clone(),
        ));

        Some(Self { activity, task })
    }

    /// Inbound traffic arrived: reset the idle clock and the mode.
    pub fn record_activity(&self) {
        let mut activity = lock(&self.activity);
        activity.last = Instant::now();
        activity.mode = HeartbeatMode::AwaitingTraffic;
    }

    pub fn mode(&self) -> HeartbeatMode {
        lock(&self.activity).mode
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Action {
    Idle,
    Ping(Duration),
    Close(Duration),
}

async fn monitor_task<S>(
    connection: ConnectionHandle<S>,
    ping: PingFrame,
    thresholds: Thresholds,
    activity: Arc<Mutex<Activity>>,
) {
    let mut ticker = tokio::time::interval(thresholds.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = connection.cancellation().cancelled() => break,

            _ = ticker.tick() => {
                let action = {
                    let mut activity = lock(&activity);
                    let idle = activity.last.elapsed();
                    match activity.mode {
                        HeartbeatMode::AwaitingTraffic if idle > thresholds.ping_idle => {
                            activity.mode = HeartbeatMode::PingSent;
                            Action::Ping(idle)
                        },
                        HeartbeatMode::PingSent if idle > thresholds.close_idle => Action::Close(idle),
                        _ => Action::Idle,
                    }
                };

                match action {
                    Action::Idle => {},
                    Action::Ping(idle) => {
                        log::debug!("[relay-link] Heartbeat: idle for {:?}, sending ping", idle);
                        connection.send_frame(ping.text.clone());
                    },
                    Action::Close(idle) => {
                        log::warn!(
                            "[relay-link] Heartbeat: no traffic for {:?}, treating connection as dead",
                            idle
                        );
                        connection.abort(DisconnectReason::new(format!(
                            "Heartbeat timeout ({:?} without traffic)",
                            idle
                        )));
                        break;
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ValidatedSocketConnection;
    use crate::error::LinkError;
    use crate::event_handlers::EventHandlers;
    use crate::models::ConnectionOptions;
    use crate::schema::{Schema, ValidationError};
    use crate::transport::{memory_pair, MemoryPeer};
    use serde_json::json;
    use tokio::time::sleep;

    fn open() -> (ValidatedSocketConnection<String, String>, MemoryPeer) {
        let (socket, peer) = memory_pair();
        let conn = ValidatedSocketConnection::adopt(
            socket,
            &ConnectionOptions::new("ws://test.invalid/"),
            Schema::any(),
            Schema::any(),
            EventHandlers::new(),
        );
        (conn, peer)
    }

    fn options() -> HeartbeatOptions {
        HeartbeatOptions::new(300, 600, json!("ping")).with_tick_ms(100)
    }

    fn ping() -> PingFrame {
        PingFrame::from_options(&Schema::<String>::any(), &options()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_then_close_when_silent() {
        let (conn, mut peer) = open();
        let monitor = HeartbeatMonitor::start(&conn.handle(), &options(), ping()).unwrap();

        sleep(Duration::from_millis(350)).await;
        assert!(peer.try_recv().is_none());
        assert_eq!(monitor.mode(), HeartbeatMode::AwaitingTraffic);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(peer.try_recv().as_deref(), Some("\"ping\""));
        assert_eq!(monitor.mode(), HeartbeatMode::PingSent);

        sleep(Duration::from_millis(200)).await;
        assert!(!conn.is_closed());
        assert!(peer.try_recv().is_none(), "ping is sent once per idle period");

        sleep(Duration::from_millis(100)).await;
        assert!(conn.is_closed());
        let reason = conn.disconnect_reason().unwrap();
        assert!(reason.message.starts_with("Heartbeat timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_both_timers() {
        let (conn, mut peer) = open();
        let monitor = HeartbeatMonitor::start(&conn.handle(), &options(), ping()).unwrap();

        sleep(Duration::from_millis(450)).await;
        assert_eq!(peer.try_recv().as_deref(), Some("\"ping\""));

        monitor.record_activity();
        assert_eq!(monitor.mode(), HeartbeatMode::AwaitingTraffic);

        // 550ms after the reset: second ping sent, not yet closed.
        sleep(Duration::from_millis(550)).await;
        assert!(!conn.is_closed());
        assert_eq!(peer.try_recv().as_deref(), Some("\"ping\""));

        sleep(Duration::from_millis(200)).await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_misconfigured_thresholds_disable_monitor() {
        let (conn, _peer) = open();
        let equal = HeartbeatOptions::new(500, 500, json!("ping"));
        let inverted = HeartbeatOptions::new(900, 500, json!("ping"));
        assert!(HeartbeatMonitor::start(&conn.handle(), &equal, ping()).is_none());
        assert!(HeartbeatMonitor::start(&conn.handle(), &inverted, ping()).is_none());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_ping_frame_is_checked_against_send_schema() {
        let no_pings = Schema::new(|s: &String| {
            if s == "ping" {
                Err(ValidationError::new("pings not allowed"))
            } else {
                Ok(())
            }
        });
        assert!(matches!(
            PingFrame::from_options(&no_pings, &options()),
            Err(LinkError::ValidationError(_))
        ));

        let wrong_type = HeartbeatOptions::new(1, 2, json!({"op": "ping"}));
        assert!(PingFrame::from_options(&Schema::<String>::any(), &wrong_type).is_err());

        let typed = PingFrame::new(&no_pings, &"keepalive".to_string()).unwrap();
        assert_eq!(typed.as_str(), "\"keepalive\"");
    }

    #[derive(Serialize)]
    struct OutboundOnly {
        op: &'static str,
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialize_only_outbound_type_gets_a_heartbeat() {
        let (socket, mut peer) = memory_pair();
        let conn = ValidatedSocketConnection::<String, OutboundOnly>::adopt(
            socket,
            &ConnectionOptions::new("ws://test.invalid/"),
            Schema::any(),
            Schema::any(),
            EventHandlers::new(),
        );
        let ping = PingFrame::new(&Schema::any(), &OutboundOnly { op: "ping" }).unwrap();
        let _monitor = HeartbeatMonitor::start(&conn.handle(), &options(), ping).unwrap();

        sleep(Duration::from_millis(450)).await;
        assert_eq!(peer.try_recv().as_deref(), Some(r#"{"op":"ping"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_with_connection() {
        let (conn, _peer) = open();
        let monitor = HeartbeatMonitor::start(&conn.handle(), &options(), ping()).unwrap();
        assert!(monitor.is_running());

        conn.close();
        sleep(Duration::from_millis(10)).await;
        assert!(!monitor.is_running());
    }
}
