use serde_json::json;
use std::time::Duration;

use super::*;
use crate::timeouts::LinkTimeouts;

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_defaults() {
    let opts = ConnectionOptions::new("ws://localhost:9000/ws");

    assert_eq!(opts.connection_timeout_ms, 10_000);
    assert_eq!(opts.reconnect_delay_ms, 3_000);
    assert!(opts.heartbeat.is_none(), "heartbeat should be opt-in");
    assert!(!opts.headless_online, "headless presence should default to offline");
    assert_eq!(opts.max_text_frame_bytes, 64 << 20);
}

#[test]
fn test_connection_options_deserialize_minimal() {
    let opts: ConnectionOptions =
        serde_json::from_value(json!({ "url": "wss://example.com/live" })).unwrap();
    assert_eq!(opts, ConnectionOptions::new("wss://example.com/live"));
}

#[test]
fn test_connection_options_deserialize_full() {
    let opts: ConnectionOptions = serde_json::from_value(json!({
        "url": "wss://example.com/live",
        "protocol": "chat.v1",
        "reconnect_delay_ms": 250,
        "headless_online": true,
        "heartbeat": {
            "ping_idle_ms": 5000,
            "close_idle_ms": 9000,
            "ping_payload": { "type": "ping" }
        }
    }))
    .unwrap();

    assert_eq!(opts.protocol.as_deref(), Some("chat.v1"));
    assert_eq!(opts.reconnect_delay_ms, 250);
    assert!(opts.headless_online);
    let heartbeat = opts.heartbeat.unwrap();
    assert_eq!(heartbeat.tick_ms, 1000, "tick should default to one second");
    assert_eq!(heartbeat.ping_payload, json!({ "type": "ping" }));
}

#[test]
fn test_connection_options_timeouts_round_trip() {
    let opts = ConnectionOptions::new("ws://localhost:1")
        .with_heartbeat(HeartbeatOptions::new(100, 200, json!("ping")))
        .with_timeouts(&LinkTimeouts::fast());
    let timeouts = opts.timeouts();

    assert_eq!(timeouts, LinkTimeouts::fast());
    assert_eq!(opts.heartbeat.unwrap().tick_ms, 250);
}

#[test]
fn test_connection_options_timeouts_without_heartbeat() {
    let timeouts = ConnectionOptions::new("ws://localhost:1")
        .with_reconnect_delay_ms(50)
        .timeouts();
    assert_eq!(timeouts.reconnect_delay, Duration::from_millis(50));
    assert_eq!(timeouts.heartbeat_tick, Duration::from_secs(1));
}

#[test]
fn test_validate_accepts_ws_schemes() {
    assert!(ConnectionOptions::new("ws://localhost:8080/ws").validate().is_ok());
    assert!(ConnectionOptions::new("wss://example.com").validate().is_ok());
}

#[test]
fn test_validate_rejects_bad_urls() {
    assert!(ConnectionOptions::default().validate().is_err());
    assert!(ConnectionOptions::new("http://example.com").validate().is_err());
    assert!(ConnectionOptions::new("not a url").validate().is_err());
}

#[test]
fn test_validate_rejects_protocol_lists() {
    let opts = ConnectionOptions::new("ws://localhost:1").with_protocol("a, b");
    assert!(opts.validate().is_err());
}

// ==================== HeartbeatOptions Tests ====================

#[test]
fn test_heartbeat_thresholds() {
    assert!(HeartbeatOptions::new(1000, 2000, json!(null)).is_valid());
    assert!(!HeartbeatOptions::new(2000, 2000, json!(null)).is_valid());
    assert!(!HeartbeatOptions::new(3000, 2000, json!(null)).is_valid());
}

#[test]
fn test_heartbeat_zero_tick_is_clamped() {
    let heartbeat = HeartbeatOptions::new(1, 2, json!(null)).with_tick_ms(0);
    assert_eq!(heartbeat.tick(), Duration::from_millis(1));
}

// ==================== StreamEvent Tests ====================

#[cfg(not(target_arch = "wasm32"))]
#[test]
fn test_stream_event_kind_and_display() {
    let event: StreamEvent<String, String> = StreamEvent::Message("hi".to_string());
    assert_eq!(event.kind(), StreamEventKind::Message);
    assert_eq!(event.into_message().as_deref(), Some("hi"));

    let offline: StreamEvent<String, String> = StreamEvent::Offline;
    assert_eq!(offline.kind().to_string(), "offline");
    assert!(offline.into_message().is_none());
}
