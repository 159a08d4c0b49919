//! Self-healing message stream.
//!
//! [`ReconnectingMessageStream`] runs one background loop that, until it is
//! closed, waits for the presence gate, opens a [`ValidatedSocketConnection`],
//! forwards outbound commands to it, wires a heartbeat and relays every
//! validated inbound value. Each loop iteration owns exactly one connection
//! attempt. Everything the caller observes arrives as an ordered sequence
//! of [`StreamEvent`]s:
//!
//! ```text
//! offline -> connecting -> connected -> message* -> disconnected -> offline -> ...
//!                      \-> disconnected (attempt failed)
//! ```
//!
//! Connection failures are retried forever after `reconnect_delay`; the
//! delay is cut short as soon as the presence gate goes offline.

use crate::buffered_stream::{BufferedStream, StreamReader};
use crate::connection::{ConnectionHandle, ValidatedSocketConnection};
use crate::error::Result;
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::heartbeat::{HeartbeatMonitor, PingFrame};
use crate::models::{ConnectionOptions, StreamEvent};
use crate::mux::OutboundMux;
use crate::presence::NetworkPresenceGate;
use crate::schema::Schema;
use crate::transport::{Connector, WebSocketConnector};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Caller requests fanned out to the live connection.
#[derive(Debug, Clone)]
pub(crate) enum OutboundCommand<S> {
    Send(S),
    Reconnect,
}

/// A reconnecting, validated, bidirectional message stream.
///
/// # Example
///
/// ```rust,no_run
/// use futures_util::StreamExt;
/// use relay_link::{ConnectionOptions, EventHandlers, ReconnectingMessageStream, Schema, StreamEvent};
///
/// # async fn run() -> relay_link::Result<()> {
/// let options = ConnectionOptions::new("wss://example.com/chat").with_headless_online(true);
/// let stream = ReconnectingMessageStream::<String, String>::websocket(
///     options,
///     Schema::any(),
///     Schema::any(),
///     EventHandlers::new(),
/// )?;
///
/// let mut events = stream.messages().expect("first reader");
/// while let Some(event) = events.next().await {
///     match event {
///         StreamEvent::Connected(conn) => {
///             conn.send(&"hello".to_string());
///         },
///         StreamEvent::Message(text) => println!("received: {}", text),
///         other => println!("{}", other.kind()),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ReconnectingMessageStream<R, S> {
    mux: OutboundMux<OutboundCommand<S>>,
    output: BufferedStream<StreamEvent<R, S>>,
    shutdown: CancellationToken,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    _task: JoinHandle<()>,
}

impl<R, S> fmt::Debug for ReconnectingMessageStream<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingMessageStream")
            .field("connected", &self.is_connected())
            .field("attempts", &self.attempts())
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<R, S> ReconnectingMessageStream<R, S>
where
    R: DeserializeOwned + Send + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Start the reconnect loop. Must be called inside a tokio runtime.
    ///
    /// Fails only when `options` are invalid; every later failure surfaces
    /// as a [`StreamEvent::Disconnected`]. A configured heartbeat whose
    /// `ping_payload` the send schema rejects is disabled.
    pub fn new<C: Connector>(
        connector: C,
        options: ConnectionOptions,
        gate: Arc<NetworkPresenceGate>,
        receive_schema: Schema<R>,
        send_schema: Schema<S>,
        handlers: EventHandlers,
    ) -> Result<Self> {
        let ping = options.heartbeat.as_ref().and_then(|heartbeat| {
            PingFrame::from_options(&send_schema, heartbeat)
                .map_err(|e| {
                    log::error!("[relay-link] Heartbeat disabled: ping payload rejected {}", e)
                })
                .ok()
        });
        Self::with_ping(connector, options, gate, receive_schema, send_schema, handlers, ping)
    }

    /// Reconnecting stream over real WebSockets, gated on a headless
    /// presence gate pinned to `options.headless_online`.
    pub fn websocket(
        options: ConnectionOptions,
        receive_schema: Schema<R>,
        send_schema: Schema<S>,
        handlers: EventHandlers,
    ) -> Result<Self> {
        let gate = Arc::new(NetworkPresenceGate::headless(options.headless_online));
        Self::new(WebSocketConnector::new(), options, gate, receive_schema, send_schema, handlers)
    }
}

impl<R, S> ReconnectingMessageStream<R, S>
where
    R: DeserializeOwned + Send + 'static,
    S: Serialize + Send + 'static,
{
    /// Like [`new`](Self::new) with the heartbeat ping given directly, for
    /// outbound types that cannot be built from `ping_payload`. The
    /// heartbeat runs only when both `options.heartbeat` and `ping` are set.
    pub fn with_ping<C: Connector>(
        connector: C,
        options: ConnectionOptions,
        gate: Arc<NetworkPresenceGate>,
        receive_schema: Schema<R>,
        send_schema: Schema<S>,
        handlers: EventHandlers,
        ping: Option<PingFrame>,
    ) -> Result<Self> {
        options.validate()?;

        let mux = OutboundMux::new();
        let output = BufferedStream::new();
        let shutdown = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicU32::new(0));

        // A consumer that stops reading stops the loop.
        let shutdown_on_close = shutdown.clone();
        output.on_close(move || shutdown_on_close.cancel());

        let reconnect_loop = ReconnectLoop {
            connector,
            retry_delay: options.timeouts().reconnect_delay,
            options,
            ping,
            gate,
            receive_schema,
            send_schema,
            handlers,
            mux: mux.clone(),
            output: output.clone(),
            shutdown: shutdown.clone(),
            connected: connected.clone(),
            attempts: attempts.clone(),
        };
        let task = tokio::spawn(async move { reconnect_loop.run().await });

        Ok(Self {
            mux,
            output,
            shutdown,
            connected,
            attempts,
            _task: task,
        })
    }
}

impl<R, S> ReconnectingMessageStream<R, S> {
    /// Queue `value` on the live connection.
    ///
    /// Returns `false` when no connection is live; the value is dropped,
    /// not kept for the next connection.
    pub fn send(&self, value: S) -> bool {
        let delivered = self.mux.emit(&OutboundCommand::Send(value)) > 0;
        if !delivered {
            log::debug!("[relay-link] No live connection, outbound message dropped");
        }
        delivered
    }

    /// Force-close the live connection; the loop retries after the delay.
    pub fn reconnect(&self) {
        if self.mux.emit(&OutboundCommand::Reconnect) == 0 {
            log::debug!("[relay-link] Reconnect requested with no live connection");
        }
    }

    /// The event sequence. Only the first call returns a reader; dropping
    /// it stops the loop.
    pub fn messages(&self) -> Option<StreamReader<StreamEvent<R, S>>> {
        self.output.reader()
    }

    /// Stop the loop permanently. Closes the live connection and ends the
    /// event sequence after the events already emitted. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            log::debug!("[relay-link] Closing reconnecting message stream");
        }
        self.shutdown.cancel();
        self.output.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// True between `Connected` and the matching `Disconnected`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<R, S> Drop for ReconnectingMessageStream<R, S> {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReconnectLoop<C, R, S> {
    connector: C,
    options: ConnectionOptions,
    ping: Option<PingFrame>,
    retry_delay: Duration,
    gate: Arc<NetworkPresenceGate>,
    receive_schema: Schema<R>,
    send_schema: Schema<S>,
    handlers: EventHandlers,
    mux: OutboundMux<OutboundCommand<S>>,
    output: BufferedStream<StreamEvent<R, S>>,
    shutdown: CancellationToken,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

impl<C, R, S> ReconnectLoop<C, R, S>
where
    C: Connector,
    R: DeserializeOwned + Send + 'static,
    S: Serialize + Send + 'static,
{
    fn emit(&self, event: StreamEvent<R, S>) {
        if !self.output.push(event) {
            log::debug!("[relay-link] Event stream closed, event dropped");
        }
    }

    async fn run(self) {
        while !self.shutdown.is_cancelled() {
            self.emit(StreamEvent::Offline);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.gate.wait_for(true) => {},
            }

            self.emit(StreamEvent::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            log::debug!("[relay-link] Connection attempt {} to {}", attempt, self.options.url);

            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = ValidatedSocketConnection::connect(
                    &self.connector,
                    &self.options,
                    self.receive_schema.clone(),
                    self.send_schema.clone(),
                    self.handlers.clone(),
                ) => result,
            };

            match result {
                Ok(connection) => self.run_connection(connection).await,
                Err(e) => {
                    self.handlers.emit_error(ConnectionError::new(
                        format!("Connection attempt {} failed: {}", attempt, e),
                        true,
                    ));
                    self.emit(StreamEvent::Disconnected(DisconnectReason::new(e.to_string())));
                },
            }

            if !self.wait_before_retry().await {
                break;
            }
        }

        self.output.close();
        log::debug!("[relay-link] Reconnect loop stopped");
    }

    /// One connection epoch: wire it up, relay inbound values until it
    /// ends, tear the wiring down, report the disconnect.
    async fn run_connection(&self, connection: ValidatedSocketConnection<R, S>) {
        let handle = connection.handle();
        let Some(mut inbound) = connection.take_inbound() else {
            let reason = DisconnectReason::new("Inbound stream already taken");
            log::warn!("[relay-link] Closing connection: {}", reason);
            handle.abort(reason.clone());
            self.emit(StreamEvent::Disconnected(reason));
            return;
        };

        let subscription = self.mux.subscribe(forward_to(handle.clone()));
        let heartbeat = match (&self.options.heartbeat, &self.ping) {
            (Some(options), Some(ping)) => {
                HeartbeatMonitor::start(&handle, options, ping.clone())
            },
            _ => None,
        };

        self.connected.store(true, Ordering::SeqCst);
        self.handlers.emit_connect();
        self.emit(StreamEvent::Connected(handle.clone()));

        let offline = self.gate.wait_for(false);
        tokio::pin!(offline);
        let mut offline_seen = false;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    handle.close();
                    break;
                }

                _ = &mut offline, if !offline_seen => {
                    offline_seen = true;
                    log::info!("[relay-link] Network went offline, closing connection");
                    handle.abort(DisconnectReason::new("Network offline"));
                }

                next = inbound.next() => match next {
                    Some(value) => {
                        if let Some(heartbeat) = &heartbeat {
                            heartbeat.record_activity();
                        }
                        self.emit(StreamEvent::Message(value));
                    },
                    None => break,
                },
            }
        }

        drop(subscription);
        drop(heartbeat);
        self.connected.store(false, Ordering::SeqCst);

        let reason = handle
            .disconnect_reason()
            .unwrap_or_else(|| DisconnectReason::new("Connection closed"));
        log::debug!("[relay-link] Disconnected: {}", reason);
        self.emit(StreamEvent::Disconnected(reason));
    }

    /// Sleep up to the retry delay, returning early if the gate goes
    /// offline. Returns `false` on shutdown.
    async fn wait_before_retry(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = self.gate.wait_for(false) => {
                log::debug!("[relay-link] Offline, skipping remaining retry delay");
                true
            },
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }
}

fn forward_to<S: Serialize + 'static>(
    handle: ConnectionHandle<S>,
) -> impl Fn(&OutboundCommand<S>) + Send + Sync + 'static {
    move |command| match command {
        OutboundCommand::Send(value) => {
            handle.send(value);
        },
        OutboundCommand::Reconnect => handle.reconnect(),
    }
}
