//! One physical socket with schema validation in both directions.
//!
//! A [`ValidatedSocketConnection`] is created in a connecting state, opens
//! on the transport's open signal and stays usable until the transport
//! ends or someone closes it. It never reopens; the reconnect loop makes a
//! new one for every attempt.
//!
//! A background task owns the socket and multiplexes three sources:
//!
//! - the connection's cancellation token (local close)
//! - outbound frames queued by [`ConnectionHandle::send`]
//! - inbound transport events
//!
//! Malformed or schema-rejected inbound frames are logged and dropped; the
//! connection stays open.

use crate::buffered_stream::{BufferedStream, StreamReader};
use crate::error::{LinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::ConnectionOptions;
use crate::schema::Schema;
use crate::timeouts::LinkTimeouts;
use crate::transport::{Connector, Socket, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type AbortListener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LifecycleState {
    closed: bool,
    reason: Option<DisconnectReason>,
    listeners: Vec<AbortListener>,
}

/// Terminal-transition bookkeeping shared by the task and every handle.
struct Lifecycle {
    cancel: CancellationToken,
    state: Mutex<LifecycleState>,
    handlers: EventHandlers,
}

impl Lifecycle {
    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// First call wins; later calls are no-ops.
    fn terminate(&self, reason: DisconnectReason) -> bool {
        let listeners = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        log::debug!("[relay-link] Connection closed: {}", reason);
        self.cancel.cancel();
        for listener in listeners {
            listener();
        }
        self.handlers.emit_disconnect(reason);
        true
    }

    fn on_abort(&self, listener: AbortListener) {
        {
            let mut state = self.lock();
            if !state.closed {
                state.listeners.push(listener);
                return;
            }
        }
        listener();
    }
}

/// Cloneable send/close capability bound to one connection.
///
/// Once that connection has ended, sends are dropped and
/// [`reconnect`](Self::reconnect) does nothing.
pub struct ConnectionHandle<S> {
    outbound: mpsc::UnboundedSender<String>,
    send_schema: Schema<S>,
    lifecycle: Arc<Lifecycle>,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            send_schema: self.send_schema.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<S> fmt::Debug for ConnectionHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionHandle<S> {
    /// Close this connection so the owning loop starts a new attempt.
    pub fn reconnect(&self) {
        self.abort(DisconnectReason::new("Reconnect requested"));
    }

    /// Close this connection. Idempotent.
    pub fn close(&self) {
        self.abort(DisconnectReason::with_code("Connection closed by client", 1000));
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Why the connection ended, once it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.lifecycle.lock().reason.clone()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        self.lifecycle.cancel.cancelled().await;
    }

    pub(crate) fn abort(&self, reason: DisconnectReason) -> bool {
        self.lifecycle.terminate(reason)
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.lifecycle.cancel
    }
}

impl<S: Serialize> ConnectionHandle<S> {
    /// Validate, serialize and queue one outbound value.
    ///
    /// Returns `false` when the value was dropped: the connection is closed,
    /// the send schema rejected it, or it failed to serialize. Never closes
    /// the connection.
    pub fn send(&self, value: &S) -> bool {
        let handlers = &self.lifecycle.handlers;
        if self.is_closed() {
            log::debug!("[relay-link] Dropping outbound message: connection closed");
            return false;
        }
        if let Err(e) = self.send_schema.check(value) {
            log::warn!("[relay-link] Dropping invalid outbound message {}", e);
            handlers.emit_error(ConnectionError::new(
                format!("Invalid outbound message {}", e),
                true,
            ));
            return false;
        }
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("[relay-link] Failed to serialize outbound message: {}", e);
                handlers.emit_error(ConnectionError::new(
                    format!("Failed to serialize outbound message: {}", e),
                    true,
                ));
                return false;
            },
        };
        self.send_frame(text)
    }
}

impl<S> ConnectionHandle<S> {
    /// Queue an already validated and serialized frame.
    pub(crate) fn send_frame(&self, text: String) -> bool {
        if self.is_closed() {
            log::debug!("[relay-link] Dropping outbound frame: connection closed");
            return false;
        }
        self.lifecycle.handlers.emit_send(&text);
        self.outbound.send(text).is_ok()
    }
}

/// One validated socket connection.
///
/// Dropping it closes the connection.
pub struct ValidatedSocketConnection<R, S> {
    handle: ConnectionHandle<S>,
    inbound: BufferedStream<R>,
    _task: JoinHandle<()>,
}

impl<R, S> fmt::Debug for ValidatedSocketConnection<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedSocketConnection")
            .field("closed", &self.is_closed())
            .field("inbound", &self.inbound)
            .finish()
    }
}

impl<R, S> ValidatedSocketConnection<R, S>
where
    R: DeserializeOwned + Send + 'static,
{
    /// Attempt one physical connection.
    ///
    /// Fails when the connector fails or the connection timeout elapses
    /// before the socket opens.
    pub async fn connect<C: Connector>(
        connector: &C,
        options: &ConnectionOptions,
        receive_schema: Schema<R>,
        send_schema: Schema<S>,
        handlers: EventHandlers,
    ) -> Result<Self> {
        let timeout = options.timeouts().connection_timeout;
        let url = options.url.as_str();
        log::debug!("[relay-link] Connecting to {} (timeout={:?})", url, timeout);

        let attempt = connector.connect(url, options.protocol.as_deref());
        let result = if LinkTimeouts::is_no_timeout(timeout) {
            attempt.await
        } else {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    timeout
                ))),
            }
        };

        match result {
            Ok(socket) => {
                log::info!("[relay-link] Connected to {}", url);
                Ok(Self::adopt(socket, options, receive_schema, send_schema, handlers))
            },
            Err(e) => {
                log::warn!("[relay-link] Connection to {} failed: {}", url, e);
                Err(e)
            },
        }
    }

    /// Wrap an already-open socket. Must be called inside a tokio runtime.
    pub fn adopt<T: Socket>(
        socket: T,
        options: &ConnectionOptions,
        receive_schema: Schema<R>,
        send_schema: Schema<S>,
        handlers: EventHandlers,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(Lifecycle {
            cancel: CancellationToken::new(),
            state: Mutex::new(LifecycleState::default()),
            handlers: handlers.clone(),
        });
        let inbound = BufferedStream::new();

        // Connection end closes inbound; consumer cancel closes the connection.
        let inbound_on_abort = inbound.clone();
        lifecycle.on_abort(Box::new(move || inbound_on_abort.close()));
        let lifecycle_on_cancel = lifecycle.clone();
        inbound.on_close(move || {
            lifecycle_on_cancel.terminate(DisconnectReason::new("Inbound stream cancelled"));
        });

        let task = tokio::spawn(socket_task(
            socket,
            outbound_rx,
            FrameIntake {
                inbound: inbound.clone(),
                schema: receive_schema,
                handlers,
                max_text_frame_bytes: options.max_text_frame_bytes,
            },
            lifecycle.clone(),
        ));

        Self {
            handle: ConnectionHandle {
                outbound: outbound_tx,
                send_schema,
                lifecycle,
            },
            inbound,
            _task: task,
        }
    }
}

impl<R, S> ValidatedSocketConnection<R, S> {
    pub fn handle(&self) -> ConnectionHandle<S> {
        self.handle.clone()
    }

    /// The validated inbound values. Only the first call returns a reader;
    /// dropping it closes the connection.
    pub fn take_inbound(&self) -> Option<StreamReader<R>> {
        self.inbound.reader()
    }

    /// Register a callback for the closed transition. Fires exactly once;
    /// immediately if the connection is already closed.
    pub fn on_abort(&self, listener: impl FnOnce() + Send + 'static) {
        self.handle.lifecycle.on_abort(Box::new(listener));
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.handle.disconnect_reason()
    }
}

impl<R, S: Serialize> ValidatedSocketConnection<R, S> {
    /// See [`ConnectionHandle::send`].
    pub fn send(&self, value: &S) -> bool {
        self.handle.send(value)
    }
}

impl<R, S> Drop for ValidatedSocketConnection<R, S> {
    fn drop(&mut self) {
        self.handle.abort(DisconnectReason::new("Connection dropped"));
    }
}

/// Inbound side of the socket task: size check, validation, delivery.
struct FrameIntake<R> {
    inbound: BufferedStream<R>,
    schema: Schema<R>,
    handlers: EventHandlers,
    max_text_frame_bytes: usize,
}

impl<R: DeserializeOwned> FrameIntake<R> {
    fn accept(&self, text: &str) {
        if text.len() > self.max_text_frame_bytes {
            log::warn!(
                "[relay-link] Dropping inbound frame: too large ({} bytes)",
                text.len()
            );
            self.handlers.emit_error(ConnectionError::new(
                format!("Inbound frame too large ({} bytes)", text.len()),
                true,
            ));
            return;
        }
        self.handlers.emit_receive(text);
        match self.schema.parse_text(text) {
            Ok(value) => {
                if !self.inbound.push(value) {
                    log::debug!("[relay-link] Inbound stream closed, frame dropped");
                }
            },
            Err(e) => {
                log::warn!("[relay-link] Dropping invalid inbound frame {}", e);
                self.handlers.emit_error(ConnectionError::new(
                    format!("Invalid inbound frame {}", e),
                    true,
                ));
            },
        }
    }

    fn accept_binary(&self, data: Vec<u8>) {
        match String::from_utf8(data) {
            Ok(text) => self.accept(&text),
            Err(e) => {
                log::warn!("[relay-link] Dropping binary frame that is not UTF-8: {}", e);
                self.handlers.emit_error(ConnectionError::new(
                    format!("Binary frame is not UTF-8: {}", e),
                    true,
                ));
            },
        }
    }
}

async fn socket_task<R, T>(
    mut socket: T,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    intake: FrameIntake<R>,
    lifecycle: Arc<Lifecycle>,
) where
    R: DeserializeOwned,
    T: Socket,
{
    let reason = loop {
        tokio::select! {
            biased;

            _ = lifecycle.cancel.cancelled() => {
                if let Err(e) = socket.close().await {
                    log::debug!("[relay-link] Error while closing socket: {}", e);
                }
                break None;
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(e) = socket.send(text).await {
                    log::warn!("[relay-link] Failed to write outbound frame: {}", e);
                    break Some(DisconnectReason::new(format!("Send failed: {}", e)));
                }
            }

            event = socket.next() => match event {
                Some(Ok(TransportEvent::Text(text))) => intake.accept(&text),
                Some(Ok(TransportEvent::Binary(data))) => intake.accept_binary(data),
                Some(Ok(TransportEvent::Close(reason))) => {
                    break Some(reason.unwrap_or_else(|| DisconnectReason::new("Server closed connection")));
                },
                Some(Err(e)) => {
                    intake.handlers.emit_error(ConnectionError::new(e.to_string(), true));
                    break Some(DisconnectReason::new(format!("WebSocket error: {}", e)));
                },
                None => break Some(DisconnectReason::new("WebSocket stream ended")),
            },
        }
    };

    if let Some(reason) = reason {
        lifecycle.terminate(reason);
    }
}
