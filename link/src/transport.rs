//! Socket transport seam.
//!
//! [`Connector`] opens one physical socket; the socket is a stream of
//! [`TransportEvent`]s plus a sink of outbound text frames. The default
//! binding is [`WebSocketConnector`] over tokio-tungstenite. [`memory_pair`]
//! gives an in-process socket for tests and embedding.

use crate::error::{LinkError, Result};
use crate::event_handlers::DisconnectReason;
use futures_util::{Sink, Stream};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[cfg(not(target_arch = "wasm32"))]
mod websocket;

#[cfg(not(target_arch = "wasm32"))]
pub use websocket::{WebSocketConnector, WebSocketSocket};

/// One inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Binary frames are decoded as UTF-8 JSON text.
    Binary(Vec<u8>),
    /// Peer-initiated close; carries the close frame if there was one.
    Close(Option<DisconnectReason>),
}

/// An open socket: inbound events out, outbound text frames in.
///
/// Ending the stream (or yielding an error) is the terminal transport
/// signal.
pub trait Socket:
    Stream<Item = Result<TransportEvent>> + Sink<String, Error = LinkError> + Send + Unpin + 'static
{
}

impl<T> Socket for T where
    T: Stream<Item = Result<TransportEvent>>
        + Sink<String, Error = LinkError>
        + Send
        + Unpin
        + 'static
{
}

/// Opens physical sockets.
///
/// Resolving to `Ok` is the transport's "open" signal. Timeouts are applied
/// by the caller.
pub trait Connector: Send + Sync + 'static {
    type Socket: Socket;

    fn connect(
        &self,
        url: &str,
        protocol: Option<&str>,
    ) -> impl Future<Output = Result<Self::Socket>> + Send;
}

// ---------------------------------------------------------------------------
// In-process socket
// ---------------------------------------------------------------------------

/// Create a connected in-process socket and the peer that drives it.
pub fn memory_pair() -> (MemorySocket, MemoryPeer) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    (
        MemorySocket {
            events: events_rx,
            frames: Some(frames_tx),
        },
        MemoryPeer {
            events: events_tx,
            frames: frames_rx,
        },
    )
}

/// Client end of [`memory_pair`].
#[derive(Debug)]
pub struct MemorySocket {
    events: mpsc::UnboundedReceiver<Result<TransportEvent>>,
    frames: Option<mpsc::UnboundedSender<String>>,
}

impl Stream for MemorySocket {
    type Item = Result<TransportEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Sink<String> for MemorySocket {
    type Error = LinkError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        match &self.frames {
            Some(tx) if !tx.is_closed() => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(LinkError::Closed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<()> {
        match &self.frames {
            Some(tx) => tx.send(item).map_err(|_| LinkError::Closed),
            None => Err(LinkError::Closed),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.frames = None;
        Poll::Ready(Ok(()))
    }
}

/// Server end of [`memory_pair`]. Dropping it ends the client's stream.
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::UnboundedSender<Result<TransportEvent>>,
    frames: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.emit(Ok(TransportEvent::Text(text.into())))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.emit(Ok(TransportEvent::Binary(data.into())))
    }

    pub fn close(&self, reason: Option<DisconnectReason>) -> bool {
        self.emit(Ok(TransportEvent::Close(reason)))
    }

    /// Inject a transport error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(Err(LinkError::WebSocketError(message.into())))
    }

    fn emit(&self, event: Result<TransportEvent>) -> bool {
        self.events.send(event).is_ok()
    }

    /// Next frame written by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }
}
