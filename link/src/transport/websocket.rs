//! tokio-tungstenite binding.

use super::{Connector, TransportEvent};
use crate::error::{LinkError, Result};
use crate::event_handlers::DisconnectReason;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connector`] for `ws://` and `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    type Socket = WebSocketSocket;

    async fn connect(&self, url: &str, protocol: Option<&str>) -> Result<WebSocketSocket> {
        let mut request = url.into_client_request().map_err(|e| {
            LinkError::WebSocketError(format!("Failed to build WebSocket request: {}", e))
        })?;

        if let Some(protocol) = protocol {
            let value = HeaderValue::from_str(protocol).map_err(|e| {
                LinkError::ConfigurationError(format!(
                    "Invalid WebSocket protocol '{}': {}",
                    protocol, e
                ))
            })?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        log::debug!("[relay-link] Opening WebSocket to {}", url);
        match connect_async(request).await {
            Ok((stream, _response)) => Ok(WebSocketSocket { inner: stream }),
            Err(WsError::Http(response)) => Err(LinkError::WebSocketError(format!(
                "WebSocket HTTP error: {}",
                response.status().as_u16()
            ))),
            Err(e) => Err(LinkError::WebSocketError(format!("Connection failed: {}", e))),
        }
    }
}

/// Socket opened by [`WebSocketConnector`].
///
/// Ping/pong and raw frames are handled by tungstenite and never surface.
#[derive(Debug)]
pub struct WebSocketSocket {
    inner: WsStream,
}

impl Stream for WebSocketSocket {
    type Item = Result<TransportEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let event = match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Text(text))) => TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data.to_vec()),
                Some(Ok(Message::Close(frame))) => TransportEvent::Close(frame.map(|f| {
                    DisconnectReason::with_code(f.reason.to_string(), f.code.into())
                })),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => return Poll::Ready(None),
            };
            return Poll::Ready(Some(Ok(event)));
        }
    }
}

impl Sink<String> for WebSocketSocket {
    type Error = LinkError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready_unpin(cx).map_err(LinkError::from)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<()> {
        self.inner
            .start_send_unpin(Message::Text(item.into()))
            .map_err(LinkError::from)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_flush_unpin(cx).map_err(LinkError::from)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_close_unpin(cx).map_err(LinkError::from)
    }
}
