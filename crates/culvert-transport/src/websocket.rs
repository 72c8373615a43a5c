//! WebSocket frame binding.
//!
//! Each transport frame is one binary WebSocket message. The HTTP upgrade
//! (path `/tunnel`, credential headers) is handled by the server and agent;
//! this module only adapts an already-established `WebSocketStream`.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::{FrameTransport, TransportError};

/// Path the agent upgrades against.
pub const UPGRADE_PATH: &str = "/tunnel";

/// Header carrying the client identity during the upgrade.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Header carrying the shared secret during the upgrade.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Wrap an upgraded WebSocket connection into a [`FrameTransport`].
pub fn websocket_transport<S>(ws: WebSocketStream<S>) -> FrameTransport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = ws.split();
    FrameTransport::new(
        Box::pin(WsFrameSink { inner: sink }),
        Box::pin(WsFrameSource { inner: source }),
    )
}

struct WsFrameSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> Sink<Bytes> for WsFrameSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(Message::binary(item.to_vec()))
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

struct WsFrameSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

impl<S> Stream for WsFrameSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    return Poll::Ready(Some(Ok(Bytes::from(data))));
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) => return Poll::Ready(None),
                // Pings are answered by tungstenite on flush; text and pong
                // frames carry nothing for us
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(TransportError::WebSocket(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
