//! Length-prefixed frame binding over TCP or TLS byte streams.

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::frame::FrameCodec;
use crate::FrameTransport;

/// Wrap an established byte stream (TCP, or TLS on either side) into a
/// [`FrameTransport`] speaking the length-prefixed frame protocol.
pub fn framed_transport<S>(io: S) -> FrameTransport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(io, FrameCodec::new());
    let (sink, source) = framed.split();
    FrameTransport::new(Box::pin(sink), Box::pin(source))
}
