//! Transport layer for the culvert tunnel.
//!
//! A transport is anything that can carry opaque byte frames in both
//! directions: a length-prefixed TCP/TLS stream or a WebSocket connection.
//! The [`adapter::FrameStream`] turns a [`FrameTransport`] back into an
//! ordered duplex byte stream, which is what the multiplexer consumes.

pub mod adapter;
pub mod error;
pub mod frame;
pub mod framed;
pub mod header;
pub mod mux;
pub mod websocket;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Sink, Stream};

pub use adapter::FrameStream;
pub use error::TransportError;
pub use frame::{FrameCodec, MAX_FRAME_SIZE};
pub use header::{
    read_ident, read_target_header, write_ident, write_target_header, MAX_IDENT_LEN,
    MAX_TARGET_HEADER,
};
pub use mux::{open_substream, MuxHandle, OPEN_TIMEOUT};

/// Sending half of a transport: one [`Bytes`] in, one frame on the wire.
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = TransportError> + Send>>;

/// Receiving half of a transport: one frame off the wire, one [`Bytes`] out.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A connected transport, split into its two directions.
///
/// Frames are opaque and ordered within each direction. Dropping the
/// transport closes the underlying connection.
pub struct FrameTransport {
    sink: FrameSink,
    source: FrameSource,
}

impl FrameTransport {
    pub fn new(sink: FrameSink, source: FrameSource) -> Self {
        Self { sink, source }
    }

    pub fn into_parts(self) -> (FrameSink, FrameSource) {
        (self.sink, self.source)
    }
}

/// Which transport binding a binary should speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Length-prefixed frames over TCP, optionally wrapped in TLS.
    Framed,
    /// Binary WebSocket messages over an HTTP(S) upgrade to `/tunnel`.
    WebSocket,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "framed" => Ok(TransportKind::Framed),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("framed".parse::<TransportKind>(), Ok(TransportKind::Framed));
        assert_eq!(
            "websocket".parse::<TransportKind>(),
            Ok(TransportKind::WebSocket)
        );
        assert_eq!("WS".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }
}
