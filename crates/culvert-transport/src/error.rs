use thiserror::Error;

use crate::frame::MAX_FRAME_SIZE;

/// Errors that can occur on a transport or its multiplexed sub-streams
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("multiplexer error: {0}")]
    Mux(String),

    #[error("sub-stream open timed out")]
    OpenTimeout,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Flatten into an `io::Error` for interfaces that only speak IO errors
    /// (the adapter's `AsyncRead`/`AsyncWrite` surface).
    pub fn into_io(self) -> std::io::Error {
        match self {
            TransportError::Io(e) => e,
            TransportError::Closed => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "transport closed")
            }
            other => std::io::Error::other(other),
        }
    }
}
