//! Adapts a frame-oriented transport into an ordered duplex byte stream.
//!
//! The multiplexer wants `AsyncRead + AsyncWrite`; transports produce and
//! consume whole frames. Reads drain a residual buffer before awaiting the
//! next frame; overflow from a frame larger than the caller's buffer is
//! retained for the next read. Each write submits exactly one frame holding
//! a private copy of the input.
//!
//! The adapter is exclusively owned by the multiplexer session, so the read
//! and write paths are independent by construction (they poll the separate
//! source/sink halves). Any transport error latches the adapter closed:
//! subsequent reads return EOF and writes fail with a broken pipe.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{FrameTransport, TransportError};

pub struct FrameStream {
    sink: crate::FrameSink,
    source: crate::FrameSource,
    /// Frame bytes not yet handed to a reader.
    residual: BytesMut,
    closed: bool,
}

impl FrameStream {
    pub fn new(transport: FrameTransport) -> Self {
        let (sink, source) = transport.into_parts();
        Self {
            sink,
            source,
            residual: BytesMut::new(),
            closed: false,
        }
    }

    fn fill(&mut self, buf: &mut ReadBuf<'_>, mut frame: Bytes) {
        let n = frame.len().min(buf.remaining());
        buf.put_slice(&frame[..n]);
        frame.advance(n);
        if !frame.is_empty() {
            self.residual.extend_from_slice(&frame);
        }
    }
}

impl AsyncRead for FrameStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Residual bytes from an earlier oversized frame come first
        if !this.residual.is_empty() {
            let n = this.residual.len().min(buf.remaining());
            buf.put_slice(&this.residual.split_to(n));
            return Poll::Ready(Ok(()));
        }

        if this.closed {
            return Poll::Ready(Ok(()));
        }

        loop {
            return match this.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    // An empty frame must not read as end-of-stream
                    if frame.is_empty() {
                        continue;
                    }
                    this.fill(buf, frame);
                    Poll::Ready(Ok(()))
                }
                Poll::Ready(Some(Err(e))) => {
                    this.closed = true;
                    Poll::Ready(Err(e.into_io()))
                }
                Poll::Ready(None) => {
                    this.closed = true;
                    Poll::Ready(Ok(()))
                }
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

impl AsyncWrite for FrameStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        match this.sink.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => {
                this.closed = true;
                return Poll::Ready(Err(e.into_io()));
            }
            Poll::Pending => return Poll::Pending,
        }

        // One frame per write, carrying a private copy of the input
        if let Err(e) = this.sink.as_mut().start_send(Bytes::copy_from_slice(buf)) {
            this.closed = true;
            return Poll::Ready(Err(e.into_io()));
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(Ok(()));
        }

        match this.sink.as_mut().poll_flush(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => {
                this.closed = true;
                Poll::Ready(Err(e.into_io()))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Idempotent: a second shutdown is a no-op
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        match this.sink.as_mut().poll_close(cx) {
            Poll::Ready(result) => {
                this.closed = true;
                Poll::Ready(result.map_err(TransportError::into_io))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio_util::sync::PollSender;

    /// Build a FrameStream wired to channel endpoints the test controls.
    fn channel_stream() -> (FrameStream, mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(16);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(16);

        let sink = PollSender::new(out_tx)
            .sink_map_err(|_| TransportError::Closed);
        let source = tokio_stream_from(in_rx);

        let transport = FrameTransport::new(Box::pin(sink), Box::pin(source));
        (FrameStream::new(transport), in_tx, out_rx)
    }

    fn tokio_stream_from(
        mut rx: mpsc::Receiver<Bytes>,
    ) -> impl Stream<Item = Result<Bytes, TransportError>> {
        futures_util::stream::poll_fn(move |cx| {
            rx.poll_recv(cx).map(|opt| opt.map(Ok))
        })
    }

    #[tokio::test]
    async fn test_read_spans_frames_in_order() {
        let (mut stream, in_tx, _out_rx) = channel_stream();

        in_tx.send(Bytes::from_static(b"hello ")).await.unwrap();
        in_tx.send(Bytes::from_static(b"world")).await.unwrap();
        drop(in_tx);

        let mut collected = Vec::new();
        stream.read_to_end(&mut collected).await.unwrap();
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn test_read_retains_residual() {
        let (mut stream, in_tx, _out_rx) = channel_stream();

        in_tx.send(Bytes::from_static(b"abcdef")).await.unwrap();

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");

        // Leftover frame bytes must come out before the next frame
        in_tx.send(Bytes::from_static(b"gh")).await.unwrap();
        let mut rest = [0u8; 4];
        stream.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"efgh");
    }

    #[tokio::test]
    async fn test_write_sends_one_frame_per_call() {
        let (mut stream, _in_tx, mut out_rx) = channel_stream();

        stream.write_all(b"one").await.unwrap();
        stream.write_all(b"two").await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(out_rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let (mut stream, _in_tx, _out_rx) = channel_stream();

        stream.shutdown().await.unwrap();
        // Shutdown twice is a no-op
        stream.shutdown().await.unwrap();

        let err = stream.write_all(b"nope").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_read_after_source_close_is_eof() {
        let (mut stream, in_tx, _out_rx) = channel_stream();
        drop(in_tx);

        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        // EOF is sticky
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
