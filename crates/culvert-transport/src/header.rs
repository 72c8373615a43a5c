//! In-band bootstrap and target-header framing on sub-streams.
//!
//! Both are single ASCII lines: the first sub-stream of an in-band session
//! carries the client id, and every forwarded sub-stream starts with the
//! `host:port` line naming the dial target. The reader must consume up to
//! the newline before treating any further bytes as payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Maximum length of the target header, newline included.
pub const MAX_TARGET_HEADER: usize = 256;

/// Maximum length of the in-band client identity.
pub const MAX_IDENT_LEN: usize = 256;

/// Read the target header line from a freshly accepted sub-stream.
///
/// Reads byte-by-byte so no payload past the newline is consumed. The full
/// header, newline included, must fit in [`MAX_TARGET_HEADER`] bytes.
pub async fn read_target_header<R>(stream: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::InvalidHeader(
                "stream closed before header newline".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() >= MAX_TARGET_HEADER {
            return Err(TransportError::InvalidHeader(format!(
                "header exceeds {} bytes",
                MAX_TARGET_HEADER
            )));
        }
    }

    let target = String::from_utf8(line)
        .map_err(|_| TransportError::InvalidHeader("header is not valid UTF-8".to_string()))?;

    if target.is_empty() {
        return Err(TransportError::InvalidHeader("empty target".to_string()));
    }

    Ok(target)
}

/// Write the target header for `host:port` onto a just-opened sub-stream.
pub async fn write_target_header<W>(
    stream: &mut W,
    target: &str,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("{}\n", target);
    if header.len() > MAX_TARGET_HEADER {
        return Err(TransportError::InvalidHeader(format!(
            "target {} exceeds {} bytes",
            target, MAX_TARGET_HEADER
        )));
    }
    stream.write_all(header.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the client identity from the bootstrap sub-stream: up to
/// [`MAX_IDENT_LEN`] bytes, with a single trailing newline trimmed.
pub async fn read_ident<R>(stream: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 64];

    while buf.len() < MAX_IDENT_LEN {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let take = n.min(MAX_IDENT_LEN - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }

    let ident = String::from_utf8(buf)
        .map_err(|_| TransportError::InvalidHeader("client id is not valid UTF-8".to_string()))?;

    if ident.is_empty() {
        return Err(TransportError::InvalidHeader("empty client id".to_string()));
    }

    Ok(ident)
}

/// Write the client identity line on the bootstrap sub-stream.
pub async fn write_ident<W>(stream: &mut W, client_id: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(client_id.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_target_header() {
        let mut input = Cursor::new(b"127.0.0.1:22\npayload".to_vec());
        let target = read_target_header(&mut input).await.unwrap();
        assert_eq!(target, "127.0.0.1:22");

        // Payload after the newline must be untouched
        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut input, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn test_header_at_limit_accepted() {
        // 255 bytes of host, then the newline: 256 total
        let host = "h".repeat(255);
        let mut input = Cursor::new(format!("{}\n", host).into_bytes());
        let target = read_target_header(&mut input).await.unwrap();
        assert_eq!(target.len(), 255);
    }

    #[tokio::test]
    async fn test_header_over_limit_rejected() {
        // 256 bytes before any newline: one past the limit
        let host = "h".repeat(256);
        let mut input = Cursor::new(format!("{}\n", host).into_bytes());
        assert!(matches!(
            read_target_header(&mut input).await,
            Err(TransportError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_header_without_newline_rejected() {
        let mut input = Cursor::new(b"no-newline".to_vec());
        assert!(matches!(
            read_target_header(&mut input).await,
            Err(TransportError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_write_target_header_roundtrip() {
        let mut buf = Vec::new();
        write_target_header(&mut buf, "10.0.0.5:9000").await.unwrap();
        assert_eq!(buf, b"10.0.0.5:9000\n");

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            read_target_header(&mut cursor).await.unwrap(),
            "10.0.0.5:9000"
        );
    }

    #[tokio::test]
    async fn test_oversized_target_rejected_on_write() {
        let mut buf = Vec::new();
        let target = "h".repeat(300);
        assert!(matches!(
            write_target_header(&mut buf, &target).await,
            Err(TransportError::InvalidHeader(_))
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_ident_roundtrip() {
        let mut buf = Vec::new();
        write_ident(&mut buf, "srv-prod").await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_ident(&mut cursor).await.unwrap(), "srv-prod");
    }

    #[tokio::test]
    async fn test_ident_without_newline() {
        let mut cursor = Cursor::new(b"bare-id".to_vec());
        assert_eq!(read_ident(&mut cursor).await.unwrap(), "bare-id");
    }

    #[tokio::test]
    async fn test_empty_ident_rejected() {
        let mut cursor = Cursor::new(b"\n".to_vec());
        assert!(read_ident(&mut cursor).await.is_err());
    }
}
