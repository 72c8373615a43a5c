use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// How long the surviving direction of a pump may keep draining after the
/// other direction has finished. Bounds tear-down latency so a half-closed
/// peer cannot pin the connection.
pub const PUMP_LINGER: Duration = Duration::from_secs(1);

/// Copy bytes between two duplex streams until either side closes.
///
/// Runs one half-duplex copy per direction. EOF on a direction propagates as
/// a write shutdown on the opposite stream so the peer observes a half close.
/// Once either direction terminates (clean EOF, error or cancellation), the
/// other is given [`PUMP_LINGER`] to flush tail bytes and is then dropped.
pub async fn pump<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward = async {
        let _ = tokio::io::copy(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
    };
    let backward = async {
        let _ = tokio::io::copy(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
    };

    tokio::pin!(forward, backward);

    tokio::select! {
        _ = &mut forward => {
            let _ = tokio::time::timeout(PUMP_LINGER, &mut backward).await;
        }
        _ = &mut backward => {
            let _ = tokio::time::timeout(PUMP_LINGER, &mut forward).await;
        }
    }
}
