use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    try_join,
};
use tracing::trace;

/// Copies bytes in both directions between `a` and `b` until both directions reach end-of-stream.
///
/// When one direction reaches end-of-stream, the write half of its destination is shut down
/// while the opposite direction keeps flowing. Returns the byte counts copied from `a` to `b` and
/// from `b` to `a`.
pub async fn relay<A, B>(a: &mut A, b: &mut B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = async {
        let copied = tokio::io::copy(&mut a_read, &mut b_write).await?;
        if let Err(error) = b_write.shutdown().await {
            trace!("Shutdown after end-of-stream failed: {error}");
        }
        Ok::<_, io::Error>(copied)
    };

    let b_to_a = async {
        let copied = tokio::io::copy(&mut b_read, &mut a_write).await?;
        if let Err(error) = a_write.shutdown().await {
            trace!("Shutdown after end-of-stream failed: {error}");
        }
        Ok::<_, io::Error>(copied)
    };

    try_join!(a_to_b, b_to_a)
}
