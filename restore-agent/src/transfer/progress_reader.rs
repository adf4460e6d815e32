//! Progress-tracking reader wrapper for backup file streams.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Duration, Instant};

const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Receives the number of bytes read from the wrapped stream so far
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Reader wrapper that counts bytes and calls a progress callback
pub struct ProgressReader<R> {
    inner: R,
    bytes_read: u64,
    last_update: Instant,
    callback: ProgressCallback,
}

impl<R> ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_read: 0,
            last_update: Instant::now(),
            callback,
        }
    }
}

impl<R> AsyncRead for ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();

        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let chunk = (buf.filled().len() - before) as u64;
                self.bytes_read += chunk;

                // Zero bytes means end of stream: always report the final count
                let now = Instant::now();
                if chunk == 0 || now.duration_since(self.last_update) >= UPDATE_INTERVAL {
                    (self.callback)(self.bytes_read);
                    self.last_update = now;
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
