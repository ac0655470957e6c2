// Bandwidth-shaped streaming of download bodies.
//
// Every chunk is held back until the ideal linear delivery curve
// (bytes_sent / rate) has caught up with the wall clock. The delay is never
// negative, so a transfer that fell behind is not allowed to burst to catch up.

use axum::body::Bytes;
use futures::Stream;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

// 500 KiB/s average per download.
pub const DOWNLOAD_RATE_BYTES_PER_SEC: u64 = 500 * 1024;

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Deficit-based pacing state for one transfer.
#[derive(Debug, Clone)]
pub struct Pacer {
    rate: u64,
    start: Instant,
    total_bytes: u64,
}

impl Pacer {
    pub fn new(rate: u64, start: Instant) -> Self {
        Self {
            rate,
            start,
            total_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.total_bytes += bytes as u64;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    // Time the bytes recorded so far are allowed to take at the target rate.
    pub fn expected_elapsed(&self) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        let nanos = u128::from(self.total_bytes) * 1_000_000_000 / u128::from(self.rate);
        Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
    }

    /// How long to wait at `now` before the recorded bytes may be released.
    pub fn delay_at(&self, now: Instant) -> Duration {
        let actual = now.saturating_duration_since(self.start);
        self.expected_elapsed().saturating_sub(actual)
    }
}

// Per-response transfer state. Dropped together with the response body, which
// happens when the transfer completes or the client goes away.
struct StreamSession<R> {
    reader: R,
    label: String,
    rate: u64,
    chunk_size: usize,
    pacer: Option<Pacer>,
    finished: bool,
}

impl<R> StreamSession<R> {
    // Marks the transfer complete so dropping the session is not reported as an abort.
    fn finish(&mut self) {
        self.finished = true;
        if let Some(pacer) = &self.pacer {
            tracing::debug!(
                "Download of {} finished: {} bytes in {} ms",
                self.label,
                pacer.total_bytes(),
                pacer.start().elapsed().as_millis()
            );
        }
    }
}

impl<R> Drop for StreamSession<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sent = self.pacer.as_ref().map_or(0, Pacer::total_bytes);
        tracing::debug!("Download of {} aborted after {} bytes", self.label, sent);
    }
}

/// Wraps `reader` into a body stream that delivers at most `rate` bytes per
/// second on average.
///
/// Pacing starts at the first poll, i.e. when the response body starts being
/// written. The final deficit is also waited out before the stream ends, so the
/// whole transfer never takes less than `size / rate`.
pub fn throttled_stream<R>(
    reader: R,
    rate: u64,
    chunk_size: usize,
    label: impl Into<String>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let session = StreamSession {
        reader,
        label: label.into(),
        rate,
        chunk_size: chunk_size.max(1),
        pacer: None,
        finished: false,
    };

    futures::stream::unfold(session, |mut session| async move {
        if session.finished {
            return None;
        }

        let rate = session.rate;
        let pacer = session
            .pacer
            .get_or_insert_with(|| Pacer::new(rate, Instant::now()));

        let mut buf = vec![0u8; session.chunk_size];
        match session.reader.read(&mut buf).await {
            Ok(0) => {
                let delay = pacer.delay_at(Instant::now());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                session.finish();
                None
            }
            Ok(n) => {
                buf.truncate(n);
                pacer.record(n);
                let delay = pacer.delay_at(Instant::now());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Some((Ok(Bytes::from(buf)), session))
            }
            Err(e) => {
                tracing::warn!(
                    "Read error while streaming {} after {} bytes: {}",
                    session.label,
                    pacer.total_bytes(),
                    e
                );
                // The body errors out and the connection is torn down; no retry.
                session.finished = true;
                Some((Err(e), session))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_pacer_expected_elapsed() {
        let start = Instant::now();
        let mut pacer = Pacer::new(1000, start);
        pacer.record(500);
        assert_eq!(pacer.expected_elapsed(), Duration::from_millis(500));
        pacer.record(1500);
        assert_eq!(pacer.expected_elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_pacer_delay_is_deficit() {
        let start = Instant::now();
        let mut pacer = Pacer::new(1000, start);
        pacer.record(1000);

        assert_eq!(pacer.delay_at(start), Duration::from_secs(1));
        assert_eq!(
            pacer.delay_at(start + Duration::from_millis(300)),
            Duration::from_millis(700)
        );
    }

    #[test]
    fn test_pacer_never_negative() {
        let start = Instant::now();
        let mut pacer = Pacer::new(1000, start);
        pacer.record(100);

        // Far behind schedule: no delay, and no credit for later chunks either.
        assert_eq!(pacer.delay_at(start + Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_pacer_zero_rate_is_unthrottled() {
        let start = Instant::now();
        let mut pacer = Pacer::new(0, start);
        pacer.record(1 << 20);
        assert_eq!(pacer.delay_at(start), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_is_byte_identical_and_paced() {
        let data = sample_data(200 * 1024);
        let rate = 100 * 1024;

        let started = Instant::now();
        let stream = throttled_stream(Cursor::new(data.clone()), rate, 16 * 1024, "sample");
        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        let elapsed = started.elapsed();

        let received: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(received, data);
        assert!(chunks.iter().all(|c| c.len() <= 16 * 1024));
        assert!(elapsed >= Duration::from_secs(2), "took only {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_chunk_follows_linear_curve() {
        let data = sample_data(64 * 1024);
        let rate = 32 * 1024;

        let started = Instant::now();
        let mut stream =
            Box::pin(throttled_stream(Cursor::new(data), rate, 8 * 1024, "curve"));

        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len() as u64;
            let ideal = Duration::from_nanos(total * 1_000_000_000 / rate);
            assert!(
                started.elapsed() >= ideal,
                "chunk ending at byte {} released early",
                total
            );
        }
        assert_eq!(total, 64 * 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_source_ends_immediately() {
        let started = Instant::now();
        let chunks: Vec<_> = throttled_stream(Cursor::new(Vec::new()), 1024, 512, "empty")
            .collect()
            .await;
        assert!(chunks.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    // Yields `good` bytes and then fails every read.
    struct FailingReader {
        good: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(io::Error::other("disk on fire")));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_ends_stream_with_error() {
        let results: Vec<_> =
            throttled_stream(FailingReader { good: 1000 }, 1_000_000, 600, "failing")
                .collect()
                .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().len(), 600);
        assert_eq!(results[1].as_ref().unwrap().len(), 400);
        assert!(results[2].is_err());
    }

    // Counts reads and reports when it is dropped.
    struct TrackedReader {
        inner: Cursor<Vec<u8>>,
        reads: Arc<AtomicUsize>,
        _alive: Arc<()>,
    }

    impl AsyncRead for TrackedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_releases_reader_and_stops_reading() {
        let reads = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(());
        let reader = TrackedReader {
            inner: Cursor::new(sample_data(4096)),
            reads: reads.clone(),
            _alive: alive.clone(),
        };
        let mut stream = Box::pin(throttled_stream(reader, 1024, 1024, "dropped"));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1024);

        // Start the second chunk's delay, then give up on it.
        let pending = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(pending.is_err());
        drop(stream);

        assert_eq!(Arc::strong_count(&alive), 1, "reader still held after drop");
        let reads_at_drop = reads.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(reads.load(Ordering::SeqCst), reads_at_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_stream_releases_reader() {
        let alive = Arc::new(());
        let reader = TrackedReader {
            inner: Cursor::new(sample_data(2048)),
            reads: Arc::new(AtomicUsize::new(0)),
            _alive: alive.clone(),
        };

        let total: usize = throttled_stream(reader, 1024, 1024, "complete")
            .map(|chunk| chunk.unwrap().len())
            .fold(0, |acc, n| async move { acc + n })
            .await;

        assert_eq!(total, 2048);
        assert_eq!(Arc::strong_count(&alive), 1);
    }
}
