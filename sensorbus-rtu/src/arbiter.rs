//! Exclusive access to the shared bus.
//!
//! RS-485 is half duplex: a second request sent while a device is still
//! answering corrupts both frames. [`BusArbiter`] owns the transport and runs
//! one transaction at a time, spacing consecutive transactions by the
//! configured debounce interval.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::trace;

use crate::error::TransportError;
use crate::frame::{EXCEPTION_FRAME_LEN, to_hex};
use crate::transport::Transport;

/// Bus timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    /// Minimum idle time between the end of one transaction and the start of
    /// the next.
    pub debounce: Duration,
    /// Delay between writing a request and starting to read.
    pub settle: Duration,
    /// Overall limit for collecting the response.
    pub read_timeout: Duration,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            settle: Duration::from_millis(100),
            read_timeout: Duration::from_secs(1),
        }
    }
}

struct BusState<T> {
    transport: T,
    last_end: Option<Instant>,
}

/// Serializes request/response transactions over one transport.
pub struct BusArbiter<T> {
    state: Mutex<BusState<T>>,
    timing: BusTiming,
}

impl<T: Transport> BusArbiter<T> {
    pub fn new(transport: T, timing: BusTiming) -> Self {
        Self {
            state: Mutex::new(BusState {
                transport,
                last_end: None,
            }),
            timing,
        }
    }

    pub fn timing(&self) -> BusTiming {
        self.timing
    }

    /// Send `request` and collect a response of `expected_len` bytes.
    ///
    /// Waits for the bus lock and the debounce interval first. A response
    /// whose function byte carries the exception bit ends after the 5-byte
    /// exception frame. Raw bytes are returned without validation.
    pub async fn transact(
        &self,
        request: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().await;

        if let Some(last_end) = state.last_end {
            sleep_until(last_end + self.timing.debounce).await;
        }

        let result = exchange(&mut state.transport, &self.timing, request, expected_len).await;
        state.last_end = Some(Instant::now());
        result
    }
}

async fn exchange<T: Transport>(
    transport: &mut T,
    timing: &BusTiming,
    request: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, TransportError> {
    transport.clear_input()?;

    trace!(frame = %to_hex(request), "TX");
    transport.write_all(request).await?;

    sleep(timing.settle).await;

    let deadline = Instant::now() + timing.read_timeout;
    let mut buf = vec![0u8; expected_len];
    let mut target = expected_len;
    let mut filled = 0;

    while filled < target {
        match timeout_at(deadline, transport.read(&mut buf[filled..target])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                filled += n;
                if filled >= 2 && buf[1] & 0x80 != 0 {
                    target = target.min(EXCEPTION_FRAME_LEN).max(filled);
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }

    buf.truncate(filled);
    trace!(frame = %to_hex(&buf), "RX");

    if filled == 0 {
        return Err(TransportError::Timeout(timing.read_timeout));
    }
    if filled < target {
        return Err(TransportError::ShortRead {
            expected: target,
            actual: filled,
        });
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;

    /// Replays canned replies; each read hands out at most `chunk` bytes.
    struct Scripted {
        replies: VecDeque<Vec<u8>>,
        pending: Vec<u8>,
        chunk: usize,
        writes: Arc<parking_lot::Mutex<Vec<Instant>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Vec<u8>>, chunk: usize) -> Self {
            Self {
                replies: replies.into(),
                pending: Vec::new(),
                chunk,
                writes: Arc::default(),
            }
        }
    }

    impl Transport for Scripted {
        async fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            self.writes.lock().push(Instant::now());
            self.pending = self.replies.pop_front().unwrap_or_default();
            Ok(())
        }

        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                std::future::pending::<()>().await;
            }
            let n = buf.len().min(self.chunk).min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn fast_timing() -> BusTiming {
        BusTiming {
            debounce: Duration::from_millis(500),
            settle: Duration::from_millis(10),
            read_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_response_across_partial_reads() {
        let reply = vec![0x01, 0x03, 0x02, 0x00, 0x2A, 0x38, 0x5B];
        let arbiter = BusArbiter::new(Scripted::new(vec![reply.clone()], 3), fast_timing());

        let bytes = arbiter.transact(&[0x01], reply.len()).await.unwrap();
        assert_eq!(bytes, reply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_is_timeout() {
        let arbiter = BusArbiter::new(Scripted::new(vec![], 8), fast_timing());
        let err = arbiter.transact(&[0x01], 7).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_reply_is_short_read() {
        let arbiter = BusArbiter::new(Scripted::new(vec![vec![0x01, 0x03, 0x02]], 8), fast_timing());
        let err = arbiter.transact(&[0x01], 7).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead {
                expected: 7,
                actual: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exception_frame_ends_read_early() {
        let exception = vec![0x01, 0x83, 0x02, 0xC0, 0xF1];
        let arbiter = BusArbiter::new(Scripted::new(vec![exception.clone()], 2), fast_timing());

        let bytes = arbiter.transact(&[0x01], 9).await.unwrap();
        assert_eq!(bytes, exception);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_spaces_transactions() {
        let reply = vec![0x01, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
        let transport = Scripted::new(vec![reply.clone(), reply.clone()], 8);
        let writes = transport.writes.clone();
        let arbiter = BusArbiter::new(transport, fast_timing());

        arbiter.transact(&[0x01], 8).await.unwrap();
        let first_end = Instant::now();
        arbiter.transact(&[0x01], 8).await.unwrap();

        let writes = writes.lock();
        assert_eq!(writes.len(), 2);
        assert!(writes[1] - first_end >= Duration::from_millis(500));
    }
}
