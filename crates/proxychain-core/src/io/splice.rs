//! Bidirectional splice between a client connection and its tunnel.
//!
//! Each direction is a small poll-driven pump (read → write → flush) and
//! both pumps are driven from one future; a stalled writer on one side
//! does not stall the other direction.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// Receives byte counts as data crosses the splice.
pub trait TrafficCounter {
    /// Bytes moved from the client towards the tunnel.
    fn record_upstream(&self, bytes: u64);
    /// Bytes moved from the tunnel back to the client.
    fn record_downstream(&self, bytes: u64);
}

/// Counter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCounter;

impl TrafficCounter for NoopCounter {
    #[inline]
    fn record_upstream(&self, _bytes: u64) {}
    #[inline]
    fn record_downstream(&self, _bytes: u64) {}
}

/// Totals reported when a splice ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceStats {
    pub upstream: u64,
    pub downstream: u64,
    /// The splice ended because neither side moved data within the idle timeout.
    pub idle_timeout: bool,
}

enum PumpState {
    Read,
    Write { pos: usize, len: usize },
    Flush(usize),
    Shutdown,
    Closed,
}

enum Progress {
    Moved(usize),
    Eof,
}

struct Pump {
    buf: Box<[u8]>,
    state: PumpState,
}

impl Pump {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size.max(1)].into_boxed_slice(),
            state: PumpState::Read,
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, PumpState::Closed)
    }

    fn poll_pump<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        reader: &mut R,
        writer: &mut W,
    ) -> Poll<io::Result<Progress>>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            match self.state {
                PumpState::Read => {
                    let mut read_buf = ReadBuf::new(&mut self.buf);
                    match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => {
                            let len = read_buf.filled().len();
                            self.state = if len == 0 {
                                PumpState::Shutdown
                            } else {
                                PumpState::Write { pos: 0, len }
                            };
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                PumpState::Write { pos, len } => {
                    match Pin::new(&mut *writer).poll_write(cx, &self.buf[pos..len]) {
                        Poll::Ready(Ok(0)) => {
                            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                        }
                        Poll::Ready(Ok(n)) if pos + n >= len => self.state = PumpState::Flush(len),
                        Poll::Ready(Ok(n)) => self.state = PumpState::Write { pos: pos + n, len },
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                PumpState::Flush(moved) => match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        self.state = PumpState::Read;
                        return Poll::Ready(Ok(Progress::Moved(moved)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                },
                // Half-close: propagate EOF, ignore shutdown errors from a peer
                // that already went away.
                PumpState::Shutdown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                    Poll::Ready(_) => {
                        self.state = PumpState::Closed;
                        return Poll::Ready(Ok(Progress::Eof));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                PumpState::Closed => return Poll::Ready(Ok(Progress::Eof)),
            }
        }
    }
}

/// Relay bytes between `client` and `tunnel` until both directions reach EOF,
/// either side errors, or no data moves for `idle_timeout`.
pub async fn splice<A, B, C>(
    client: A,
    tunnel: B,
    idle_timeout: Duration,
    buffer_size: usize,
    counter: &C,
) -> io::Result<SpliceStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    C: TrafficCounter + ?Sized,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut tunnel_r, mut tunnel_w) = tokio::io::split(tunnel);

    let mut up = Pump::new(buffer_size);
    let mut down = Pump::new(buffer_size);
    let mut stats = SpliceStats::default();

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    while !(up.is_closed() && down.is_closed()) {
        let step = std::future::poll_fn(|cx| {
            let mut ready = false;
            let mut moved = false;

            if !up.is_closed() {
                match up.poll_pump(cx, &mut client_r, &mut tunnel_w) {
                    Poll::Ready(Ok(Progress::Moved(n))) => {
                        counter.record_upstream(n as u64);
                        stats.upstream += n as u64;
                        moved = true;
                        ready = true;
                    }
                    Poll::Ready(Ok(Progress::Eof)) => ready = true,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => {}
                }
            }

            if !down.is_closed() {
                match down.poll_pump(cx, &mut tunnel_r, &mut client_w) {
                    Poll::Ready(Ok(Progress::Moved(n))) => {
                        counter.record_downstream(n as u64);
                        stats.downstream += n as u64;
                        moved = true;
                        ready = true;
                    }
                    Poll::Ready(Ok(Progress::Eof)) => ready = true,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => {}
                }
            }

            if ready {
                Poll::Ready(Ok(moved))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = step => {
                if result? {
                    idle.as_mut().reset(deadline_after(idle_timeout));
                }
            }
            _ = &mut idle => {
                stats.idle_timeout = true;
                return Ok(stats);
            }
        }
    }

    Ok(stats)
}

/// `now + timeout`, saturating to a far-off deadline for huge timeouts.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly 30 years.
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;
