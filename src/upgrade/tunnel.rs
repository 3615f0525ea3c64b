//! Full-duplex byte tunnel between the client and the upstream.
//!
//! # Data Flow
//! ```text
//!            ┌──────── client → upstream task ────────┐
//! client ────┤                                        ├──── upstream
//!            └──────── upstream → client task ────────┘
//!                         │            │
//!                 first to finish fires the close signal
//!                         │            │
//!              both tasks drop their halves (both legs closed)
//!                         │            │
//!                  run() returns after joining both
//! ```
//!
//! # Design Decisions
//! - Exactly two spawned tasks per tunnel, one per direction
//! - EOF and error are treated alike: either one ends the whole tunnel
//! - Payload bytes are never inspected; only one buffer per direction is in flight
//! - The optional idle watchdog runs in the caller's task, not a third task

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;

/// Upper bound on the final half-close of a leg.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Direction of a copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tunnel started tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    /// This direction's copy loop ended first.
    Direction(Direction),
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
}

/// How one copy loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionEnd {
    /// The source reached end-of-stream.
    Eof,
    /// Reading or writing failed.
    Error(io::ErrorKind),
    /// Stopped because the tunnel was closing.
    Closed,
    /// The copy task panicked or was cancelled.
    Aborted,
}

/// Outcome of one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub bytes: u64,
    pub end: DirectionEnd,
}

/// What a finished tunnel did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    pub client_to_upstream: DirectionReport,
    pub upstream_to_client: DirectionReport,
    pub closed_by: ClosedBy,
    pub duration: Duration,
}

/// One-shot "tunnel is closing" signal shared by both directions.
///
/// Only the first `fire` takes effect; later calls are no-ops.
#[derive(Debug, Clone)]
struct CloseSignal {
    tx: Arc<watch::Sender<Option<ClosedBy>>>,
}

impl CloseSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if this call was the one that closed the tunnel.
    fn fire(&self, cause: ClosedBy) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(cause);
                true
            }
        })
    }

    fn cause(&self) -> Option<ClosedBy> {
        *self.tx.borrow()
    }

    async fn closed(mut rx: watch::Receiver<Option<ClosedBy>>) {
        let _ = rx.wait_for(Option::is_some).await;
    }

    fn subscribe(&self) -> watch::Receiver<Option<ClosedBy>> {
        self.tx.subscribe()
    }
}

/// Copies bytes both ways between two live connections until one side is done.
#[derive(Debug, Clone)]
pub struct TunnelPump {
    buffer_size: usize,
    idle_timeout: Option<Duration>,
}

impl Default for TunnelPump {
    fn default() -> Self {
        Self {
            buffer_size: 8 * 1024,
            idle_timeout: None,
        }
    }
}

impl TunnelPump {
    pub fn new(buffer_size: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            idle_timeout,
        }
    }

    /// Run the tunnel to completion.
    ///
    /// Returns only after both copy loops have ended and both connections
    /// have been released.
    pub async fn run<C, U>(&self, client: C, upstream: U) -> TunnelReport
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        let started = Instant::now();
        let (client_read, client_write) = tokio::io::split(client);
        let (upstream_read, upstream_write) = tokio::io::split(upstream);

        let signal = CloseSignal::new();
        let activity = Arc::new(AtomicU64::new(0));

        let client_to_upstream = tokio::spawn(pump_direction(
            Direction::ClientToUpstream,
            client_read,
            upstream_write,
            signal.clone(),
            Arc::clone(&activity),
            self.buffer_size,
        ));
        let upstream_to_client = tokio::spawn(pump_direction(
            Direction::UpstreamToClient,
            upstream_read,
            client_write,
            signal.clone(),
            Arc::clone(&activity),
            self.buffer_size,
        ));

        let mut both = Box::pin(async move { tokio::join!(client_to_upstream, upstream_to_client) });
        let (client_to_upstream, upstream_to_client) = match self.idle_timeout {
            None => both.await,
            Some(idle) => loop {
                let seen = activity.load(Ordering::Relaxed);
                tokio::select! {
                    joined = &mut both => break joined,
                    _ = tokio::time::sleep(idle) => {
                        if activity.load(Ordering::Relaxed) == seen && signal.fire(ClosedBy::IdleTimeout) {
                            tracing::debug!(idle_secs = idle.as_secs_f64(), "Tunnel idle, closing both legs");
                        }
                    }
                }
            },
        };

        let client_to_upstream = client_to_upstream.unwrap_or_else(aborted);
        let upstream_to_client = upstream_to_client.unwrap_or_else(aborted);
        // Both tasks have returned, so the signal was fired by one of them or by the watchdog.
        let closed_by = signal
            .cause()
            .unwrap_or(ClosedBy::Direction(Direction::ClientToUpstream));

        TunnelReport {
            client_to_upstream,
            upstream_to_client,
            closed_by,
            duration: started.elapsed(),
        }
    }
}

fn aborted(error: tokio::task::JoinError) -> DirectionReport {
    tracing::error!(error = %error, "Tunnel copy task aborted");
    DirectionReport {
        bytes: 0,
        end: DirectionEnd::Aborted,
    }
}

async fn pump_direction<R, W>(
    direction: Direction,
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    signal: CloseSignal,
    activity: Arc<AtomicU64>,
    buffer_size: usize,
) -> DirectionReport
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut bytes = 0u64;
    let closing = CloseSignal::closed(signal.subscribe());

    let end = tokio::select! {
        end = relay(&mut reader, &mut writer, &mut bytes, &activity, buffer_size) => end,
        _ = closing => DirectionEnd::Closed,
    };

    match &end {
        DirectionEnd::Error(kind) => {
            tracing::debug!(direction = %direction, bytes, error = ?kind, "Tunnel copy failed");
        }
        _ => tracing::debug!(direction = %direction, bytes, end = ?end, "Tunnel copy complete"),
    }

    if signal.fire(ClosedBy::Direction(direction)) {
        tracing::debug!(direction = %direction, "Closing both tunnel legs");
    }

    // A cancelled leg may hold buffered bytes for a peer that stopped reading;
    // it is only dropped. Dropping both halves closes the leg.
    if end != DirectionEnd::Closed {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
    }
    drop(reader);
    drop(writer);

    DirectionReport { bytes, end }
}

async fn relay<R, W>(
    reader: &mut R,
    writer: &mut W,
    bytes: &mut u64,
    activity: &AtomicU64,
    buffer_size: usize,
) -> DirectionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return DirectionEnd::Eof,
            Ok(n) => n,
            Err(e) => return DirectionEnd::Error(e.kind()),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return DirectionEnd::Error(e.kind());
        }
        if let Err(e) = writer.flush().await {
            return DirectionEnd::Error(e.kind());
        }
        *bytes += n as u64;
        activity.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn relays_both_ways() {
        let (mut client, client_side) = duplex(1024);
        let (upstream_side, mut upstream) = duplex(1024);

        let pump = tokio::spawn(async move { TunnelPump::default().run(client_side, upstream_side).await });

        client.write_all(b"hello upstream").await.unwrap();
        let mut buf = [0u8; 14];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello upstream");

        upstream.write_all(b"hi client").await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi client");

        drop(client);
        let report = tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();
        assert_eq!(report.client_to_upstream.bytes, 14);
        assert_eq!(report.upstream_to_client.bytes, 9);
    }

    #[tokio::test]
    async fn client_eof_unblocks_upstream_direction() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, mut upstream) = duplex(1024);

        let pump = tokio::spawn(async move { TunnelPump::default().run(client_side, upstream_side).await });

        // Upstream never writes, so upstream → client stays blocked in read.
        drop(client);

        let report = tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();
        assert_eq!(report.closed_by, ClosedBy::Direction(Direction::ClientToUpstream));
        assert_eq!(report.client_to_upstream.end, DirectionEnd::Eof);
        assert_eq!(report.upstream_to_client.end, DirectionEnd::Closed);

        // The upstream leg was closed by the tunnel.
        let mut rest = Vec::new();
        let read = tokio::time::timeout(WAIT, upstream.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn upstream_close_ends_tunnel() {
        let (mut client, client_side) = duplex(1024);
        let (upstream_side, mut upstream) = duplex(1024);

        let pump = tokio::spawn(async move { TunnelPump::default().run(client_side, upstream_side).await });

        upstream.write_all(b"bye").await.unwrap();
        drop(upstream);

        let report = tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();
        assert_eq!(report.closed_by, ClosedBy::Direction(Direction::UpstreamToClient));
        assert_eq!(report.upstream_to_client.bytes, 3);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"bye");
    }

    #[tokio::test]
    async fn already_closed_legs_do_not_block() {
        let (client, client_side) = duplex(64);
        let (upstream_side, upstream) = duplex(64);
        drop(client);
        drop(upstream);

        let report = tokio::time::timeout(WAIT, TunnelPump::default().run(client_side, upstream_side))
            .await
            .unwrap();
        assert_eq!(report.client_to_upstream.bytes, 0);
        assert_eq!(report.upstream_to_client.bytes, 0);
    }

    #[tokio::test]
    async fn idle_watchdog_closes_both_legs() {
        let (_client, client_side) = duplex(64);
        let (upstream_side, _upstream) = duplex(64);

        let pump = TunnelPump::new(64, Some(Duration::from_millis(50)));
        let report = tokio::time::timeout(WAIT, pump.run(client_side, upstream_side))
            .await
            .unwrap();
        assert_eq!(report.closed_by, ClosedBy::IdleTimeout);
        assert_eq!(report.client_to_upstream.end, DirectionEnd::Closed);
        assert_eq!(report.upstream_to_client.end, DirectionEnd::Closed);
    }

    async fn flood(mut upstream: tokio::io::DuplexStream) {
        let _ = upstream.write_all(&[7u8; 32 * 1024]).await;
        // Stay connected so only the client side can end the tunnel.
        std::future::pending::<()>().await;
    }

    #[tokio::test]
    async fn stalled_buffered_client_does_not_block_teardown() {
        let (mut client, client_side) = duplex(1024);
        let (upstream_side, upstream) = duplex(1024);
        tokio::spawn(flood(upstream));

        let pump = tokio::spawn(async move {
            TunnelPump::default()
                .run(tokio::io::BufStream::new(client_side), upstream_side)
                .await
        });

        // The client never reads; the upstream → client leg is stuck writing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.shutdown().await.unwrap();

        let report = tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();
        assert_eq!(report.closed_by, ClosedBy::Direction(Direction::ClientToUpstream));
        assert_eq!(report.upstream_to_client.end, DirectionEnd::Closed);
        drop(client);
    }

    #[tokio::test]
    async fn idle_watchdog_tears_down_stalled_buffered_client() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, upstream) = duplex(1024);
        tokio::spawn(flood(upstream));

        let pump = TunnelPump::new(8 * 1024, Some(Duration::from_millis(100)));
        let report = tokio::time::timeout(
            WAIT,
            pump.run(tokio::io::BufStream::new(client_side), upstream_side),
        )
        .await
        .unwrap();
        assert_eq!(report.closed_by, ClosedBy::IdleTimeout);
        drop(client);
    }

    #[test]
    fn close_signal_fires_once() {
        let signal = CloseSignal::new();
        assert!(signal.fire(ClosedBy::Direction(Direction::UpstreamToClient)));
        assert!(!signal.fire(ClosedBy::IdleTimeout));
        assert_eq!(
            signal.cause(),
            Some(ClosedBy::Direction(Direction::UpstreamToClient))
        );
    }
}
