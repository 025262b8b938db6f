//! Bidirectional byte pump.
//!
//! Two independent copy tasks, one per direction. The first direction to
//! finish (EOF or error) tears the whole connection down: it shuts down its
//! write side and cancels the connection token, which unblocks the other
//! direction. Both halves of each endpoint are dropped at that point, which
//! closes the sockets.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::net::connection::ConnectionTracker;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bound on flushing a shutdown to a peer that stopped reading.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Which way bytes flow, relative to the accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend.
    Upstream,
    /// Backend to client.
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Result of one copy direction.
#[derive(Debug)]
pub struct HalfOutcome {
    pub direction: Direction,
    pub bytes: u64,
    pub result: io::Result<()>,
}

/// Totals of a finished connection.
#[derive(Debug)]
pub struct PumpOutcome {
    pub upstream: HalfOutcome,
    pub downstream: HalfOutcome,
}

impl PumpOutcome {
    /// First error that is not an ordinary disconnect.
    pub fn error(&self) -> Option<&io::Error> {
        [&self.upstream.result, &self.downstream.result]
            .into_iter()
            .filter_map(|r| r.as_ref().err())
            .find(|e| !is_disconnect(e))
    }
}

/// Forward `source` ↔ `target` until either side finishes or `shutdown`
/// fires. Both copy tasks are spawned on `tracker`.
pub async fn pump<A, B>(
    source: A,
    target: B,
    tracker: &ConnectionTracker,
    shutdown: &CancellationToken,
) -> PumpOutcome
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (source_read, source_write) = tokio::io::split(source);
    let (target_read, target_write) = tokio::io::split(target);
    let teardown = shutdown.child_token();

    let upstream = tracker.spawn(copy_half(
        Direction::Upstream,
        source_read,
        target_write,
        teardown.clone(),
    ));
    let downstream = tracker.spawn(copy_half(
        Direction::Downstream,
        target_read,
        source_write,
        teardown,
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);
    PumpOutcome {
        upstream: upstream.unwrap_or_else(|e| panicked(Direction::Upstream, e)),
        downstream: downstream.unwrap_or_else(|e| panicked(Direction::Downstream, e)),
    }
}

fn panicked(direction: Direction, err: tokio::task::JoinError) -> HalfOutcome {
    HalfOutcome {
        direction,
        bytes: 0,
        result: Err(io::Error::other(err)),
    }
}

async fn copy_half<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    teardown: CancellationToken,
) -> HalfOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut bytes = 0u64;

    let result = loop {
        let n = tokio::select! {
            biased;
            _ = teardown.cancelled() => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };

        tokio::select! {
            biased;
            _ = teardown.cancelled() => break Ok(()),
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    break Err(e);
                }
            }
        }
        bytes += n as u64;
    };

    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
    teardown.cancel();

    HalfOutcome {
        direction,
        bytes,
        result,
    }
}

/// Errors that mean the peer went away rather than something broke.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
