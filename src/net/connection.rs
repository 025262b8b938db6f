//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track connection state (Dialing → Piping → Closed)
//! - Own the per-service task group so connection tasks can be counted and
//!   awaited on shutdown

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::observability::metrics;

/// Global atomic counter for connection IDs. Relaxed: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection state, independent of the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connecting to the backend.
    Dialing,
    /// Both byte-copy directions are running.
    Piping,
    /// Both endpoints are closed.
    Closed,
}

/// Tracks the connection tasks of one service.
///
/// Cloning is cheap; all clones share the same task group and counter.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    service: Arc<str>,
    tasks: TaskTracker,
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker for `service`.
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
            tasks: TaskTracker::new(),
            active_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::record_connection_opened(&self.service);
        ConnectionGuard {
            service: Arc::clone(&self.service),
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Spawn a task that belongs to this service's connections.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Number of tasks still running, pump halves included.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop admitting the group as "open" and wait for every task to finish.
    pub async fn close_and_wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    service: Arc<str>,
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::record_connection_closed(&self.service);
        tracing::trace!(connection_id = %self.id, state = ?ConnectionState::Closed, "Connection closed");
    }
}
