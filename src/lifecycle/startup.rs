//! Startup barrier.
//!
//! Every service runner joins the overlay and binds its listeners, then
//! arrives here. Nobody starts accepting until all runners have arrived, so
//! a bind failure in one service stops the others before any traffic flows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct StartupBarrier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    remaining: AtomicUsize,
    open: CancellationToken,
}

impl StartupBarrier {
    /// Barrier waiting for `parties` arrivals. Zero parties is already open.
    pub fn new(parties: usize) -> Self {
        let open = CancellationToken::new();
        if parties == 0 {
            open.cancel();
        }
        Self {
            inner: Arc::new(Inner {
                remaining: AtomicUsize::new(parties),
                open,
            }),
        }
    }

    /// Record one ready party. The last arrival opens the barrier.
    pub fn arrive(&self) {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.inner.open.cancel();
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.is_cancelled()
    }

    /// Wait until the barrier opens. Returns `false` when `shutdown` fires
    /// first; shutdown wins a tie.
    pub async fn wait(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = self.inner.open.cancelled() => true,
        }
    }
}
