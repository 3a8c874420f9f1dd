//! Connection Limiting
//!
//! Caps concurrent connections to prevent resource exhaustion. Slots are
//! claimed at accept time and released by RAII guard drop, so every exit
//! path of a connection task gives its slot back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Enforces a maximum number of concurrent connections.
#[derive(Clone)]
pub struct ConnectionLimiter {
    shared: Arc<Shared>,
}

struct Shared {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            shared: Arc::new(Shared {
                active: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Claims a connection slot, or `None` when at capacity. The returned
    /// guard releases the slot on drop.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let claimed = self
            .shared
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < self.shared.max_connections).then_some(active + 1)
            });
        claimed.ok().map(|_| ConnectionGuard {
            shared: self.shared.clone(),
        })
    }

    /// Current number of claimed slots.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

/// RAII guard for one claimed connection slot.
pub struct ConnectionGuard {
    shared: Arc<Shared>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}
