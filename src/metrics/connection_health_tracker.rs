use crate::metrics::HealthCheck;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Tracks consecutive failed connection attempts of one listener.
///
/// A listener is healthy while its consecutive failures stay below the configured maximum.
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct ConnectionHealthTracker {
    max_consecutive_failures: usize,
    consecutive_failures: Arc<AtomicUsize>,
}

impl HealthCheck for ConnectionHealthTracker {
    fn healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) < self.max_consecutive_failures
    }
}

impl ConnectionHealthTracker {
    #[must_use]
    pub fn new(max_consecutive_failures: usize) -> Self {
        Self {
            max_consecutive_failures,
            consecutive_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn note_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
