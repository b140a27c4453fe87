//! In-flight request accounting.
//!
//! The server counts every request except health probes. Shutdown waits for
//! the count to reach zero before closing listeners. Once draining starts no
//! new request can enter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicU64,
    draining: AtomicBool,
}

/// Counter of in-flight requests with a draining flag.
///
/// Clones share the same counter.
///
/// ```
/// use gizmo_server::ActivityMonitor;
///
/// let monitor = ActivityMonitor::new();
/// let guard = monitor.try_enter().unwrap();
/// assert_eq!(monitor.count(), 1);
///
/// monitor.start_draining();
/// assert!(monitor.try_enter().is_none());
///
/// drop(guard);
/// assert!(!monitor.active());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActivityMonitor {
    inner: Arc<Inner>,
}

impl ActivityMonitor {
    /// Creates an idle monitor in the serving state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request in.
    pub fn enter(&self) {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts one request out. Never goes below zero.
    pub fn leave(&self) {
        let result = self
            .inner
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if result.is_err() {
            tracing::warn!("activity monitor left more often than entered");
        }
    }

    /// Requests currently in flight.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Whether any request is in flight.
    #[must_use]
    pub fn active(&self) -> bool {
        self.count() > 0
    }

    /// Enters unless draining; the guard leaves when dropped.
    ///
    /// The draining flag is checked again after counting in, so a request
    /// racing with [`start_draining`](Self::start_draining) either is seen by
    /// the drain loop or backs out.
    #[must_use]
    pub fn try_enter(&self) -> Option<ActivityGuard> {
        if self.is_draining() {
            return None;
        }
        self.enter();
        if self.is_draining() {
            self.leave();
            return None;
        }
        Some(ActivityGuard {
            monitor: self.clone(),
        })
    }

    /// Refuses further entries.
    pub fn start_draining(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
    }

    /// Whether entries are refused.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }
}

/// Keeps one request counted until dropped, including during unwinding.
#[derive(Debug)]
pub struct ActivityGuard {
    monitor: ActivityMonitor,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.monitor.leave();
    }
}
