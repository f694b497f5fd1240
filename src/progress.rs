//! Build progress counters feeding status output and the final summary.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared counters: how many rules were scheduled, and how each completed.
#[derive(Default)]
pub struct Progress {
    scheduled: AtomicUsize,
    executed: AtomicUsize,
    cached: AtomicUsize,
}

impl Progress {
    /// Bump the total when new rules enter the schedule.
    pub fn add_scheduled(&self, n: usize) {
        self.scheduled.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a rule completed by executing its action.
    pub fn note_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rule completed by cache adoption.
    pub fn note_cached(&self) {
        self.cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.cached.load(Ordering::Relaxed)
    }
}
