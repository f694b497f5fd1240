//! Blocking work queue with join-barrier accounting.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::graph::RuleId;

enum Item {
    Job(RuleId),
    Shutdown,
}

/// FIFO queue shared by the coordinator and worker threads.
///
/// `outstanding` counts jobs that are queued or currently being processed;
/// [`JobQueue::join`] blocks until it reaches zero. Every popped job must be
/// matched by exactly one [`JobQueue::task_done`]. Shutdown sentinels are not
/// counted — they only terminate worker loops.
pub struct JobQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    idle: Condvar,
}

struct Inner {
    items: VecDeque<Item>,
    outstanding: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                outstanding: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Enqueue a job.
    pub fn push(&self, id: RuleId) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(Item::Job(id));
        inner.outstanding += 1;
        self.available.notify_one();
    }

    /// Enqueue one shutdown sentinel; the worker that pops it terminates.
    pub fn push_shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(Item::Shutdown);
        self.available.notify_one();
    }

    /// Block until an item is available. `None` means shut down.
    pub fn pop(&self) -> Option<RuleId> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return match item {
                    Item::Job(id) => Some(id),
                    Item::Shutdown => None,
                };
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    /// Mark one previously popped job as fully processed.
    pub fn task_done(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.outstanding > 0, "task_done without matching pop");
        inner.outstanding -= 1;
        if inner.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until every pushed job has been fully processed.
    pub fn join(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.outstanding > 0 {
            inner = self.idle.wait(inner).unwrap();
        }
    }

    /// Number of items currently queued (not counting in-flight jobs).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
