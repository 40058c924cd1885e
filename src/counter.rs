//! Outstanding-work counter for recursive, dynamically growing work queues.
//!
//! A producer must call [`WorkCounter::add`] for every child item *before*
//! calling [`WorkCounter::done`] for the parent that discovered it. Otherwise
//! the count can touch zero while children are still about to be queued, and
//! [`WorkCounter::wait_zero`] returns early.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable counter with atomic increment/decrement and an async wait for zero.
#[derive(Debug, Clone)]
pub struct WorkCounter {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for WorkCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Registers `n` more units of outstanding work.
    pub fn add(&self, n: usize) {
        self.tx.send_modify(|count| *count += n);
    }

    /// Marks one unit of work as finished.
    pub fn done(&self) {
        self.tx.send_modify(|count| {
            debug_assert!(*count > 0, "WorkCounter::done called more often than add");
            *count = count.saturating_sub(1);
        });
    }

    /// Returns the current outstanding count.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.tx.borrow()
    }

    /// Waits until the outstanding count reaches zero.
    ///
    /// Returns immediately if nothing is outstanding.
    pub async fn wait_zero(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
