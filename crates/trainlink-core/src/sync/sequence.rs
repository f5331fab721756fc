//! Thread-safe sequence counter for sync message numbering.
//!
//! Every sync message carries a monotonically increasing sequence number so
//! the receiver can detect drops and duplicates and order deltas against the
//! snapshot they follow.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Starts at 0 and increments by 1 with each call to [`next`](Self::next).
/// Wraps around at `u64::MAX` back to 0 without panicking.
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next sequence number and increments the counter.
    ///
    /// `Relaxed` ordering is sufficient: sequence numbers order messages,
    /// they do not synchronize memory between threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
