//! Ordered exit times of outstanding admissions.

use std::collections::VecDeque;
use std::time::Duration;

/// FIFO of exit times, one per outstanding admission.
///
/// Every admission shares the same window, so appending in admission order
/// keeps the queue sorted. A late append carrying an earlier exit time is
/// raised to the current tail so the front is always the earliest expiry.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    entries: VecDeque<Duration>,
}

impl ExpiryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record the exit time of a new admission, returning the time stored.
    pub fn push(&mut self, exit_time: Duration) -> Duration {
        let exit_time = match self.entries.back() {
            Some(&last) if last > exit_time => last,
            _ => exit_time,
        };
        self.entries.push_back(exit_time);
        exit_time
    }

    /// The earliest outstanding exit time.
    pub fn peek(&self) -> Option<Duration> {
        self.entries.front().copied()
    }

    /// Count the leading entries for which `is_due` holds, without removing them.
    pub fn count_due<F>(&self, mut is_due: F) -> usize
    where
        F: FnMut(Duration) -> bool,
    {
        self.entries.iter().take_while(|&&exit| is_due(exit)).count()
    }

    /// Remove up to `count` entries from the front, returning how many were removed.
    pub fn pop_front_n(&mut self, count: usize) -> usize {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
        count
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
