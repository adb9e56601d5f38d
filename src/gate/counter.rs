//! Bounded admission counter shared by blocking and async waiters.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::expiry::ExpiryQueue;
use crate::error::GateError;

/// Upper bound on the expiry entries reserved up front; the queue grows past it on demand.
const PREALLOCATED_ENTRIES: usize = 1024;

/// State guarded by the counter's lock.
///
/// `available + pending.len() == capacity` holds whenever the lock is released.
#[derive(Debug)]
struct Slots {
    available: usize,
    pending: ExpiryQueue,
    closed: bool,
}

/// A point-in-time view of the counter, read under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Permits grantable right now
    pub available: usize,
    /// Admissions waiting to be reclaimed
    pub outstanding: usize,
    /// Earliest outstanding exit time
    pub next_exit: Option<Duration>,
}

/// Counting primitive bounding outstanding admissions to `capacity`.
///
/// Taking a permit and recording its exit time happen under one lock, so a
/// waiter that gives up (timeout, cancellation, disposal) never leaves a
/// permit consumed without a matching expiry entry. Blocking waiters park on
/// a [`Condvar`]; async waiters park on a [`Notify`]. Both are woken on release
/// and on close.
#[derive(Debug)]
pub struct AdmissionCounter {
    capacity: usize,
    slots: Mutex<Slots>,
    condvar: Condvar,
    notify: Notify,
}

impl AdmissionCounter {
    /// Create a counter with every permit available.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots {
                available: capacity,
                pending: ExpiryQueue::with_capacity(capacity.min(PREALLOCATED_ENTRIES)),
                closed: false,
            }),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read available and outstanding counts together.
    pub fn snapshot(&self) -> SlotSnapshot {
        let slots = self.slots.lock();
        SlotSnapshot {
            available: slots.available,
            outstanding: slots.pending.len(),
            next_exit: slots.pending.peek(),
        }
    }

    /// Whether the counter has been closed.
    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Take a permit if one is free, without waiting.
    ///
    /// Returns the recorded exit time on success.
    pub fn try_acquire<F>(&self, exit_time: F) -> Result<Option<Duration>, GateError>
    where
        F: Fn() -> Duration,
    {
        let mut slots = self.slots.lock();
        Self::admit(&mut slots, &exit_time)
    }

    /// Block the current thread until a permit is taken, the deadline passes,
    /// or the counter is closed.
    ///
    /// Must not be called from an async worker thread.
    pub fn acquire_blocking<F>(
        &self,
        deadline: Option<Instant>,
        exit_time: F,
    ) -> Result<Option<Duration>, GateError>
    where
        F: Fn() -> Duration,
    {
        let mut slots = self.slots.lock();
        let mut timed_out = false;
        loop {
            if let Some(exit) = Self::admit(&mut slots, &exit_time)? {
                return Ok(Some(exit));
            }
            if timed_out {
                return Ok(None);
            }
            match deadline {
                None => self.condvar.wait(&mut slots),
                Some(deadline) => {
                    timed_out = self.condvar.wait_until(&mut slots, deadline).timed_out();
                }
            }
        }
    }

    /// Suspend until a permit is taken or the counter is closed.
    ///
    /// Dropping the future before it completes leaves the counter untouched.
    pub async fn acquire<F>(&self, exit_time: F) -> Result<Duration, GateError>
    where
        F: Fn() -> Duration,
    {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not missed.
            notified.as_mut().enable();

            {
                let mut slots = self.slots.lock();
                if let Some(exit) = Self::admit(&mut slots, &exit_time)? {
                    return Ok(exit);
                }
            }

            notified.await;
        }
    }

    /// Return expired permits.
    ///
    /// `count_due` inspects the queue and reports how many leading entries have
    /// expired; those entries are then removed and their permits released in
    /// one step. Returns the number released and the next outstanding exit.
    /// Nothing is released once the counter is closed.
    pub fn reclaim<F>(&self, count_due: F) -> (usize, Option<Duration>)
    where
        F: FnOnce(&ExpiryQueue) -> usize,
    {
        let (released, next_exit) = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return (0, None);
            }
            let due = count_due(&slots.pending);
            let released = slots.pending.pop_front_n(due);
            slots.available += released;
            debug_assert_eq!(slots.available + slots.pending.len(), self.capacity);
            (released, slots.pending.peek())
        };

        if released > 0 {
            self.wake_all();
        }
        (released, next_exit)
    }

    /// Close the counter, waking every waiter.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        {
            let mut slots = self.slots.lock();
            if slots.closed {
                return false;
            }
            slots.closed = true;
        }
        self.wake_all();
        true
    }

    fn admit<F>(slots: &mut Slots, exit_time: &F) -> Result<Option<Duration>, GateError>
    where
        F: Fn() -> Duration,
    {
        if slots.closed {
            return Err(GateError::Disposed);
        }
        if slots.available == 0 {
            return Ok(None);
        }
        slots.available -= 1;
        Ok(Some(slots.pending.push(exit_time())))
    }

    fn wake_all(&self) {
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }
}
