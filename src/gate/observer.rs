//! Gate events, observers and outcome statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace};

/// Something observable that happened inside a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A caller was admitted; its permit returns at `exit_time`
    Admitted { exit_time: Duration },
    /// A caller gave up after its timeout elapsed
    TimedOut,
    /// A caller's cancellation signal fired before admission
    Cancelled,
    /// The reclaimer returned `released` permits
    Reclaimed {
        released: usize,
        next_wake: Duration,
    },
    /// A reclamation pass failed; the reclaimer retries after `retry_in`
    Fault { message: String, retry_in: Duration },
    /// The gate was disposed
    Disposed,
}

/// Receives [`GateEvent`]s as they happen.
///
/// Called on admitting threads and on the reclaimer task, outside the gate's
/// internal lock. Implementations should return quickly.
pub trait GateObserver: Send + Sync + 'static {
    /// Handle one event.
    fn on_event(&self, event: &GateEvent);
}

/// Default observer: logs each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl GateObserver for TracingObserver {
    fn on_event(&self, event: &GateEvent) {
        match event {
            GateEvent::Admitted { exit_time } => {
                trace!(exit_time = ?exit_time, "Admission granted");
            }
            GateEvent::TimedOut => debug!("Admission timed out"),
            GateEvent::Cancelled => debug!("Admission cancelled"),
            GateEvent::Reclaimed {
                released,
                next_wake,
            } => {
                trace!(released = released, next_wake = ?next_wake, "Permits reclaimed");
            }
            GateEvent::Fault { message, retry_in } => {
                error!(error = %message, retry_in = ?retry_in, "Reclaimer fault");
            }
            GateEvent::Disposed => info!("Gate disposed"),
        }
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GateObserver for NoopObserver {
    fn on_event(&self, _event: &GateEvent) {}
}

/// Counters of gate outcomes.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    admitted: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    reclaimed: AtomicU64,
    faults: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record(&self, event: &GateEvent) {
        let counter = match event {
            GateEvent::Admitted { .. } => &self.admitted,
            GateEvent::TimedOut => &self.timed_out,
            GateEvent::Cancelled => &self.cancelled,
            GateEvent::Reclaimed { released, .. } => {
                self.reclaimed.fetch_add(*released as u64, Ordering::Relaxed);
                return;
            }
            GateEvent::Fault { .. } => &self.faults,
            GateEvent::Disposed => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self, available: usize, outstanding: usize) -> GateStats {
        GateStats {
            available,
            outstanding,
            admitted: self.admitted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a gate's occupancy and lifetime outcome counts.
///
/// `available` and `outstanding` are read together; the outcome counts are
/// individually accurate but not mutually consistent under contention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Permits grantable right now
    pub available: usize,
    /// Admissions not yet reclaimed
    pub outstanding: usize,
    /// Successful admissions
    pub admitted: u64,
    /// Waits that ended in a timeout
    pub timed_out: u64,
    /// Waits that ended in cancellation
    pub cancelled: u64,
    /// Permits returned by the reclaimer
    pub reclaimed: u64,
    /// Reclamation passes that failed
    pub faults: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recorder_counts_events() {
        let recorder = StatsRecorder::default();
        recorder.record(&GateEvent::Admitted {
            exit_time: Duration::from_secs(1),
        });
        recorder.record(&GateEvent::Admitted {
            exit_time: Duration::from_secs(2),
        });
        recorder.record(&GateEvent::TimedOut);
        recorder.record(&GateEvent::Cancelled);
        recorder.record(&GateEvent::Reclaimed {
            released: 2,
            next_wake: Duration::from_secs(1),
        });
        recorder.record(&GateEvent::Fault {
            message: "boom".to_string(),
            retry_in: Duration::from_millis(100),
        });
        recorder.record(&GateEvent::Disposed);

        let stats = recorder.snapshot(3, 1);
        assert_eq!(
            stats,
            GateStats {
                available: 3,
                outstanding: 1,
                admitted: 2,
                timed_out: 1,
                cancelled: 1,
                reclaimed: 2,
                faults: 1,
            }
        );
        assert_eq!(recorder.faults(), 1);
    }

    #[test]
    fn test_observers_accept_all_events() {
        let events = [
            GateEvent::Admitted {
                exit_time: Duration::ZERO,
            },
            GateEvent::TimedOut,
            GateEvent::Cancelled,
            GateEvent::Reclaimed {
                released: 1,
                next_wake: Duration::ZERO,
            },
            GateEvent::Fault {
                message: "x".to_string(),
                retry_in: Duration::ZERO,
            },
            GateEvent::Disposed,
        ];
        for event in &events {
            TracingObserver.on_event(event);
            NoopObserver.on_event(event);
        }
    }
}
