//! Background reclamation of expired permits.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::clock::Clock;
use super::counter::AdmissionCounter;
use super::observer::{GateEvent, GateObserver, StatsRecorder};

/// Decides when outstanding admissions expire and when the reclaimer wakes.
pub trait ReclaimPolicy: Send + Sync + 'static {
    /// Whether an admission exiting at `exit_time` can be reclaimed at `now`.
    fn is_due(&self, exit_time: Duration, now: Duration) -> bool {
        exit_time <= now
    }

    /// How long to sleep after a pass, given the earliest remaining exit time.
    fn next_wake(&self, next_exit: Option<Duration>, now: Duration, window: Duration) -> Duration;
}

/// Reclaim each admission at its exit time and sleep until the next one.
///
/// With nothing outstanding the reclaimer sleeps one full window, since no
/// admission made after the pass can expire sooner than that.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarliestExpiry;

impl ReclaimPolicy for EarliestExpiry {
    fn next_wake(&self, next_exit: Option<Duration>, now: Duration, window: Duration) -> Duration {
        match next_exit {
            Some(exit) => exit.saturating_sub(now),
            None => window,
        }
    }
}

/// Result of one reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReclaimPass {
    /// Permits returned to the counter
    pub released: usize,
    /// Delay before the next pass
    pub next_wake: Duration,
}

/// The single background task returning expired permits to the counter.
pub(crate) struct Reclaimer {
    counter: Arc<AdmissionCounter>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn ReclaimPolicy>,
    observer: Arc<dyn GateObserver>,
    stats: Arc<StatsRecorder>,
    window: Duration,
    fault_backoff: Duration,
    shutdown: CancellationToken,
}

impl Reclaimer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        counter: Arc<AdmissionCounter>,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn ReclaimPolicy>,
        observer: Arc<dyn GateObserver>,
        stats: Arc<StatsRecorder>,
        window: Duration,
        fault_backoff: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            counter,
            clock,
            policy,
            observer,
            stats,
            window,
            fault_backoff: fault_backoff.min(window),
            shutdown,
        }
    }

    /// Spawn the reclamation loop on `handle`.
    pub(crate) fn spawn(self, handle: &Handle) -> JoinHandle<()> {
        handle.spawn(self.run())
    }

    /// Release every due admission and work out the next wake delay.
    pub(crate) fn reclaim_due(&self) -> ReclaimPass {
        let now = self.clock.elapsed();
        let (released, next_exit) = self
            .counter
            .reclaim(|queue| queue.count_due(|exit| self.policy.is_due(exit, now)));

        // Read the clock again so time spent in the pass is not slept twice.
        let next_wake = self
            .policy
            .next_wake(next_exit, self.clock.elapsed(), self.window);

        if released > 0 {
            self.emit(GateEvent::Reclaimed {
                released,
                next_wake,
            });
        }

        ReclaimPass {
            released,
            next_wake,
        }
    }

    /// Run passes until the shutdown token fires.
    ///
    /// A pass that panics is reported and retried after the fault backoff;
    /// only the shutdown token ends the loop.
    pub(crate) async fn run(self) {
        debug!(window = ?self.window, "Reclaimer started");

        loop {
            let delay = match panic::catch_unwind(AssertUnwindSafe(|| self.reclaim_due())) {
                Ok(pass) => {
                    trace!(
                        released = pass.released,
                        next_wake = ?pass.next_wake,
                        "Reclamation pass complete"
                    );
                    pass.next_wake
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        error = %message,
                        retry_in = ?self.fault_backoff,
                        "Reclamation pass failed, retrying"
                    );
                    self.report_fault(message);
                    self.fault_backoff
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Reclaimer stopped");
    }

    fn report_fault(&self, message: String) {
        let event = GateEvent::Fault {
            message,
            retry_in: self.fault_backoff,
        };
        self.stats.record(&event);
        // The observer may be what failed; a second panic must not end the loop.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| self.observer.on_event(&event)));
    }

    fn emit(&self, event: GateEvent) {
        self.stats.record(&event);
        self.observer.on_event(&event);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
