//! The sliding-window admission gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::clock::{Clock, MonotonicClock};
use super::counter::AdmissionCounter;
use super::observer::{GateEvent, GateObserver, GateStats, StatsRecorder, TracingObserver};
use super::reclaimer::{EarliestExpiry, ReclaimPolicy, Reclaimer};
use crate::config::GateConfig;
use crate::error::GateError;

const DEFAULT_FAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of a wait on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// A permit was taken and its exit time recorded
    Admitted,
    /// The timeout elapsed first; nothing was taken
    TimedOut,
    /// The cancellation signal fired first; nothing was taken
    Cancelled,
}

impl Admission {
    /// Whether the caller may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// How long a caller is prepared to wait for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    /// Wait until admitted, cancelled or disposed
    #[default]
    Infinite,
    /// Give up after the duration; must be non-zero
    After(Duration),
}

impl Timeout {
    /// Check the timeout, returning the finite duration if there is one.
    pub fn validate(self) -> Result<Option<Duration>, GateError> {
        match self {
            Timeout::Infinite => Ok(None),
            Timeout::After(d) if d.is_zero() => Err(GateError::InvalidTimeout),
            Timeout::After(d) => Ok(Some(d)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Infinite, Timeout::After)
    }
}

/// Lifecycle state of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Serving waits
    Running,
    /// Disposed; every operation fails
    Disposed,
}

/// Builder for a [`Gate`] with custom collaborators.
pub struct GateBuilder {
    capacity: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn ReclaimPolicy>,
    observer: Arc<dyn GateObserver>,
    fault_backoff: Duration,
    runtime: Option<Handle>,
}

impl GateBuilder {
    fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            clock: Arc::new(MonotonicClock::new()),
            policy: Arc::new(EarliestExpiry),
            observer: Arc::new(TracingObserver),
            fault_backoff: DEFAULT_FAULT_BACKOFF,
            runtime: None,
        }
    }

    /// Use a custom elapsed-time source.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a custom reclamation policy.
    pub fn policy(mut self, policy: impl ReclaimPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Use a custom event observer.
    pub fn observer(mut self, observer: Arc<dyn GateObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Delay before the reclaimer retries a failed pass. Capped at the window.
    pub fn fault_backoff(mut self, backoff: Duration) -> Self {
        self.fault_backoff = backoff;
        self
    }

    /// Host the reclaimer on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the configuration and start the gate.
    pub fn build(self) -> Result<Gate, GateError> {
        if self.capacity == 0 {
            return Err(GateError::InvalidCapacity);
        }
        if self.window.is_zero() {
            return Err(GateError::InvalidWindow);
        }
        let handle = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| GateError::NoRuntime(e.to_string()))?,
        };

        let counter = Arc::new(AdmissionCounter::new(self.capacity));
        let stats = Arc::new(StatsRecorder::default());
        let shutdown = CancellationToken::new();

        let gate = Gate {
            capacity: self.capacity,
            window: self.window,
            counter: counter.clone(),
            clock: self.clock.clone(),
            observer: self.observer.clone(),
            stats: stats.clone(),
            shutdown: shutdown.clone(),
            reclaimer: Mutex::new(None),
        };

        let reclaimer = Reclaimer::new(
            counter,
            self.clock,
            self.policy,
            self.observer,
            stats,
            self.window,
            self.fault_backoff,
            shutdown,
        );
        *gate.reclaimer.lock() = Some(reclaimer.spawn(&handle));

        debug!(
            capacity = gate.capacity,
            window = ?gate.window,
            "Gate started"
        );
        Ok(gate)
    }
}

/// Bounds how many operations may be admitted within a rolling window.
///
/// Each admission holds one of `capacity` permits for exactly `window`, after
/// which a background reclaimer returns it. Waits come in a blocking form for
/// plain threads and a suspending form for async tasks; both share the same
/// permits and semantics. Requires a tokio runtime to host the reclaimer.
///
/// ```no_run
/// # async fn example() -> Result<(), turnstile::error::GateError> {
/// use std::time::Duration;
/// use turnstile::gate::{Admission, Gate};
///
/// let gate = Gate::new(10, Duration::from_secs(1))?;
/// if gate.wait_async_timeout(Duration::from_millis(50)).await? == Admission::Admitted {
///     // at most 10 callers reach this point in any one-second span
/// }
/// # Ok(())
/// # }
/// ```
pub struct Gate {
    capacity: usize,
    window: Duration,
    counter: Arc<AdmissionCounter>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn GateObserver>,
    stats: Arc<StatsRecorder>,
    shutdown: CancellationToken,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("state", &self.state())
            .finish()
    }
}

impl Gate {
    /// Create a gate admitting `capacity` operations per `window`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize, window: Duration) -> Result<Self, GateError> {
        Self::builder(capacity, window).build()
    }

    /// Start building a gate with custom collaborators.
    pub fn builder(capacity: usize, window: Duration) -> GateBuilder {
        GateBuilder::new(capacity, window)
    }

    /// Create a gate from configuration.
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        config.validate()?;
        Self::builder(config.capacity, config.window())
            .fault_backoff(config.fault_backoff())
            .build()
    }

    /// Maximum number of admissions outstanding at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How long each admission holds its permit.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Permits grantable right now.
    pub fn available(&self) -> usize {
        self.counter.snapshot().available
    }

    /// Admissions not yet reclaimed.
    pub fn outstanding(&self) -> usize {
        self.counter.snapshot().outstanding
    }

    /// Occupancy and outcome counts.
    pub fn stats(&self) -> GateStats {
        let snapshot = self.counter.snapshot();
        self.stats.snapshot(snapshot.available, snapshot.outstanding)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GateState {
        if self.counter.is_closed() {
            GateState::Disposed
        } else {
            GateState::Running
        }
    }

    /// Whether the background reclaimer task is still alive.
    pub fn is_reclaimer_running(&self) -> bool {
        self.reclaimer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Take a permit only if one is free right now.
    ///
    /// Returns [`Admission::TimedOut`] when the gate is full.
    pub fn try_wait(&self) -> Result<Admission, GateError> {
        let admitted = self.counter.try_acquire(|| self.exit_time())?;
        Ok(self.finish(admitted.map_or(Admission::TimedOut, |exit| self.admitted(exit))))
    }

    /// Block the current thread until admitted.
    pub fn wait(&self) -> Result<Admission, GateError> {
        self.wait_with(Timeout::Infinite)
    }

    /// Block the current thread until admitted or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Admission, GateError> {
        self.wait_with(Timeout::After(timeout))
    }

    /// Block the current thread until admitted or the timeout elapses.
    ///
    /// Never yields [`Admission::Cancelled`]. Do not call this from an async
    /// task; use [`Gate::wait_async_with`] there.
    pub fn wait_with(&self, timeout: Timeout) -> Result<Admission, GateError> {
        self.ensure_open()?;
        let deadline = timeout
            .validate()?
            .and_then(|d| Instant::now().checked_add(d));

        let admitted = self
            .counter
            .acquire_blocking(deadline, || self.exit_time())?;
        Ok(self.finish(admitted.map_or(Admission::TimedOut, |exit| self.admitted(exit))))
    }

    /// Suspend until admitted.
    pub async fn wait_async(&self) -> Result<Admission, GateError> {
        self.wait_async_with(Timeout::Infinite, &CancellationToken::new())
            .await
    }

    /// Suspend until admitted or `timeout` elapses.
    pub async fn wait_async_timeout(&self, timeout: Duration) -> Result<Admission, GateError> {
        self.wait_async_with(Timeout::After(timeout), &CancellationToken::new())
            .await
    }

    /// Suspend until admitted or `cancel` fires.
    pub async fn wait_async_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Admission, GateError> {
        self.wait_async_with(Timeout::Infinite, cancel).await
    }

    /// Suspend until admitted, the timeout elapses, or `cancel` fires.
    ///
    /// Exactly one of those outcomes is reported, and only
    /// [`Admission::Admitted`] changes the gate's state. A token that has
    /// already fired yields [`Admission::Cancelled`] without touching a permit.
    pub async fn wait_async_with(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> Result<Admission, GateError> {
        self.ensure_open()?;
        let timeout = timeout.validate()?;
        if cancel.is_cancelled() {
            return Ok(self.finish(Admission::Cancelled));
        }

        let acquire = self.counter.acquire(|| self.exit_time());

        // The acquire future commits only in the poll that completes it, so
        // whichever branch wins, the others leave the counter untouched.
        let outcome = match timeout {
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Admission::Cancelled,
                admitted = acquire => self.admitted(admitted?),
            },
            Some(timeout) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Admission::Cancelled,
                admitted = tokio::time::timeout(timeout, acquire) => match admitted {
                    Ok(exit) => self.admitted(exit?),
                    Err(_) => Admission::TimedOut,
                },
            },
        };
        Ok(self.finish(outcome))
    }

    /// Stop the reclaimer and fail every current and future wait.
    ///
    /// Waiters blocked at this point wake and return [`GateError::Disposed`].
    /// Idempotent.
    pub fn dispose(&self) {
        if !self.counter.close() {
            return;
        }
        self.shutdown.cancel();

        let event = GateEvent::Disposed;
        self.stats.record(&event);
        self.observer.on_event(&event);
        info!(capacity = self.capacity, window = ?self.window, "Gate disposed");
    }

    /// Dispose and wait for the reclaimer task to exit.
    pub async fn shutdown(&self) {
        self.dispose();
        let handle = self.reclaimer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "Reclaimer task ended abnormally");
            }
        }
    }

    fn ensure_open(&self) -> Result<(), GateError> {
        if self.counter.is_closed() {
            return Err(GateError::Disposed);
        }
        Ok(())
    }

    fn exit_time(&self) -> Duration {
        self.clock.elapsed().saturating_add(self.window)
    }

    fn admitted(&self, exit_time: Duration) -> Admission {
        let event = GateEvent::Admitted { exit_time };
        self.stats.record(&event);
        self.observer.on_event(&event);
        Admission::Admitted
    }

    fn finish(&self, outcome: Admission) -> Admission {
        let event = match outcome {
            Admission::Admitted => return outcome,
            Admission::TimedOut => GateEvent::TimedOut,
            Admission::Cancelled => GateEvent::Cancelled,
        };
        self.stats.record(&event);
        self.observer.on_event(&event);
        outcome
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.dispose();
    }
}
