//! End-to-end admission scenarios against a running gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use turnstile::error::GateError;
use turnstile::gate::{
    Admission, CancellationToken, EarliestExpiry, Gate, GateEvent, GateObserver, GateState,
    ReclaimPolicy, Timeout,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<GateEvent>>,
}

impl GateObserver for Recorder {
    fn on_event(&self, event: &GateEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Fails the first pass it is consulted on, then behaves like `EarliestExpiry`.
#[derive(Default)]
struct FailsOnce {
    calls: AtomicUsize,
}

impl ReclaimPolicy for FailsOnce {
    fn next_wake(&self, next_exit: Option<Duration>, now: Duration, window: Duration) -> Duration {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("policy failed");
        }
        EarliestExpiry.next_wake(next_exit, now, window)
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_capacity_two_reclaims_first_slot_after_window() {
    let gate = Gate::new(2, Duration::from_secs(1)).unwrap();

    assert_eq!(gate.wait_async().await.unwrap(), Admission::Admitted);
    assert_eq!(gate.wait_async().await.unwrap(), Admission::Admitted);
    assert_eq!(gate.try_wait().unwrap(), Admission::TimedOut);
    assert_eq!(gate.available(), 0);

    tokio::time::sleep(Duration::from_millis(1010)).await;

    assert_eq!(gate.try_wait().unwrap(), Admission::Admitted);
    assert_eq!(gate.outstanding(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_reports_cancellation() {
    let gate = Arc::new(Gate::new(1, Duration::from_millis(500)).unwrap());
    assert_eq!(gate.wait_async().await.unwrap(), Admission::Admitted);

    let cancel = CancellationToken::new();
    let waiter = {
        let gate = gate.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.wait_async_cancellable(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gate.available(), 0);

    cancel.cancel();
    assert_eq!(waiter.await.unwrap().unwrap(), Admission::Cancelled);
    assert_eq!(gate.available(), 0);
    assert_eq!(gate.outstanding(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_and_cancellation_leave_no_trace() {
    let gate = Gate::new(1, Duration::from_secs(1)).unwrap();
    gate.try_wait().unwrap();
    let before = gate.stats();

    let cancel = CancellationToken::new();
    let timed_out = gate
        .wait_async_with(Timeout::After(Duration::from_millis(300)), &cancel)
        .await
        .unwrap();
    assert_eq!(timed_out, Admission::TimedOut);

    let cancel_soon = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_soon.cancel();
    });
    let cancelled = gate
        .wait_async_with(Timeout::After(Duration::from_millis(300)), &cancel)
        .await
        .unwrap();
    assert_eq!(cancelled, Admission::Cancelled);

    let after = gate.stats();
    assert_eq!(after.available, before.available);
    assert_eq!(after.outstanding, before.outstanding);
    assert_eq!(after.admitted, 1);
    assert_eq!(after.timed_out, 1);
    assert_eq!(after.cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_lifecycle() {
    let recorder = Arc::new(Recorder::default());
    let gate = Gate::builder(1, Duration::from_millis(200))
        .observer(recorder.clone())
        .build()
        .unwrap();

    gate.try_wait().unwrap();
    gate.try_wait().unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    gate.shutdown().await;

    let events = recorder.events.lock().clone();
    assert_eq!(
        events[0],
        GateEvent::Admitted {
            exit_time: Duration::from_millis(200)
        }
    );
    assert_eq!(events[1], GateEvent::TimedOut);
    assert!(matches!(
        events[2],
        GateEvent::Reclaimed { released: 1, .. }
    ));
    assert_eq!(events.last(), Some(&GateEvent::Disposed));
}

#[tokio::test(start_paused = true)]
async fn test_reclaimer_fault_is_reported_and_gate_recovers() {
    let recorder = Arc::new(Recorder::default());
    let gate = Gate::builder(1, Duration::from_millis(100))
        .policy(FailsOnce::default())
        .fault_backoff(Duration::from_millis(10))
        .observer(recorder.clone())
        .build()
        .unwrap();

    assert_eq!(gate.try_wait().unwrap(), Admission::Admitted);
    assert_eq!(gate.try_wait().unwrap(), Admission::TimedOut);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(gate.is_reclaimer_running());
    assert_eq!(gate.available(), 1);
    assert_eq!(gate.stats().faults, 1);
    assert_eq!(gate.stats().reclaimed, 1);
    let events = recorder.events.lock().clone();
    assert!(events.iter().any(|event| matches!(
        event,
        GateEvent::Fault { message, retry_in }
            if message == "policy failed" && *retry_in == Duration::from_millis(10)
    )));

    assert_eq!(gate.try_wait().unwrap(), Admission::Admitted);
    gate.shutdown().await;
}

#[test]
fn test_blocking_waits_follow_window() {
    let rt = runtime();
    let gate = Gate::builder(2, Duration::from_millis(200))
        .runtime(rt.handle().clone())
        .build()
        .unwrap();

    assert_eq!(gate.wait().unwrap(), Admission::Admitted);
    assert_eq!(gate.wait().unwrap(), Admission::Admitted);

    let started = Instant::now();
    assert_eq!(
        gate.wait_timeout(Duration::from_millis(50)).unwrap(),
        Admission::TimedOut
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(gate.available() + gate.outstanding(), 2);

    assert_eq!(
        gate.wait_timeout(Duration::from_secs(5)).unwrap(),
        Admission::Admitted
    );
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(gate.available() + gate.outstanding(), 2);
    assert!(gate.outstanding() >= 1);
}

#[test]
fn test_blocking_zero_timeout_is_invalid() {
    let rt = runtime();
    let gate = Gate::builder(1, Duration::from_secs(1))
        .runtime(rt.handle().clone())
        .build()
        .unwrap();

    assert_eq!(
        gate.wait_timeout(Duration::ZERO),
        Err(GateError::InvalidTimeout)
    );
    assert_eq!(gate.available(), 1);
}

#[test]
fn test_dispose_releases_blocked_threads() {
    let rt = runtime();
    let gate = Arc::new(
        Gate::builder(1, Duration::from_secs(60))
            .runtime(rt.handle().clone())
            .build()
            .unwrap(),
    );
    gate.wait().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    gate.dispose();
    gate.dispose();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Err(GateError::Disposed));
    }
    assert_eq!(gate.state(), GateState::Disposed);
    assert_eq!(gate.wait(), Err(GateError::Disposed));
}

#[test]
fn test_invariant_holds_under_mixed_contention() {
    const CAPACITY: usize = 4;
    const THREADS: usize = 6;
    const TASKS: usize = 18;

    let rt = runtime();
    let gate = Arc::new(
        Gate::builder(CAPACITY, Duration::from_millis(30))
            .runtime(rt.handle().clone())
            .build()
            .unwrap(),
    );

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_timeout(Duration::from_secs(10)))
        })
        .collect();

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let gate = gate.clone();
            rt.spawn(async move { gate.wait_async().await })
        })
        .collect();

    // Sample the invariant while the waiters drain through the gate
    let deadline = Instant::now() + Duration::from_millis(150);
    while Instant::now() < deadline {
        let stats = gate.stats();
        assert!(stats.available <= CAPACITY);
        assert_eq!(stats.available + stats.outstanding, CAPACITY);
        thread::sleep(Duration::from_millis(1));
    }

    for handle in threads {
        assert_eq!(handle.join().unwrap().unwrap(), Admission::Admitted);
    }
    let outcomes = rt.block_on(futures::future::join_all(tasks));
    for outcome in outcomes {
        assert_eq!(outcome.unwrap().unwrap(), Admission::Admitted);
    }

    let stats = gate.stats();
    assert_eq!(stats.admitted, (THREADS + TASKS) as u64);
    assert_eq!(stats.available + stats.outstanding, CAPACITY);
}
