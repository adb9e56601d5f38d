//! Sliding-window admission control.

mod backend;
mod clock;
mod counter;
mod expiry;
mod limiter;
mod observer;
mod reclaimer;

pub use backend::AdmissionControl;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use counter::{AdmissionCounter, SlotSnapshot};
pub use expiry::ExpiryQueue;
pub use limiter::{Admission, Gate, GateBuilder, GateState, Timeout};
pub use observer::{GateEvent, GateObserver, GateStats, NoopObserver, TracingObserver};
pub use reclaimer::{EarliestExpiry, ReclaimPolicy};

pub use tokio_util::sync::CancellationToken;
