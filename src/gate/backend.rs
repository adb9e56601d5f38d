//! Admission trait for abstracting over gate implementations.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::limiter::{Admission, Gate, Timeout};
use crate::error::GateError;

/// Trait for admission control backends.
///
/// Request-handling code depends on this rather than on [`Gate`] directly, so
/// it can be handed a shared gate, a wrapper, or a test double.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Wait for admission, honoring the timeout and the cancellation token.
    async fn admit(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> Result<Admission, GateError>;

    /// Maximum admissions outstanding at once.
    fn capacity(&self) -> usize;
}

#[async_trait]
impl AdmissionControl for Gate {
    async fn admit(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> Result<Admission, GateError> {
        self.wait_async_with(timeout, cancel).await
    }

    fn capacity(&self) -> usize {
        Gate::capacity(self)
    }
}
