//! Error types for Turnstile.

use thiserror::Error;

/// Errors raised synchronously by a [`Gate`](crate::gate::Gate).
///
/// Timeouts and cancellations are not errors; they are reported through
/// [`Admission`](crate::gate::Admission).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Capacity must admit at least one operation
    #[error("Capacity must be a positive integer")]
    InvalidCapacity,

    /// Window must be a non-zero duration
    #[error("Window must be a positive duration")]
    InvalidWindow,

    /// A finite wait timeout must be greater than zero
    #[error("Timeout must be a positive duration")]
    InvalidTimeout,

    /// The gate has been disposed
    #[error("Gate has already been disposed")]
    Disposed,

    /// No tokio runtime was available to host the reclaimer
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Crate-level error type, used by configuration loading and the binary.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gate errors
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
