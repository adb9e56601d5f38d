//! Turnstile - Sliding-Window Admission Control
//!
//! This crate implements a gate that bounds how many operations may be
//! admitted within a rolling time window. Callers wait for admission either
//! by blocking a thread or by suspending an async task, optionally bounded by
//! a timeout and a cancellation token. A background task on the tokio runtime
//! returns each permit once its window has passed.

pub mod config;
pub mod error;
pub mod gate;
