//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GateError, Result, TurnstileError};

/// Top-level configuration for the Turnstile binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Gate configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Demo load configuration
    #[serde(default)]
    pub demo: DemoConfig,

    /// Log filter directive (e.g. "info", "turnstile=debug")
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum admissions outstanding within one window
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Lifetime of one admission in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Delay before the reclaimer retries after a fault, in milliseconds
    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
            fault_backoff_ms: default_fault_backoff_ms(),
        }
    }
}

impl GateConfig {
    /// Create a gate configuration with the default fault backoff.
    ///
    /// The window is stored in whole milliseconds, rounded up so a non-zero
    /// window stays non-zero.
    pub fn new(capacity: usize, window: Duration) -> Self {
        let nanos = window.as_nanos();
        let window_ms = nanos.div_ceil(1_000_000).min(u64::MAX as u128) as u64;
        Self {
            capacity,
            window_ms,
            fault_backoff_ms: default_fault_backoff_ms(),
        }
    }

    /// The admission window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The reclaimer fault backoff.
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), GateError> {
        if self.capacity == 0 {
            return Err(GateError::InvalidCapacity);
        }
        if self.window_ms == 0 {
            return Err(GateError::InvalidWindow);
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    10
}

fn default_window_ms() -> u64 {
    1000
}

fn default_fault_backoff_ms() -> u64 {
    100
}

/// Load generated by the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of requests to push through the gate
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Per-request wait timeout in milliseconds; absent means wait forever
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Upper bound on the random delay before each request is issued
    #[serde(default = "default_spread_ms")]
    pub spread_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            timeout_ms: None,
            spread_ms: default_spread_ms(),
        }
    }
}

fn default_requests() -> usize {
    50
}

fn default_spread_ms() -> u64 {
    500
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading turnstile configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.gate.validate()?;
        Ok(config)
    }
}
