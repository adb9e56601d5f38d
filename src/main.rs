use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::gate::{Admission, AdmissionControl, CancellationToken, Gate, Timeout};

/// Push a burst of requests through a sliding-window gate and report the outcomes.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Admissions allowed per window
    #[arg(long)]
    capacity: Option<usize>,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Number of requests to issue
    #[arg(long)]
    requests: Option<usize>,

    /// Per-request timeout in milliseconds (default: wait forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// How many of the requests wait on blocking threads instead of async tasks
    #[arg(long, default_value_t = 0)]
    blocking: usize,

    /// Log filter directive
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Default)]
struct Tally {
    admitted: usize,
    timed_out: usize,
    cancelled: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: Result<Admission, turnstile::error::GateError>) {
        match outcome {
            Ok(Admission::Admitted) => self.admitted += 1,
            Ok(Admission::TimedOut) => self.timed_out += 1,
            Ok(Admission::Cancelled) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.gate.capacity = capacity;
    }
    if let Some(window_ms) = args.window_ms {
        config.gate.window_ms = window_ms;
    }
    if let Some(requests) = args.requests {
        config.demo.requests = requests;
    }
    if args.timeout_ms.is_some() {
        config.demo.timeout_ms = args.timeout_ms;
    }

    // Initialize tracing
    let filter = args
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter)?)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Turnstile demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let gate = Arc::new(Gate::from_config(&config.gate)?);
    info!(
        capacity = gate.capacity(),
        window = ?gate.window(),
        requests = config.demo.requests,
        "Gate initialized"
    );

    let timeout = Timeout::from(config.demo.timeout_ms.map(Duration::from_millis));
    let cancel = CancellationToken::new();
    let started = tokio::time::Instant::now();

    let mut handles = Vec::with_capacity(config.demo.requests);
    let mut rng = rand::thread_rng();
    for id in 0..config.demo.requests {
        let delay = Duration::from_millis(rng.gen_range(0..=config.demo.spread_ms));
        let gate = gate.clone();
        let cancel = cancel.clone();

        if id < args.blocking {
            handles.push(tokio::task::spawn_blocking(move || {
                std::thread::sleep(delay);
                gate.wait_with(timeout)
            }));
        } else {
            let backend: Arc<dyn AdmissionControl> = gate;
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                backend.admit(timeout, &cancel).await
            }));
        }
    }

    let outcomes = tokio::select! {
        outcomes = futures::future::join_all(handles) => outcomes,
        _ = shutdown_signal() => {
            warn!("Interrupted, cancelling outstanding requests");
            cancel.cancel();
            gate.dispose();
            return Ok(());
        }
    };

    let mut tally = Tally::default();
    for outcome in outcomes {
        tally.record(outcome?);
    }

    let stats = gate.stats();
    info!(
        elapsed = ?started.elapsed(),
        admitted = tally.admitted,
        timed_out = tally.timed_out,
        cancelled = tally.cancelled,
        failed = tally.failed,
        reclaimed = stats.reclaimed,
        outstanding = stats.outstanding,
        "Demo complete"
    );

    gate.shutdown().await;
    info!("Turnstile demo stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
