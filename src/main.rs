use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::RateLimiter;

/// Drive a configured limiter with a stream of admission checks.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// YAML configuration file (GATEKEEPER__* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total number of admission checks to issue
    #[arg(short = 'n', long, default_value_t = 20)]
    requests: usize,

    /// Checks issued concurrently in each round
    #[arg(short = 'j', long, default_value_t = 1)]
    concurrency: usize,

    /// Pause between rounds, in milliseconds
    #[arg(short, long, default_value_t = 0)]
    interval_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// Totals reported at the end of a run.
#[derive(Debug, Default)]
struct Tally {
    admitted: usize,
    rejected: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GatekeeperConfig::load(cli.config.as_deref())?;
    info!(limiter = ?config.limiter, "Configuration loaded");

    let limiter = config.build_limiter().await?;

    let tally = tokio::select! {
        tally = run(limiter, &cli) => tally,
        _ = shutdown_signal() => {
            info!("Stopping early");
            return Ok(());
        }
    };

    info!(
        admitted = tally.admitted,
        rejected = tally.rejected,
        "Run complete"
    );
    println!("admitted={} rejected={}", tally.admitted, tally.rejected);
    Ok(())
}

/// Issue `cli.requests` checks in rounds of `cli.concurrency`.
async fn run(limiter: Arc<dyn RateLimiter>, cli: &Cli) -> Tally {
    let mut tally = Tally::default();
    let round_size = cli.concurrency.max(1);
    let mut issued = 0;

    while issued < cli.requests {
        let batch = round_size.min(cli.requests - issued);
        let checks = (0..batch).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.allow().await }
        });

        for (offset, admitted) in futures::future::join_all(checks).await.into_iter().enumerate() {
            debug!(request = issued + offset + 1, admitted, "Admission decision");
            if admitted {
                tally.admitted += 1;
            } else {
                tally.rejected += 1;
            }
        }
        issued += batch;

        if cli.interval_ms > 0 && issued < cli.requests {
            tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
        }
    }

    tally
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
