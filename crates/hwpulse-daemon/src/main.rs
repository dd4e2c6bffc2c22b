//! hwpulse daemon
//!
//! Samples system utilization on a fixed cadence and reports each sample
//! as a log line or a JSON line.

mod config;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use hwpulse_engine::MetricsPublisher;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, OutputFormat};

#[derive(Parser)]
#[command(name = "hwpulsed")]
#[command(about = "System utilization sampling daemon")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print samples as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging. stdout is reserved for JSON samples.
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => Config::default(),
    };
    if cli.json {
        config.output.format = OutputFormat::Json;
    }

    if let Some(path) = &cli.write_config {
        config.save(path).context("Failed to write configuration")?;
        info!("Wrote configuration to: {}", path.display());
        return Ok(());
    }

    let mut publisher = MetricsPublisher::open(
        config.hardware_backend(),
        config.network_backend(),
        config.engine(),
    )
    .context("Failed to open metrics engine")?;

    let mut reader = publisher.reader();
    let format = config.output.format;
    let reporter = tokio::spawn(async move {
        while let Some(sample) = reader.changed().await {
            if let Err(e) = report::report(format, &sample) {
                warn!("Failed to report sample: {:#}", e);
            }
        }
    });

    publisher.start().context("Failed to start sampling")?;

    // Setup Unix signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    publisher.close().await;
    drop(publisher);
    reporter.await.context("Reporter task failed")?;

    Ok(())
}
