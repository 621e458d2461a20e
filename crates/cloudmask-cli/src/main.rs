//! cloudmask CLI
//!
//! Masks cloud resource identifiers in text or JSON, scans text for
//! identifiers that escaped masking, and consumes gateway telemetry from the
//! Redis event bus.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cloudmask_masking::{MaskingEngine, PatternCatalog};
use cloudmask_telemetry::{LoggingHandler, RedisTransport, TelemetrySubscriber, Transport};
use metrics_exporter_prometheus::PrometheusHandle;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

mod config;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "cloudmask")]
#[command(about = "Reversible masking of cloud resource identifiers", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "cloudmask.yaml", global = true)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mask identifiers in text or JSON read from a file or stdin
    Mask(MaskArgs),

    /// Report identifiers present in text; exits with 1 when any are found
    Scan(InputArgs),

    /// Consume telemetry events from the event bus until interrupted
    Subscribe(SubscribeArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Input file; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MaskArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Treat the input as JSON and mask every string value
    #[arg(long)]
    json: bool,

    /// Print the token mappings to stderr
    #[arg(long)]
    show_mappings: bool,
}

#[derive(Args, Debug)]
struct SubscribeArgs {
    /// Redis host
    #[arg(long, env = "CLOUDMASK_REDIS_HOST")]
    host: Option<String>,

    /// Redis port
    #[arg(long)]
    port: Option<u16>,

    /// Maximum events dispatched per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batch interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seconds between health and statistics log lines
    #[arg(long, default_value = "30")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;

    init_tracing(cli.verbose, &config.logging.level);

    let metrics_handle = if cli.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let code = match cli.command {
        Command::Mask(args) => run_mask(&config, &args)?,
        Command::Scan(args) => run_scan(&config, &args)?,
        Command::Subscribe(args) => run_subscribe(&config, &args).await?,
    };

    if let Some(handle) = metrics_handle {
        eprintln!("{}", handle.render());
    }

    Ok(code)
}

fn build_engine(config: &AppConfig) -> Result<MaskingEngine> {
    let catalog = PatternCatalog::from_config(&config.masking)
        .context("Failed to build pattern catalog")?;
    info!(patterns = catalog.len(), "Pattern catalog loaded");
    Ok(MaskingEngine::with_catalog(Arc::new(catalog))?)
}

fn read_input(args: &InputArgs) -> Result<String> {
    match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn run_mask(config: &AppConfig, args: &MaskArgs) -> Result<ExitCode> {
    let engine = build_engine(config)?;
    let input = read_input(&args.input)?;
    let mut stdout = std::io::stdout().lock();

    if args.json {
        let value: serde_json::Value =
            serde_json::from_str(&input).context("Input is not valid JSON")?;
        let masked = engine.mask_value(&value)?;
        serde_json::to_writer_pretty(&mut stdout, &masked)?;
        writeln!(stdout)?;
    } else {
        let report = engine.mask_with_report(&input)?;
        stdout.write_all(report.masked.as_bytes())?;
        info!(
            total_patterns = report.total_patterns,
            patterns = ?report.patterns_applied,
            elapsed_us = report.processing_time.as_micros() as u64,
            "Masking complete"
        );
    }
    stdout.flush()?;

    if args.show_mappings {
        let mut stderr = std::io::stderr().lock();
        for entry in engine.store().entries() {
            writeln!(
                stderr,
                "{:<28} {:<20} {}",
                entry.token, entry.category, entry.original
            )?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn run_scan(config: &AppConfig, args: &InputArgs) -> Result<ExitCode> {
    let engine = build_engine(config)?;
    let input = read_input(args)?;
    let leaks = engine.scan_for_leaks(&input);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &leaks)?;
    writeln!(stdout)?;

    if leaks.is_empty() {
        info!("No identifiers found");
        Ok(ExitCode::SUCCESS)
    } else {
        let total: usize = leaks.iter().map(|l| l.count).sum();
        warn!(categories = leaks.len(), total, "Identifiers found");
        Ok(ExitCode::from(1))
    }
}

async fn run_subscribe(config: &AppConfig, args: &SubscribeArgs) -> Result<ExitCode> {
    let mut subscriber_config = config.subscriber();
    if let Some(host) = &args.host {
        subscriber_config.transport.host = host.clone();
    }
    if let Some(port) = args.port {
        subscriber_config.transport.port = port;
    }
    if let Some(batch_size) = args.batch_size {
        subscriber_config.processing.batch_size = batch_size;
    }
    if let Some(interval_ms) = args.interval_ms {
        subscriber_config.processing.interval_ms = interval_ms;
    }

    info!(endpoint = %subscriber_config.transport.display_target(), "Starting telemetry subscriber");

    let transport: Arc<dyn Transport> =
        Arc::new(RedisTransport::new(subscriber_config.transport.clone())?);
    let subscriber = TelemetrySubscriber::new(subscriber_config, transport)?;
    subscriber.register(Arc::new(LoggingHandler));
    subscriber
        .connect()
        .await
        .context("Failed to connect to the event bus")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let period = Duration::from_secs(args.stats_interval.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Shutdown signal received, stopping subscriber...");
                break;
            }
            _ = ticker.tick() => {
                let health = subscriber.health_check().await;
                info!(
                    healthy = health.is_healthy(),
                    total_events = health.stats.total_events,
                    errors = health.stats.errors,
                    dropped = health.stats.dropped,
                    buffered = health.stats.buffer_size,
                    events_per_second = health.stats.events_per_second,
                    "Subscriber status"
                );
            }
        }
    }

    subscriber.disconnect().await?;

    // Deliver whatever was received before the shutdown.
    while subscriber.stats().buffer_size > 0 {
        subscriber.run_batch().await;
    }

    println!("{}", serde_json::to_string_pretty(&subscriber.stats())?);
    info!("Subscriber shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging on stderr, keeping stdout for command output
fn init_tracing(verbose: bool, level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("cloudmask=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("cloudmask={}", level)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize the Prometheus recorder and return a handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "cloudmask_masked_values_total",
        "Unique values masked per call, by category"
    );
    metrics::describe_histogram!(
        "cloudmask_masking_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent masking one text"
    );
    metrics::describe_counter!(
        "cloudmask_restored_tokens_total",
        "Tokens restored to their originals"
    );
    metrics::describe_counter!(
        "cloudmask_events_received_total",
        "Telemetry messages received from the event bus"
    );
    metrics::describe_counter!(
        "cloudmask_event_errors_total",
        "Telemetry messages that could not be processed"
    );
    metrics::describe_counter!(
        "cloudmask_events_dropped_total",
        "Telemetry messages evicted from a full buffer"
    );

    info!("Metrics recorder initialized");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_mask_flags() {
        let cli = Cli::try_parse_from([
            "cloudmask",
            "mask",
            "--input",
            "prompt.txt",
            "--json",
            "--show-mappings",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Command::Mask(args) => {
                assert!(args.json);
                assert!(args.show_mappings);
                assert_eq!(args.input.input, Some(PathBuf::from("prompt.txt")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscribe_overrides() {
        let cli = Cli::try_parse_from([
            "cloudmask",
            "--config",
            "prod.yaml",
            "subscribe",
            "--port",
            "6380",
            "--batch-size",
            "25",
        ])
        .unwrap();

        assert_eq!(cli.config, "prod.yaml");
        let Command::Subscribe(args) = cli.command else {
            panic!("expected subscribe");
        };
        assert_eq!(args.port, Some(6380));
        assert_eq!(args.batch_size, Some(25));
        assert_eq!(args.stats_interval, 30);
    }
}
