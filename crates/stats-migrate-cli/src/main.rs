//! stats-migrate CLI - document store to relational store migration.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use stats_migrate::{
    cursor, writer, BackfillJob, BatchWriter, Config, ImpressionExportJob, MigrateError,
    ReconciliationReporter, ReferenceResolver, SourceStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "stats-migrate")]
#[command(about = "Activity event migration from the search index to PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Override source store base URL
    #[arg(long)]
    source_url: Option<String>,

    /// Override source index name
    #[arg(long)]
    source_index: Option<String>,

    /// Override target database host
    #[arg(long)]
    target_host: Option<String>,

    /// Override target database name
    #[arg(long)]
    target_database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill every historical event into the activities table
    Backfill,

    /// Export pending print events into the impressions table
    ExportImpressions,

    /// Compare per-day event counts between both stores
    Reconcile {
        /// First day of the window (inclusive), e.g. 2024-03-01
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the window (inclusive)
        #[arg(long)]
        to: NaiveDate,
    },

    /// Probe the target for a random sample of source document ids
    SpotCheck {
        /// First day of the window (inclusive)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the window (inclusive)
        #[arg(long)]
        to: NaiveDate,

        /// Number of ids to sample
        #[arg(long, default_value = "100")]
        sample: usize,
    },

    /// Test connections to both stores
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(MigrateError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Apply overrides
    if let Some(url) = cli.source_url {
        config.source.url = url;
    }
    if let Some(index) = cli.source_index {
        config.source.index = index;
    }
    if let Some(host) = cli.target_host {
        config.target.host = host;
    }
    if let Some(database) = cli.target_database {
        config.target.database = database;
    }
    config.validate()?;

    let cancel_token = setup_signal_handler().await?;

    let source = SourceStore::new(&config.source, config.migration.lookup_retry_attempts)?;

    match cli.command {
        Commands::Backfill => {
            let pool = writer::connect(&config.target, config.migration.max_pg_connections).await?;
            let cursor = cursor::create_backend(&config.migration, &pool).await?;
            let job = BackfillJob::new(
                source,
                BatchWriter::new(pool),
                cursor,
                config.migration.backfill_batch_size,
            );

            let report = job.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nBackfill completed!");
                println!("  Events: {}", report.events_seen);
                println!("  Rows written: {}", report.rows_written);
                println!("  Batches: {}", report.batches);
                if let Some(w) = report.watermark {
                    println!("  Watermark: {}", w.to_rfc3339());
                }
                println!("  Duration: {:.2}s", report.duration_secs);
            }
        }

        Commands::ExportImpressions => {
            let pool = writer::connect(&config.target, config.migration.max_pg_connections).await?;
            let cursor = cursor::create_backend(&config.migration, &pool).await?;
            let mut resolver = ReferenceResolver::new(pool.clone());
            let job = ImpressionExportJob::new(
                source,
                BatchWriter::new(pool),
                cursor,
                config.migration.impression_batch_size,
            );

            let report = job.run(&mut resolver, cancel_token).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nImpression export completed!");
                println!("  Events: {}", report.events_seen);
                println!("  Exported: {}", report.exported);
                println!("  Failed: {}", report.failed);
                println!("  Rows written: {}", report.rows_written);
                println!("  Duration: {:.2}s", report.duration_secs);
            }
        }

        Commands::Reconcile { from, to } => {
            let (from, to) = day_window(from, to)?;
            let pool = writer::connect(&config.target, config.migration.max_pg_connections).await?;
            let reporter = ReconciliationReporter::new(source, BatchWriter::new(pool));

            let report = reporter.compare_counts(from, to).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nReconciliation Results:");
                for bucket in &report.buckets {
                    let marker = if bucket.matches() { " " } else { "!" };
                    println!(
                        "  {} {} {:<10} source={:<8} target={}",
                        marker,
                        bucket.day,
                        bucket.event_type,
                        bucket.source_count,
                        bucket.target_count
                    );
                }
                println!(
                    "\n  Totals: source={} target={} mismatched buckets={}",
                    report.source_total, report.target_total, report.discrepancies
                );
            }

            if report.discrepancies > 0 {
                return Err(MigrateError::export(
                    "reconcile",
                    format!("{} mismatched buckets", report.discrepancies),
                ));
            }
        }

        Commands::SpotCheck { from, to, sample } => {
            let (from, to) = day_window(from, to)?;
            let pool = writer::connect(&config.target, config.migration.max_pg_connections).await?;
            let reporter = ReconciliationReporter::new(source, BatchWriter::new(pool));

            let checks = reporter.spot_check(from, to, sample).await?;
            let misses: Vec<&str> = checks
                .iter()
                .filter(|c| !c.found)
                .map(|c| c.id.as_str())
                .collect();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("\nSpot Check Results:");
                println!("  Sampled: {}", checks.len());
                println!("  Missing from target: {}", misses.len());
                for id in &misses {
                    println!("    {}", id);
                }
            }

            if !misses.is_empty() {
                return Err(MigrateError::export(
                    "spot-check",
                    format!("{} sampled ids missing from target", misses.len()),
                ));
            }
        }

        Commands::HealthCheck => {
            let start = Instant::now();
            let source_result = source.ping().await;
            let source_latency_ms = start.elapsed().as_millis() as u64;

            let start = Instant::now();
            let target_result =
                writer::connect(&config.target, config.migration.max_pg_connections).await;
            let target_latency_ms = start.elapsed().as_millis() as u64;

            let healthy = source_result.is_ok() && target_result.is_ok();

            if cli.output_json {
                let result = serde_json::json!({
                    "source_connected": source_result.is_ok(),
                    "source_latency_ms": source_latency_ms,
                    "source_error": source_result.as_ref().err().map(|e| e.to_string()),
                    "target_connected": target_result.is_ok(),
                    "target_latency_ms": target_latency_ms,
                    "target_error": target_result.as_ref().err().map(|e| e.to_string()),
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (search index): {} ({}ms)",
                    if source_result.is_ok() { "OK" } else { "FAILED" },
                    source_latency_ms
                );
                if let Err(ref e) = source_result {
                    println!("    Error: {}", e);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if target_result.is_ok() { "OK" } else { "FAILED" },
                    target_latency_ms
                );
                if let Err(ref e) = target_result {
                    println!("    Error: {}", e);
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Turn an inclusive day range into a half-open UTC timestamp window.
fn day_window(from: NaiveDate, to: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), MigrateError> {
    if to < from {
        return Err(MigrateError::Config(format!(
            "--to ({}) must not precede --from ({})",
            to, from
        )));
    }
    let start = from.and_time(NaiveTime::MIN).and_utc();
    let end = to
        .checked_add_days(Days::new(1))
        .ok_or_else(|| MigrateError::Config(format!("--to ({}) is out of range", to)))?
        .and_time(NaiveTime::MIN)
        .and_utc();
    Ok((start, end))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (Kubernetes/Airflow shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    // SIGINT handler (Ctrl-C)
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing the current batch...");
        token_int.cancel();
    });

    // SIGTERM handler (Kubernetes/Airflow)
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing the current batch...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only SIGINT/Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Finishing the current batch...");
        token.cancel();
    });

    Ok(cancel_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_window_is_half_open() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (start, end) = day_window(from, to).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-04-01T00:00:00+00:00");
    }

    #[test]
    fn test_day_window_rejects_inverted_range() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(day_window(from, to).is_err());
    }
}
