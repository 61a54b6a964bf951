// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! File importer and operator tool for the ingestion pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use health_ingest::config::Config;
use health_ingest::services::parser;
use health_ingest::services::pipeline::{dry_run_report, PipelineReport};
use health_ingest::services::{FailureLog, Pipeline, Stager};
use health_ingest::store::Store;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "health-import")]
#[command(author, version, about = "Import Health Auto Export data into InfluxDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (staged payloads, watermarks, failure log)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// InfluxDB URL (default: INFLUXDB_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// InfluxDB token (default: INFLUXDB_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// InfluxDB bucket (default: INFLUXDB_BUCKET)
    #[arg(long, global = true)]
    bucket: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one export file
    Import {
        /// Path to a Health Auto Export JSON file
        file: PathBuf,
        /// Parse and summarize without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Skip raw samples
        #[arg(long)]
        no_raw: bool,
        /// Skip hourly aggregates
        #[arg(long)]
        no_hourly: bool,
        /// Skip daily aggregates
        #[arg(long)]
        no_daily: bool,
    },
    /// Re-run payloads from the failure log
    Replay {
        /// Re-run every staged payload, not just logged failures
        #[arg(long)]
        all: bool,
    },
    /// Show watermarks, staged payloads and pending failures
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = cli.url {
        config.influx_url = Some(url);
    }
    if let Some(token) = cli.token {
        config.influx_token = Some(token);
    }
    if let Some(bucket) = cli.bucket {
        config.influx_bucket = bucket;
    }

    match cli.command {
        Commands::Import {
            file,
            dry_run: true,
            ..
        } => dry_run(&file).await,
        Commands::Import {
            file,
            no_raw,
            no_hourly,
            no_daily,
            ..
        } => {
            config.write_raw = !no_raw;
            config.write_hourly = !no_hourly;
            config.write_daily = !no_daily;
            import(&config, &file).await
        }
        Commands::Replay { all } => replay(&config, all).await,
        Commands::Status => status(&config).await,
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("health_ingest=info,warn")),
        )
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<Arc<Store>> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let store = Store::from_config(config).context("Failed to create store client")?;
    if let Err(e) = store.ping().await {
        bail!("Cannot connect to {}: {}", store.name(), e);
    }
    tracing::info!(store = store.name(), "Connected");
    Ok(Arc::new(store))
}

async fn dry_run(file: &Path) -> anyhow::Result<ExitCode> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("File not found: {}", file.display()))?;
    let doc: serde_json::Value =
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", file.display()))?;

    let summary = parser::summarize(&doc)?;
    let parsed = parser::parse_document(&doc)?;
    let report = dry_run_report(&parsed);

    println!("DRY RUN - nothing written");
    println!("File: {}", file.display());
    println!("Total metric samples: {}", summary.total_metric_samples);
    println!("Metric types: {}", summary.metric_types);
    println!("Total workouts: {}", summary.total_workouts);
    println!("Invalid records: {}", report.parse.failures.len());

    println!();
    println!("Metrics breakdown:");
    let mut metrics: Vec<_> = summary.metrics.iter().collect();
    metrics.sort_by(|a, b| b.1.count.cmp(&a.1.count));
    for (name, info) in metrics {
        println!("  {}: {} samples ({})", name, info.count, info.unit);
    }

    println!();
    println!("Sources:");
    for source in &report.sources {
        println!("  {}: {} samples", source.source, source.admitted);
    }
    if !report.parse.unknown_metrics.is_empty() {
        println!();
        println!(
            "Unrecognized metric names (imported as-is): {}",
            report
                .parse
                .unknown_metrics
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn import(config: &Config, file: &Path) -> anyhow::Result<ExitCode> {
    if !file.exists() {
        bail!("File not found: {}", file.display());
    }
    let store = connect(config).await?;
    let pipeline = Pipeline::from_config(config, store).await?;
    let failures = FailureLog::new(&config.failure_log_path());

    let started = Instant::now();
    let bytes = tokio::fs::read(file).await?;
    let report = pipeline.process_bytes(&bytes).await?;
    print_report(file, &report, started);

    if let Some(summary) = report.failure_summary() {
        failures.record(file, &summary).await?;
        eprintln!("Import incomplete; run `health-import replay` once the store is healthy");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn replay(config: &Config, all: bool) -> anyhow::Result<ExitCode> {
    let store = connect(config).await?;
    let pipeline = Pipeline::from_config(config, store).await?;
    let failures = FailureLog::new(&config.failure_log_path());

    let logged: BTreeSet<PathBuf> = failures
        .read_all()
        .await?
        .into_iter()
        .map(|r| r.staged_file)
        .collect();
    let targets: Vec<PathBuf> = if all {
        Stager::open(&config.staging_dir()).await?.staged_files()
    } else {
        logged.iter().cloned().collect()
    };
    if targets.is_empty() {
        println!("Nothing to replay");
        return Ok(ExitCode::SUCCESS);
    }

    let mut succeeded = Vec::new();
    let mut failed = 0usize;
    for path in &targets {
        let started = Instant::now();
        let outcome = match tokio::fs::read(path).await {
            Ok(bytes) => pipeline.process_bytes(&bytes).await.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };

        let error = match outcome {
            Ok(report) => {
                print_report(path, &report, started);
                report.failure_summary()
            }
            Err(e) => Some(e.to_string()),
        };
        match error {
            None => succeeded.push(path.clone()),
            Some(error) => {
                eprintln!("FAILED {}: {}", path.display(), error);
                failed += 1;
                if !logged.contains(path) {
                    failures.record(path, &error).await?;
                }
            }
        }
    }

    let resolved = failures.resolve(&succeeded).await?;
    println!(
        "Replayed {} payloads: {} ok, {} failed, {} failure records cleared",
        targets.len(),
        succeeded.len(),
        failed,
        resolved
    );
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn status(config: &Config) -> anyhow::Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, Arc::new(Store::from_config(config)?)).await?;
    let stager = Stager::open(&config.staging_dir()).await?;
    let log = FailureLog::new(&config.failure_log_path());
    let failures = log.read_all().await?;

    println!("Data directory: {}", config.data_dir.display());
    println!("Staged payloads: {}", stager.len());
    println!("Pending failures: {} ({})", failures.len(), log.path().display());
    match pipeline.store().ping().await {
        Ok(()) => println!("Store: {} (reachable)", pipeline.store().name()),
        Err(e) => println!("Store: {} (unreachable: {})", pipeline.store().name(), e),
    }

    let watermarks = pipeline.tracker().snapshot();
    println!();
    if watermarks.is_empty() {
        println!("No sources imported yet");
    } else {
        println!(
            "Watermarks (duplicate window {}h):",
            pipeline.tracker().duplicate_window().num_hours()
        );
        for (source, ts) in watermarks {
            println!("  {}: {}", source, ts.to_rfc3339());
        }
    }
    for record in failures {
        println!(
            "  failed {} at {}: {}",
            record.staged_file.display(),
            record.recorded_at.to_rfc3339(),
            record.error
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(file: &Path, report: &PipelineReport, started: Instant) {
    let raw: usize = report.sources.iter().map(|s| s.raw_committed).sum();
    let buckets: usize = report.sources.iter().map(|s| s.buckets_written).sum();
    let rejected: usize = report.sources.iter().map(|s| s.rejected).sum();
    let late: usize = report.sources.iter().map(|s| s.late_dropped).sum();

    println!("{}", "=".repeat(50));
    println!("Ingestion complete");
    println!("  File: {}", file.display());
    println!("  Raw metrics: {}", raw);
    println!("  Aggregates: {}", buckets);
    println!("  Workouts: {}", report.workouts_written);
    println!("  Already imported: {}", rejected);
    println!("  Late (dropped): {}", late);
    println!("  Invalid records: {}", report.parse.failures.len());
    println!("  Time elapsed: {:.1?}", started.elapsed());
}
