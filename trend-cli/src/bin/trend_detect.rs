//! Trend Detection
//!
//! Reads sentiment observations, runs change-point detection for one key and
//! prints the resulting report as JSON.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use trend_cli::*;
use trend_engine::analyzer::recent_window;
use trend_engine::logging::setup::{init_logging, LoggingConfig};
use trend_engine::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Observation file (JSON array or JSON Lines); reads stdin when omitted or `-`
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Key to analyze; records without a key always match
    #[arg(short, long)]
    key: String,

    /// Length of the analysis window in hours
    #[arg(long, default_value_t = 24)]
    hours: i64,

    /// Detection method: simple, cusum, zscore or bayesian
    #[arg(short, long, env = "TREND_METHOD")]
    method: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// End of the analysis window (RFC 3339); defaults to now
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Run every detection method and print one report per method
    #[arg(long)]
    compare: bool,

    /// Append generated alerts to this JSON Lines file
    #[arg(long)]
    alerts_out: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    json_logs: bool,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(
        LoggingConfig::default()
            .with_engine_level(tracing::Level::INFO)
            .with_json_format(args.json_logs),
    )
    .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let config = match &args.config {
        Some(path) => TrendConfig::from_file(path)?,
        None => TrendConfig::default(),
    }
    .with_method_override(args.method.as_deref())
    .context("invalid detection method")?;

    let content = read_input(args.input.as_deref())?;
    let observations = observations_for_key(&content, &args.key)?;
    info!(key = %args.key, observations = observations.len(), "loaded observations");
    if observations.is_empty() {
        warn!(key = %args.key, "no observations matched the key");
    }

    let source = Arc::new(InMemoryObservationSource::new());
    source.extend(&args.key, observations).await;

    let analyzer = TrendAnalyzer::builder()
        .config(config)
        .source(source)
        .build()
        .context("failed to build analyzer")?;

    let end = args.end.unwrap_or_else(Utc::now);
    let reports = if args.compare {
        let (start, end) = recent_window(args.hours, end).context("invalid --hours")?;
        analyzer
            .compare_methods(&args.key, start, end, &DetectionMethod::ALL)
            .await?
    } else {
        vec![analyzer.analyze_recent(&args.key, args.hours, end).await?]
    };

    if let Some(path) = &args.alerts_out {
        let sink = JsonLinesAlertSink::new(path);
        for report in &reports {
            sink.publish(&report.alerts)
                .await
                .with_context(|| format!("failed to write alerts to '{}'", path.display()))?;
        }
    }

    for report in &reports {
        info!(
            key = %report.key,
            method = %report.method,
            direction = %report.direction,
            change_points = report.change_points.len(),
            alerts = report.alerts.len(),
            "analysis finished"
        );
    }

    let output = if args.compare {
        render(&reports, args.pretty)?
    } else {
        render(&reports[0], args.pretty)?
    };
    println!("{output}");

    Ok(())
}

fn render<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}
