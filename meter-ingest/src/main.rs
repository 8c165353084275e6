use std::{path::PathBuf, time::Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use meter_ingest::{
    classify::{Classifier, GradingWindow, Violation},
    config::AppConfig,
    import::Importer,
    metrics_server, observability,
    parse::DeviceFamily,
    report::ReportWriter,
    stats::RunStats,
};
use time::{macros::format_description, Date};

/// Import meter reading files and grade source data quality.
#[derive(Debug, Parser)]
#[command(name = "meter-ingest", version)]
struct Cli {
    /// Config file; takes precedence over METER_INGEST_CONFIG.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for report files; takes precedence over report.output_dir.
    #[arg(long, global = true, value_name = "PATH")]
    report_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import delimited reading files, then optionally grade an interval.
    Import(ImportArgs),
    /// Grade every known source over an interval.
    Classify(WindowArgs),
}

#[derive(Debug, clap::Args)]
struct ImportArgs {
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Device family of every row; sniffed from the row length when omitted.
    #[arg(long, value_parser = parse_family)]
    family: Option<DeviceFamily>,

    /// Source name for families whose rows carry none; defaults to the file stem.
    #[arg(long)]
    source_name: Option<String>,

    /// First day of the interval to grade after import (YYYY-MM-DD).
    #[arg(long, value_parser = parse_day, requires = "end")]
    start: Option<Date>,

    /// Last day of the interval to grade after import (YYYY-MM-DD).
    #[arg(long, value_parser = parse_day, requires = "start")]
    end: Option<Date>,
}

#[derive(Debug, clap::Args)]
struct WindowArgs {
    /// First day of the interval (YYYY-MM-DD).
    #[arg(long, value_parser = parse_day)]
    start: Date,

    /// Last day of the interval (YYYY-MM-DD).
    #[arg(long, value_parser = parse_day)]
    end: Date,
}

fn parse_day(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year]-[month]-[day]")).map_err(|e| format!("{s:?}: {e}"))
}

fn parse_family(s: &str) -> Result<DeviceFamily, String> {
    DeviceFamily::parse(s).ok_or_else(|| {
        let known: Vec<_> = DeviceFamily::ALL.iter().map(|f| f.as_str()).collect();
        format!("unknown family {s:?}, expected one of {}", known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    observability::init_tracing();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    // Fatal: nothing useful can happen without the store.
    let store = cfg.connect_store().await?;
    let reports = ReportWriter::new(
        cli.report_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&cfg.report.output_dir)),
    )?;
    let retry = cfg.retry_policy();

    let mut stats = RunStats::new();
    let mut violations: Vec<Violation> = Vec::new();

    let window = match cli.command {
        Command::Import(args) => {
            let mut options = cfg.import_options()?;
            if args.family.is_some() {
                options.family = args.family;
            }
            options.source_name = args.source_name;

            let outcome = Importer::new(store.clone(), retry, options)
                .import_files(args.files.as_slice())
                .await;
            stats.merge(&outcome.stats);
            violations.extend(outcome.violations);

            match (args.start, args.end) {
                (Some(start), Some(end)) => Some(GradingWindow::new(start, end, cfg.classification.buffer_days)?),
                _ => None,
            }
        }
        Command::Classify(args) => Some(GradingWindow::new(
            args.start,
            args.end,
            cfg.classification.buffer_days,
        )?),
    };

    if let Some(window) = window {
        let classifier = Classifier::new(
            store,
            cfg.offset()?,
            cfg.monotonic_lookback(),
            retry,
            cfg.classification.workers,
        );
        match classifier.classify_all(window).await {
            Ok(report) => {
                report.record_into(&mut stats);
                violations.extend(report.violations().cloned());
                reports.write_classification(&report)?;
            }
            Err(e) => tracing::error!(error = %e, "classification pass failed"),
        }
    }

    violations.sort_by(|a, b| {
        (&a.source_name, &a.mtu_id, a.ts).cmp(&(&b.source_name, &b.mtu_id, b.ts))
    });
    violations.dedup();

    stats.runtime_secs = started.elapsed().as_secs_f64();
    reports.write_violations(&violations)?;
    reports.write_summary(&stats)?;
    tracing::info!(report_dir = %reports.dir().display(), "{}", stats.summary());

    Ok(())
}
