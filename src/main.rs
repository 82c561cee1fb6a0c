// ero-ingest - process one enrollment submission file
//
//   ero-ingest submission.xml --format xml
//   ero-ingest submission.txt --format flat --database ero.db --json

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ero_enrollment::{
    IngestConfig, ProcessingReport, ReconciliationEngine, RecordStatus, SqliteGateway,
    SubmissionFormat,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ero-ingest")]
#[command(about = "Validate and reconcile an ERO enrollment submission", version)]
struct Args {
    /// Submission file to ingest
    file: PathBuf,

    /// Declared submission format (never sniffed)
    #[arg(long, value_enum)]
    format: FormatArg,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long)]
    database: Option<String>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Print the full processing report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Flat,
    Xml,
}

impl From<FormatArg> for SubmissionFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Flat => SubmissionFormat::Flat,
            FormatArg::Xml => SubmissionFormat::Xml,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("❌ {:#}", err);
            ExitCode::from(1)
        }
    }
}

/// Ok(true) when the submission was accepted, Ok(false) when it was rejected
fn run(args: Args) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if args.debug {
        config.debug = true;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(config.debug);

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read submission {}", args.file.display()))?;

    let gateway = SqliteGateway::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    info!(database = %config.database_path, "database ready");

    let engine = ReconciliationEngine::new(config, Arc::new(gateway));

    match engine.ingest(&bytes, args.format.into()) {
        Ok(report) => {
            if args.json {
                println!("{}", report.to_json().context("Failed to serialize report")?);
            } else {
                print_report(&report);
            }
            Ok(true)
        }
        Err(err) if err.is_submission_fatal() => {
            eprintln!("❌ Submission rejected: {}", err);
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &ProcessingReport) {
    println!("📥 {}", report.summary());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for record in &report.records {
        match record.status {
            RecordStatus::Committed => {
                println!("✓ #{} EFIN {} committed", record.index, record.efin);
            }
            RecordStatus::Quarantined => {
                println!("⚠️  #{} EFIN {} quarantined", record.index, record.efin);
                for violation in &record.violations {
                    println!("     {}", violation);
                }
            }
            RecordStatus::Failed => {
                println!(
                    "❌ #{} EFIN {} failed after {} attempt(s): {}",
                    record.index,
                    record.efin,
                    record.attempts,
                    record.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        for ambiguity in &record.ambiguities {
            println!("     ambiguity: {}", ambiguity);
        }
    }

    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
}
