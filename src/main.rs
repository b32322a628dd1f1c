mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::runtime::Handle;
use tracing::{debug, info};

use logsieve_engine::{
    Batch, BatchKind, CommandSource, LogLevel, LogRecord, LogSieve, Subscriber, TaskDispatcher,
};

use crate::config::AppConfig;

/// logsieve - tail a log command, filter it and print rate-limited batches
#[derive(Parser, Debug)]
#[command(name = "logsieve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with [source] and [sieve] tables
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Program to tail (default: logcat)
    #[arg(long, value_name = "PROGRAM")]
    command: Option<String>,

    /// Arguments for the program, after `--`
    #[arg(last = true, value_name = "ARGS")]
    args: Vec<String>,

    /// Case-insensitive substring or regex
    #[arg(long)]
    filter: Option<String>,

    /// Lowest level to show (v, d, i, w, e, a, f or full names)
    #[arg(long)]
    min_level: Option<LogLevel>,

    /// Number of records kept in history
    #[arg(long)]
    max_retained: Option<usize>,

    /// Minimum milliseconds between two printed batches
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `L/ message`
    Plain,
    /// One JSON object per record
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries records only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

/// Merge the config file with command line overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut app = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(command) = &args.command {
        app.source.command = command.clone();
        app.source.args = args.args.clone();
    } else if !args.args.is_empty() {
        app.source.args = args.args.clone();
    }

    if let Some(filter) = &args.filter {
        app.sieve.text_filter = filter.clone();
    }
    if let Some(level) = args.min_level {
        app.sieve.min_level = level;
    }
    if let Some(max_retained) = args.max_retained {
        app.sieve = app
            .sieve
            .with_max_retained(max_retained)
            .context("Invalid --max-retained")?;
    }
    if let Some(interval) = args.flush_interval_ms {
        app.sieve.flush_interval_ms = interval;
    }

    Ok(app)
}

async fn run(args: Args) -> Result<()> {
    let app = load_config(&args)?;

    let dispatcher = Arc::new(TaskDispatcher::spawn());
    let sources = CommandSource::factory(
        app.source.command.clone(),
        app.source.args.clone(),
        Handle::current(),
    );
    let sieve = LogSieve::new(app.sieve, sources, dispatcher.clone());
    sieve.subscribe(Arc::new(Printer {
        format: args.format,
    }));

    info!(command = %app.source.command, "tailing");
    sieve.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    sieve.stop();
    dispatcher.shutdown();
    debug!(retained = sieve.retained_len(), "stopped");
    Ok(())
}

/// Writes every live record to stdout
struct Printer {
    format: OutputFormat,
}

impl Printer {
    fn render(&self, record: &LogRecord) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Plain => record.to_plain(),
            OutputFormat::Json => serde_json::to_string(record)?,
        })
    }

    fn print(&self, records: &[LogRecord]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        for record in records {
            writeln!(out, "{}", self.render(record)?)?;
        }
        out.flush()?;
        Ok(())
    }
}

impl Subscriber for Printer {
    fn on_batch(&self, batch: &Batch) {
        if batch.kind != BatchKind::Live {
            return;
        }
        // A closed stdout (e.g. piped into `head`) is not worth tearing down for
        if let Err(err) = self.print(&batch.records) {
            debug!(error = %err, "failed to print batch");
        }
    }
}
