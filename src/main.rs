//! CLI entry point for the resumable downloader.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use resumable_core::{
    DEFAULT_CONCURRENCY, Database, DownloadManager, ManagerConfig, SqliteBreakpointStore,
    TaskConfig,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::FileConfig;
use cli::Args;
use progress::{Outcome, Reporter};

/// Breakpoint database created inside the output directory by default.
const DEFAULT_DB_FILE: &str = ".breakpoints.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(1),
            ProcessExit::Failure => ExitCode::from(2),
        }
    }
}

/// Maps completion/failure counts to the process exit outcome.
fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// Per-run outcome counts.
#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    paused: usize,
    canceled: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Paused => self.paused += 1,
            Outcome::Canceled => self.canceled += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    fn settled(&self) -> usize {
        self.completed + self.paused + self.canceled + self.failed
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_level(&args, &file_config)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, ?file_config, "configuration resolved");

    let exit = run(args, file_config).await?;
    Ok(exit.into())
}

fn default_log_level(args: &Args, file_config: &FileConfig) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => file_config
            .verbosity
            .map_or("info", app_config::VerbositySetting::log_level),
        1 => "debug",
        _ => "trace",
    }
}

async fn run(args: Args, file_config: FileConfig) -> Result<ProcessExit> {
    let urls = if !args.urls.is_empty() {
        args.urls.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        parse_url_lines(&buffer)
    } else {
        Vec::new()
    };
    if urls.is_empty() {
        info!("No input provided. Pass URLs as arguments or pipe them via stdin.");
        info!("Example: echo 'https://example.com/file.iso' | resumable-downloader -o downloads");
        return Ok(ProcessExit::Success);
    }

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;
    let db_path = args
        .db_path
        .clone()
        .or_else(|| file_config.db_path.clone())
        .unwrap_or_else(|| output_dir.join(DEFAULT_DB_FILE));
    let buffer_size = args
        .buffer_size
        .and_then(|size| usize::try_from(size).ok())
        .or(file_config.buffer_size);

    let defaults = ManagerConfig::default();
    let manager_config = ManagerConfig {
        max_concurrency: args
            .concurrency
            .or(file_config.concurrency)
            .map_or(DEFAULT_CONCURRENCY, usize::from),
        connect_timeout_secs: file_config
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: file_config
            .read_timeout_secs
            .unwrap_or(defaults.read_timeout_secs),
    };

    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("Failed to open breakpoint database '{}'", db_path.display()))?;
    let store = Arc::new(SqliteBreakpointStore::new(db));
    let manager = DownloadManager::new(&manager_config, store)?;
    let (reporter, mut outcomes) = Reporter::new(args.json, args.quiet);
    manager.set_callback(Arc::new(reporter));

    let configs = urls.iter().map(|url| {
        let config = TaskConfig::new(url.as_str(), &output_dir);
        match buffer_size {
            Some(size) => config.with_buffer_size(size),
            None => config,
        }
    });
    let mut rejected = 0usize;
    let mut pending = 0usize;
    for (url, result) in urls.iter().zip(manager.add_tasks(configs)) {
        match result {
            Ok(_) => pending += 1,
            Err(e) => {
                warn!(url = %url, error = %e, "Skipping url");
                rejected += 1;
            }
        }
    }
    info!(
        queued = pending,
        rejected,
        concurrency = manager_config.max_concurrency,
        db = %db_path.display(),
        "Downloads queued"
    );

    let mut tally = Tally::default();
    let mut interrupted = false;
    let mut signals_enabled = true;
    while tally.settled() < pending {
        tokio::select! {
            outcome = outcomes.recv() => {
                let Some((url, outcome)) = outcome else { break };
                debug!(url = %url, ?outcome, "Task settled");
                tally.record(outcome);
            }
            signal = tokio::signal::ctrl_c(), if signals_enabled => {
                if let Err(e) = signal {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                    signals_enabled = false;
                    continue;
                }
                if interrupted {
                    warn!("Interrupted again; canceling remaining downloads");
                    break;
                }
                interrupted = true;
                let paused = manager.pause_all();
                info!(
                    paused = paused.len(),
                    "Interrupted; pausing downloads (rerun to resume, Ctrl-C again to abort)"
                );
            }
        }
    }

    manager.destroy().await;

    info!(
        completed = tally.completed,
        paused = tally.paused,
        canceled = tally.canceled,
        failed = tally.failed + rejected,
        "Download run finished"
    );

    Ok(determine_exit_outcome(
        tally.completed,
        tally.failed + rejected,
    ))
}

/// Extracts URLs from newline-separated input, skipping blanks and `#` comments.
fn parse_url_lines(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}
