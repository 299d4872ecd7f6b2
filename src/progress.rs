//! Progress rendering for download runs.
//!
//! [`Reporter`] is the CLI's [`DownloadCallback`]: it draws one indicatif bar
//! per task (or prints JSON event lines) and forwards each task's final
//! outcome to the main loop.

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use resumable_core::{CoreError, DownloadCallback, TaskHandle};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a task's run ended, as seen by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Paused,
    Canceled,
    Failed,
}

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    event: &'static str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> EventLine<'a> {
    fn new(event: &'static str, task: &'a TaskHandle) -> Self {
        Self {
            event,
            url: task.url(),
            path: None,
            transferred: None,
            total: None,
            error: None,
        }
    }
}

enum Mode {
    Bars {
        multi: MultiProgress,
        bars: Mutex<HashMap<String, ProgressBar>>,
    },
    Json,
}

/// CLI callback: renders events and reports outcomes.
pub(crate) struct Reporter {
    mode: Mode,
    outcomes: mpsc::UnboundedSender<(String, Outcome)>,
}

impl Reporter {
    /// Builds a reporter and the receiver for per-task outcomes.
    ///
    /// Bars are hidden when `quiet` is set.
    pub(crate) fn new(
        json: bool,
        quiet: bool,
    ) -> (Self, mpsc::UnboundedReceiver<(String, Outcome)>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let mode = if json {
            Mode::Json
        } else {
            let target = if quiet {
                ProgressDrawTarget::hidden()
            } else {
                ProgressDrawTarget::stderr()
            };
            Mode::Bars {
                multi: MultiProgress::with_draw_target(target),
                bars: Mutex::new(HashMap::new()),
            }
        };
        (Self { mode, outcomes }, rx)
    }

    fn print(line: &EventLine<'_>) {
        match serde_json::to_string(line) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "failed to encode event line"),
        }
    }

    fn bar_for(&self, task: &TaskHandle) -> Option<ProgressBar> {
        let Mode::Bars { multi, bars } = &self.mode else {
            return None;
        };
        let mut bars = bars.lock().ok()?;
        let bar = bars.entry(task.url().to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::no_length());
            bar.set_style(bar_style());
            bar.set_message(short_name(task));
            bar
        });
        Some(bar.clone())
    }

    fn finish(&self, task: &TaskHandle, outcome: Outcome, message: &str) {
        if let Some(bar) = self.bar_for(task) {
            bar.abandon_with_message(format!("{} {message}", short_name(task)));
        }
        if self.outcomes.send((task.url().to_string(), outcome)).is_err() {
            debug!(url = task.url(), "outcome receiver dropped");
        }
    }

    fn is_json(&self) -> bool {
        matches!(self.mode, Mode::Json)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec} {eta}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

/// File name shown next to a bar.
fn short_name(task: &TaskHandle) -> String {
    task.destination()
        .file_name()
        .map_or_else(|| task.url().to_string(), |name| name.to_string_lossy().into_owned())
}

impl DownloadCallback for Reporter {
    fn on_wait(&self, task: &TaskHandle) {
        if self.is_json() {
            Self::print(&EventLine::new("wait", task));
        } else if let Some(bar) = self.bar_for(task) {
            bar.set_message(format!("{} (queued)", short_name(task)));
        }
    }

    fn on_start(&self, task: &TaskHandle) {
        if self.is_json() {
            let mut line = EventLine::new("start", task);
            line.path = Some(task.destination().display().to_string());
            line.total = task.total_length();
            Self::print(&line);
        } else if let Some(bar) = self.bar_for(task) {
            bar.set_message(short_name(task));
            if let Some(total) = task.total_length() {
                bar.set_length(total);
            }
            bar.set_position(task.bytes_transferred());
        }
    }

    fn on_progress(&self, task: &TaskHandle, transferred: u64, total: Option<u64>) {
        if self.is_json() {
            let mut line = EventLine::new("progress", task);
            line.transferred = Some(transferred);
            line.total = total;
            Self::print(&line);
        } else if let Some(bar) = self.bar_for(task) {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(transferred);
        }
    }

    fn on_pause(&self, task: &TaskHandle) {
        if self.is_json() {
            let mut line = EventLine::new("pause", task);
            line.transferred = Some(task.bytes_transferred());
            Self::print(&line);
        }
        self.finish(task, Outcome::Paused, "paused");
    }

    fn on_cancel(&self, task: &TaskHandle) {
        if self.is_json() {
            Self::print(&EventLine::new("cancel", task));
        }
        self.finish(task, Outcome::Canceled, "canceled");
    }

    fn on_error(&self, task: Option<&TaskHandle>, error: &CoreError) {
        let Some(task) = task else {
            warn!(error = %error, "command failed");
            return;
        };
        if matches!(error, CoreError::UnresumableTransfer { .. }) {
            warn!(url = task.url(), "cannot pause; transfer continues");
            return;
        }
        if self.is_json() {
            let mut line = EventLine::new("error", task);
            line.error = Some(error.to_string());
            Self::print(&line);
        } else {
            warn!(url = task.url(), error = %error, "download failed");
        }
        self.finish(task, Outcome::Failed, "failed");
    }

    fn on_complete(&self, task: &TaskHandle) {
        if self.is_json() {
            let mut line = EventLine::new("complete", task);
            line.path = Some(task.destination().display().to_string());
            line.transferred = Some(task.bytes_transferred());
            Self::print(&line);
        }
        self.finish(task, Outcome::Completed, "done");
    }
}
