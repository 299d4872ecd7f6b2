//! Download task model.
//!
//! A [`DownloadTask`] pairs an immutable identity (url, destination, tag,
//! priority, headers) with transfer state that the dispatcher, the engine
//! and the manager observe concurrently. Tasks are always shared as
//! [`TaskHandle`]s; the dispatcher never holds two tasks for one url.
//!
//! # Example
//!
//! ```
//! use resumable_core::task::{DownloadTask, TaskConfig, TaskState};
//!
//! let task = DownloadTask::from_config(
//!     TaskConfig::new("https://example.com/big.iso", "/tmp/big.iso").with_priority(3),
//! )
//! .unwrap();
//! assert_eq!(task.state(), TaskState::Wait);
//! assert_eq!(task.priority(), 3);
//! assert_eq!(task.total_length(), None);
//! ```

mod filename;
mod state;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use url::Url;

use crate::error::CoreError;

pub use state::TaskState;
pub(crate) use state::AtomicTaskState;

/// Default read buffer size for the streaming loop (16 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Shared handle to a task; identity comparisons use [`Arc::ptr_eq`].
pub type TaskHandle = Arc<DownloadTask>;

/// Sentinel stored while the total length is unknown.
const UNKNOWN_LENGTH: i64 = -1;

/// Returns the stable content identity used to key breakpoint records.
#[must_use]
pub fn url_identity(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Recognized options for creating a [`DownloadTask`].
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Source URL.
    pub url: String,
    /// Destination file, or an existing directory to place the file in.
    pub destination: PathBuf,
    /// Lookup tag; defaults to the url identity.
    pub tag: Option<String>,
    /// Higher promotes first.
    pub priority: i32,
    /// Streaming buffer size in bytes.
    pub buffer_size: usize,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
}

impl TaskConfig {
    /// Creates a config with default tag, priority, buffer size and headers.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            tag: None,
            priority: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Adds a request header, replacing any previous value for the key.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A single download: identity plus live transfer state.
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    url_identity: String,
    destination: PathBuf,
    tag: String,
    priority: i32,
    buffer_size: usize,
    headers: HashMap<String, String>,
    state: AtomicTaskState,
    total_length: AtomicI64,
    bytes_transferred: AtomicU64,
    supports_resume: AtomicBool,
    stop_signal: Notify,
    in_flight: AtomicBool,
    settled: Notify,
    run: AtomicU64,
}

impl DownloadTask {
    /// Validates `config` and builds a task in the `Wait` state.
    ///
    /// When the destination is an existing directory the file name is
    /// derived from the URL path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTask`] for an empty or unparseable url,
    /// an empty destination, or a zero buffer size.
    pub fn from_config(config: TaskConfig) -> Result<Self, CoreError> {
        let url = config.url.trim().to_string();
        if url.is_empty() {
            return Err(CoreError::invalid_task("url is empty"));
        }
        let parsed = Url::parse(&url)
            .map_err(|e| CoreError::invalid_task(format!("invalid url {url}: {e}")))?;
        if config.destination.as_os_str().is_empty() {
            return Err(CoreError::invalid_task("destination path is empty"));
        }
        if config.buffer_size == 0 {
            return Err(CoreError::invalid_task("buffer size must be positive"));
        }

        let destination = if config.destination.is_dir() {
            config.destination.join(filename::filename_from_url(&parsed))
        } else {
            config.destination
        };
        let url_identity = url_identity(&url);
        let tag = config
            .tag
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| url_identity.clone());

        Ok(Self {
            url,
            url_identity,
            destination,
            tag,
            priority: config.priority,
            buffer_size: config.buffer_size,
            headers: config.headers,
            state: AtomicTaskState::new(TaskState::Wait),
            total_length: AtomicI64::new(UNKNOWN_LENGTH),
            bytes_transferred: AtomicU64::new(0),
            supports_resume: AtomicBool::new(false),
            stop_signal: Notify::new(),
            in_flight: AtomicBool::new(false),
            settled: Notify::new(),
            run: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hash of the url keying this task's breakpoint record.
    #[must_use]
    pub fn url_identity(&self) -> &str {
        &self.url_identity
    }

    #[must_use]
    pub fn destination(&self) -> &std::path::Path {
        &self.destination
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state.load()
    }

    /// Returns true while the streaming loop owns the task.
    #[must_use]
    pub fn is_transferring(&self) -> bool {
        self.state() == TaskState::Start
    }

    /// Expected final size in bytes, once response headers have arrived.
    #[must_use]
    pub fn total_length(&self) -> Option<u64> {
        u64::try_from(self.total_length.load(Ordering::SeqCst)).ok()
    }

    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    /// Whether the server advertised byte-range support on the last response.
    #[must_use]
    pub fn supports_resume(&self) -> bool {
        self.supports_resume.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state);
    }

    pub(crate) fn transition(&self, current: TaskState, new: TaskState) -> bool {
        self.state.transition(current, new)
    }

    /// Moves a `Wait` or `Start` task to `target` (`Pause` or `Cancel`) and
    /// wakes a streaming loop parked on a silent connection.
    ///
    /// Returns false when the task had already left those states.
    pub(crate) fn request_stop(&self, target: TaskState) -> bool {
        self.request_stop_from(TaskState::Wait, target)
            || self.request_stop_from(TaskState::Start, target)
    }

    /// Like [`Self::request_stop`], but only from exactly `current`.
    pub(crate) fn request_stop_from(&self, current: TaskState, target: TaskState) -> bool {
        debug_assert!(matches!(target, TaskState::Pause | TaskState::Cancel));
        let stopped = self.transition(current, target);
        if stopped {
            self.stop_signal.notify_one();
        }
        stopped
    }

    /// Resolves after a stop request; may also resolve spuriously, so
    /// callers re-check [`Self::state`].
    pub(crate) async fn stop_requested(&self) {
        self.stop_signal.notified().await;
    }

    /// Wakes a streaming loop for a stop that was already recorded.
    pub(crate) fn wake_stop(&self) {
        self.stop_signal.notify_one();
    }

    /// Marks the task as owned by a new engine run and returns its number.
    ///
    /// Called when the task takes a concurrency slot, before the run is
    /// spawned, so [`Self::wait_settled`] covers a run that has not started.
    pub(crate) fn begin_transfer(&self) -> u64 {
        self.in_flight.store(true, Ordering::SeqCst);
        self.run.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of the most recent run started by [`Self::begin_transfer`].
    pub(crate) fn current_run(&self) -> u64 {
        self.run.load(Ordering::SeqCst)
    }

    pub(crate) fn end_transfer(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.settled.notify_waiters();
    }

    /// Resolves once no engine invocation is running for this task.
    pub(crate) async fn wait_settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.in_flight.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn set_total_length(&self, total: Option<u64>) {
        let raw = total
            .and_then(|value| i64::try_from(value).ok())
            .unwrap_or(UNKNOWN_LENGTH);
        self.total_length.store(raw, Ordering::SeqCst);
    }

    pub(crate) fn set_bytes_transferred(&self, bytes: u64) {
        self.bytes_transferred.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn set_supports_resume(&self, supported: bool) {
        self.supports_resume.store(supported, Ordering::SeqCst);
    }
}
