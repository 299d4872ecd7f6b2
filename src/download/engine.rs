//! Streaming engine: one resumable transfer per started task.
//!
//! The engine issues the request through a [`Transport`], negotiates the
//! starting offset, and streams the body to disk one buffer at a time.
//! After each buffer it persists the breakpoint, reports progress and
//! re-reads the task state, so a pause or cancel takes effect before the
//! next buffer is written. Every started task produces exactly one
//! terminal event.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resumable_core::breakpoint::MemoryBreakpointStore;
//! use resumable_core::callback::DownloadEvent;
//! use resumable_core::download::{DownloadEngine, HttpClient};
//! use resumable_core::task::{DownloadTask, TaskConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(
//!     Arc::new(HttpClient::new()?),
//!     Arc::new(MemoryBreakpointStore::new()),
//! );
//! let task = Arc::new(DownloadTask::from_config(TaskConfig::new(
//!     "https://example.com/big.iso",
//!     "/tmp/big.iso",
//! ))?);
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DownloadEvent>();
//! engine.start_download(task, &tx).await;
//! while let Ok(event) = rx.try_recv() {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use super::client::{TransferRequest, Transport};
use super::error::DownloadError;
use super::range::{self, ResumeProbe};
use crate::breakpoint::{BreakpointRecord, BreakpointStore, SINGLE_BLOCK_ID};
use crate::callback::{DownloadEvent, EventSink};
use crate::error::CoreError;
use crate::task::{TaskHandle, TaskState};

/// Outcome counters across every transfer the engine has finished.
///
/// Uses atomic counters for thread-safe updates from concurrent transfers.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    paused: AtomicUsize,
    canceled: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn paused(&self) -> usize {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn canceled(&self) -> usize {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Returns the number of transfers that reached a terminal event.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.paused() + self.canceled()
    }

    fn record(&self, state: TaskState) {
        let counter = match state {
            TaskState::Complete => &self.completed,
            TaskState::Error => &self.failed,
            TaskState::Pause => &self.paused,
            TaskState::Cancel => &self.canceled,
            TaskState::Wait | TaskState::Start => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Streams started tasks to disk.
#[derive(Debug)]
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    store: Arc<dyn BreakpointStore>,
    in_flight: DashMap<String, TaskHandle>,
    stats: DownloadStats,
}

impl DownloadEngine {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn BreakpointStore>) -> Self {
        Self {
            transport,
            store,
            in_flight: DashMap::new(),
            stats: DownloadStats::new(),
        }
    }

    /// Runs one transfer attempt for `task` to its terminal event.
    ///
    /// Events are emitted in order: `Start`, `Progress*`, then exactly one
    /// of `Pause`, `Cancel`, `Error` or `Complete`. A task stopped before
    /// its response arrived skips `Start`. The task is marked settled on
    /// return; the dispatcher marks it in flight when it takes a slot.
    #[instrument(skip_all, fields(url = %task.url(), tag = %task.tag()))]
    pub async fn start_download(&self, task: TaskHandle, events: &dyn EventSink<DownloadEvent>) {
        self.in_flight
            .insert(task.url().to_string(), Arc::clone(&task));
        let outcome = self.transfer(&task, events).await;
        self.in_flight.remove(task.url());
        self.finish(&task, outcome, events).await;
        task.end_transfer();
    }

    /// Asks the streaming loop for `task` to stop and keep its breakpoint.
    ///
    /// Returns false when the task was no longer waiting or transferring.
    pub fn pause(&self, task: &TaskHandle) -> bool {
        task.request_stop(TaskState::Pause)
    }

    /// Asks the streaming loop for `task` to stop and drop its breakpoint.
    pub fn cancel(&self, task: &TaskHandle) -> bool {
        task.request_stop(TaskState::Cancel)
    }

    /// Cancels every in-flight transfer; returns how many were signaled.
    pub fn cancel_all(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|entry| entry.value().request_stop(TaskState::Cancel))
            .count()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    async fn transfer(
        &self,
        task: &TaskHandle,
        events: &dyn EventSink<DownloadEvent>,
    ) -> Result<(), DownloadError> {
        if task.state() != TaskState::Wait {
            debug!(state = %task.state(), "stopped before request");
            return Ok(());
        }

        let record = range::load_breakpoint(self.store.as_ref(), task.url_identity()).await;
        let request = build_request(task, record.as_ref())?;
        let response = match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(error) => {
                if error.is_range_not_satisfiable() && record.is_some() {
                    debug!("stored offset rejected by server");
                    self.discard_breakpoint(task).await;
                }
                return Err(error);
            }
        };

        let probe = ResumeProbe::inspect(response.status, &response.headers, response.content_length);
        if record.is_some() && !probe.supports_resume {
            self.discard_breakpoint(task).await;
        }
        task.set_supports_resume(probe.supports_resume);
        task.set_total_length(probe.total_length);
        task.set_bytes_transferred(probe.base_offset);

        if !task.transition(TaskState::Wait, TaskState::Start) {
            debug!(state = %task.state(), "stopped before streaming");
            return Ok(());
        }
        info!(
            offset = probe.base_offset,
            total = ?probe.total_length,
            resumable = probe.supports_resume,
            "transfer started"
        );
        events.emit(DownloadEvent::Start(Arc::clone(task)));

        let mut file = match open_destination(task.destination(), probe.base_offset).await {
            Ok(file) => file,
            Err(error) => {
                if matches!(error, DownloadError::PartialFileMissing { .. }) {
                    self.discard_breakpoint(task).await;
                }
                return Err(error);
            }
        };

        let mut checkpoint = probe.supports_resume.then(|| BreakpointRecord {
            url_hash: task.url_identity().to_string(),
            tag: task.tag().to_string(),
            start_point: probe.base_offset,
            end_point: probe.total_length.unwrap_or(0),
            block_id: SINGLE_BLOCK_ID,
            etag: probe.validator.clone().unwrap_or_default(),
        });
        let mut written = probe.base_offset;
        let mut persistence_warned = false;
        let mut body = response.body;

        let drained = 'stream: loop {
            let next = tokio::select! {
                biased;
                () = task.stop_requested() => {
                    if task.state() != TaskState::Start {
                        break 'stream false;
                    }
                    continue;
                }
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break true;
            };
            let chunk = chunk?;

            for piece in chunk.chunks(task.buffer_size()) {
                write_piece(&mut file, task.destination(), piece).await?;
                written += piece.len() as u64;
                task.set_bytes_transferred(written);

                if let Some(record) = checkpoint.as_mut() {
                    record.start_point = written;
                    if let Err(error) = self.store.upsert(record).await {
                        if !persistence_warned {
                            warn!(error = %error, "breakpoint not persisted; transfer continues");
                            persistence_warned = true;
                        }
                    }
                }

                events.emit(DownloadEvent::Progress {
                    task: Arc::clone(task),
                    transferred: written,
                    total: probe.total_length,
                });

                if task.state() != TaskState::Start {
                    break 'stream false;
                }
            }
        };
        drop(file);

        match probe.total_length {
            Some(total) if written == total => task.set_state(TaskState::Complete),
            _ if !drained => debug!(written, state = %task.state(), "transfer stopped"),
            Some(total) => return Err(DownloadError::incomplete(task.url(), total, written)),
            None => {
                task.transition(TaskState::Start, TaskState::Complete);
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        task: &TaskHandle,
        outcome: Result<(), DownloadError>,
        events: &dyn EventSink<DownloadEvent>,
    ) {
        let mut failure = None;
        if let Err(error) = outcome {
            if task.transition(TaskState::Start, TaskState::Error)
                || task.transition(TaskState::Wait, TaskState::Error)
            {
                failure = Some(error);
            } else {
                debug!(error = %error, state = %task.state(), "error after stop request ignored");
            }
        }

        let state = match task.state() {
            TaskState::Wait | TaskState::Start => {
                task.set_state(TaskState::Error);
                TaskState::Error
            }
            state => state,
        };
        self.stats.record(state);

        let handle = Arc::clone(task);
        let event = match state {
            TaskState::Complete => {
                self.discard_breakpoint(task).await;
                info!(bytes = task.bytes_transferred(), "transfer complete");
                DownloadEvent::Complete(handle)
            }
            TaskState::Cancel => {
                self.discard_breakpoint(task).await;
                info!("transfer canceled");
                DownloadEvent::Cancel(handle)
            }
            TaskState::Pause => {
                info!(bytes = task.bytes_transferred(), "transfer paused");
                DownloadEvent::Pause(handle)
            }
            TaskState::Error | TaskState::Wait | TaskState::Start => {
                let error = failure.unwrap_or_else(|| DownloadError::Aborted {
                    url: task.url().to_string(),
                });
                warn!(error = %error, "transfer failed");
                DownloadEvent::Error {
                    task: handle,
                    error: CoreError::from(error),
                }
            }
        };
        events.emit(event);
    }

    async fn discard_breakpoint(&self, task: &TaskHandle) {
        if let Err(error) = self.store.delete_by_url(task.url_identity()).await {
            warn!(error = %error, "failed to delete breakpoint");
        }
    }
}

/// Merges caller headers with the range headers for this attempt.
fn build_request(
    task: &TaskHandle,
    record: Option<&BreakpointRecord>,
) -> Result<TransferRequest, DownloadError> {
    let mut headers = HeaderMap::new();
    for (name, value) in task.headers() {
        let invalid = || DownloadError::InvalidHeader {
            url: task.url().to_string(),
            name: name.clone(),
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(name, value);
    }
    headers.extend(range::resume_headers(record));
    Ok(TransferRequest {
        url: task.url().to_string(),
        headers,
    })
}

/// Opens the destination positioned at `offset`.
///
/// Offset zero truncates. A nonzero offset requires the partial file to
/// hold at least that many bytes; anything past it is dropped.
async fn open_destination(path: &Path, offset: u64) -> Result<File, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    if offset > 0 {
        let existing = file
            .metadata()
            .await
            .map_err(|e| DownloadError::io(path, e))?
            .len();
        if existing < offset {
            return Err(DownloadError::PartialFileMissing {
                path: path.to_path_buf(),
                expected: offset,
                actual: existing,
            });
        }
    }
    file.set_len(offset)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(file)
}

/// Writes and flushes one buffer so the breakpoint never runs ahead of
/// the file.
async fn write_piece(file: &mut File, path: &Path, piece: &[u8]) -> Result<(), DownloadError> {
    file.write_all(piece)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.flush().await.map_err(|e| DownloadError::io(path, e))
}
