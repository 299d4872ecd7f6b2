//! Public façade over the dispatcher and the engine.
//!
//! The manager translates commands (add, pause, resume, cancel; by url, by
//! tag, or globally) into dispatcher and engine operations, keeps paused
//! tasks in a holding set outside the dispatcher, and fans events out to
//! the registered [`DownloadCallback`].
//!
//! A single coordinator task consumes every [`DispatchEvent`] and
//! [`DownloadEvent`] from one channel. It starts transfers when the
//! dispatcher promotes a task, forwards notifications to the caller, and
//! on `Error` or `Complete` forwards first and only then frees the
//! dispatcher slot, so the caller sees the terminal state before the next
//! queued task starts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resumable_core::breakpoint::MemoryBreakpointStore;
//! use resumable_core::manager::{DownloadManager, ManagerConfig};
//! use resumable_core::task::TaskConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(
//!     &ManagerConfig::default(),
//!     Arc::new(MemoryBreakpointStore::new()),
//! )?;
//! manager.add_task(TaskConfig::new("https://example.com/big.iso", "./downloads"))?;
//! manager.pause_by_url("https://example.com/big.iso")?;
//! manager.resume_by_url("https://example.com/big.iso").await?;
//! manager.destroy().await;
//! # Ok(())
//! # }
//! ```

mod config;

pub use config::ManagerConfig;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::breakpoint::BreakpointStore;
use crate::callback::{DownloadCallback, DownloadEvent, EventSink};
use crate::dispatcher::{DispatchEvent, Dispatcher, QueueSlot};
use crate::download::{DownloadEngine, DownloadError, DownloadStats, HttpClient, Transport};
use crate::error::CoreError;
use crate::task::{DownloadTask, TaskConfig, TaskHandle, TaskState};

/// Everything the coordinator consumes, in emission order.
enum Signal {
    Dispatch(DispatchEvent),
    Download(DownloadEvent),
    Shutdown,
}

impl From<DispatchEvent> for Signal {
    fn from(event: DispatchEvent) -> Self {
        Self::Dispatch(event)
    }
}

impl From<DownloadEvent> for Signal {
    fn from(event: DownloadEvent) -> Self {
        Self::Download(event)
    }
}

type CallbackSlot = Arc<RwLock<Option<Arc<dyn DownloadCallback>>>>;
type PausedSet = Arc<Mutex<Vec<TaskHandle>>>;

/// Resumable download manager.
pub struct DownloadManager {
    dispatcher: Arc<Dispatcher>,
    engine: Arc<DownloadEngine>,
    store: Arc<dyn BreakpointStore>,
    callback: CallbackSlot,
    paused: PausedSet,
    signals: mpsc::UnboundedSender<Signal>,
    coordinator: JoinHandle<()>,
}

impl fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("dispatcher", &self.dispatcher)
            .field("paused", &lock(&self.paused).len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager downloading over HTTP with `config`'s limits.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `config` fails validation or
    /// the HTTP client cannot be built.
    pub fn new(config: &ManagerConfig, store: Arc<dyn BreakpointStore>) -> Result<Self, CoreError> {
        config.validate()?;
        let client =
            HttpClient::with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
                .map_err(|e| CoreError::invalid_config(format!("http client: {e}")))?;
        Self::with_transport(config.max_concurrency, Arc::new(client), store)
    }

    /// Creates a manager over an injected transport.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `max_concurrency` is out of
    /// range.
    pub fn with_transport(
        max_concurrency: usize,
        transport: Arc<dyn Transport>,
        store: Arc<dyn BreakpointStore>,
    ) -> Result<Self, CoreError> {
        let (signals, receiver) = mpsc::unbounded_channel::<Signal>();
        let dispatcher = Arc::new(Dispatcher::new(
            max_concurrency,
            Arc::new(signals.clone()),
        )?);
        let engine = Arc::new(DownloadEngine::new(transport, Arc::clone(&store)));
        let callback = CallbackSlot::default();
        let paused = PausedSet::default();

        let coordinator = Coordinator {
            dispatcher: Arc::clone(&dispatcher),
            engine: Arc::clone(&engine),
            callback: Arc::clone(&callback),
            paused: Arc::clone(&paused),
            sink: Arc::new(signals.clone()),
            transfers: JoinSet::new(),
        };
        let coordinator = tokio::spawn(coordinator.run(receiver));
        info!(max_concurrency, "download manager ready");

        Ok(Self {
            dispatcher,
            engine,
            store,
            callback,
            paused,
            signals,
            coordinator,
        })
    }

    /// Registers the caller callback, replacing any previous one.
    pub fn set_callback(&self, callback: Arc<dyn DownloadCallback>) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Validates `config`, creates the task and enqueues it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTask`] for a bad config and
    /// [`CoreError::IdentityConflict`] if the url is already queued,
    /// running or paused.
    #[instrument(skip(self, config), fields(url = %config.url))]
    pub fn add_task(&self, config: TaskConfig) -> Result<TaskHandle, CoreError> {
        let task = self.prepare(config)?;
        self.dispatcher.enqueue(Arc::clone(&task))?;
        debug!(tag = %task.tag(), priority = task.priority(), "task added");
        Ok(task)
    }

    /// Adds a batch; the highest priorities across the batch start first.
    ///
    /// Results are in input order.
    pub fn add_tasks(
        &self,
        configs: impl IntoIterator<Item = TaskConfig>,
    ) -> Vec<Result<TaskHandle, CoreError>> {
        let prepared: Vec<_> = configs
            .into_iter()
            .map(|config| self.prepare(config))
            .collect();
        let accepted = prepared
            .iter()
            .filter_map(|result| result.as_ref().ok().map(Arc::clone))
            .collect();
        let mut outcomes = self.dispatcher.enqueue_all(accepted).into_iter();

        prepared
            .into_iter()
            .map(|result| {
                let task = result?;
                match outcomes.next() {
                    Some(outcome) => outcome.map_err(CoreError::from),
                    None => Err(CoreError::IdentityConflict {
                        url: task.url().to_string(),
                    }),
                }
            })
            .collect()
    }

    /// Cancels the task for `url`, whether queued, running or paused.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] (also reported through
    /// `on_error`) when no such task exists.
    #[instrument(skip(self))]
    pub async fn cancel_by_url(&self, url: &str) -> Result<TaskHandle, CoreError> {
        if let Some(task) = self.dispatcher.find_by_url(url) {
            self.cancel_active(&task).await;
            return Ok(task);
        }
        if let Some(task) = self.take_paused(|task| task.url() == url) {
            return self.cancel_paused(task).await;
        }
        Err(self.not_found(CoreError::not_found_by_url(url)))
    }

    /// Cancels the first task carrying `tag`, whether queued, running or paused.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] (also reported through
    /// `on_error`) when no such task exists.
    #[instrument(skip(self))]
    pub async fn cancel_by_tag(&self, tag: &str) -> Result<TaskHandle, CoreError> {
        if let Some(task) = self.dispatcher.find_by_tag(tag) {
            self.cancel_active(&task).await;
            return Ok(task);
        }
        if let Some(task) = self.take_paused(|task| task.tag() == tag) {
            return self.cancel_paused(task).await;
        }
        Err(self.not_found(CoreError::not_found_by_tag(tag)))
    }

    /// Cancels every queued, running and paused task; returns how many.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self) -> usize {
        let mut canceled = 0;
        // Ready tasks first, so canceling a running one does not promote them.
        for task in self.dispatcher.tasks().into_iter().rev() {
            self.cancel_active(&task).await;
            canceled += 1;
        }
        let paused: Vec<_> = lock(&self.paused).drain(..).collect();
        for task in paused {
            if self.cancel_paused(task).await.is_ok() {
                canceled += 1;
            }
        }
        info!(canceled, "canceled all tasks");
        canceled
    }

    /// Pauses the active task for `url` and moves it to the holding set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnresumableTransfer`] when the running transfer
    /// lacks byte-range support (state unchanged), or
    /// [`CoreError::TaskNotFound`] when no active task has this url. Both
    /// are also reported through `on_error`.
    #[instrument(skip(self))]
    pub fn pause_by_url(&self, url: &str) -> Result<TaskHandle, CoreError> {
        let task = self
            .dispatcher
            .find_by_url(url)
            .ok_or_else(|| self.not_found(CoreError::not_found_by_url(url)))?;
        self.pause_active(task)
    }

    /// Pauses the first active task carrying `tag`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::pause_by_url`].
    #[instrument(skip(self))]
    pub fn pause_by_tag(&self, tag: &str) -> Result<TaskHandle, CoreError> {
        let task = self
            .dispatcher
            .find_by_tag(tag)
            .ok_or_else(|| self.not_found(CoreError::not_found_by_tag(tag)))?;
        self.pause_active(task)
    }

    /// Pauses every active task that can be paused and returns them.
    ///
    /// Unresumable running transfers keep running; each is reported
    /// through `on_error`.
    #[instrument(skip(self))]
    pub fn pause_all(&self) -> Vec<TaskHandle> {
        let paused: Vec<_> = self
            .dispatcher
            .tasks()
            .into_iter()
            .rev()
            .filter_map(|task| self.pause_active(task).ok())
            .collect();
        info!(paused = paused.len(), "paused all tasks");
        paused
    }

    /// Re-enqueues the paused task for `url`.
    ///
    /// Waits for a still-unwinding transfer of the task to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] when no paused task has this url.
    #[instrument(skip(self))]
    pub async fn resume_by_url(&self, url: &str) -> Result<TaskHandle, CoreError> {
        let task = self
            .take_paused(|task| task.url() == url)
            .ok_or_else(|| self.not_found(CoreError::not_found_by_url(url)))?;
        self.resume_paused(task).await
    }

    /// Re-enqueues the first paused task carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] when no paused task has this tag.
    #[instrument(skip(self))]
    pub async fn resume_by_tag(&self, tag: &str) -> Result<TaskHandle, CoreError> {
        let task = self
            .take_paused(|task| task.tag() == tag)
            .ok_or_else(|| self.not_found(CoreError::not_found_by_tag(tag)))?;
        self.resume_paused(task).await
    }

    /// Re-enqueues every paused task in one promotion pass.
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> Vec<TaskHandle> {
        let held: Vec<_> = lock(&self.paused).drain(..).collect();
        let mut ready = Vec::with_capacity(held.len());
        for task in held {
            task.wait_settled().await;
            if task.transition(TaskState::Pause, TaskState::Wait) {
                ready.push(task);
            }
        }

        let mut resumed = Vec::with_capacity(ready.len());
        for (task, outcome) in ready
            .iter()
            .zip(self.dispatcher.enqueue_all(ready.clone()))
        {
            match outcome {
                Ok(task) => resumed.push(task),
                Err(error) => {
                    warn!(url = %task.url(), error = %error, "resume rejected");
                    task.set_state(TaskState::Pause);
                    lock(&self.paused).push(Arc::clone(task));
                }
            }
        }
        info!(resumed = resumed.len(), "resumed all tasks");
        resumed
    }

    /// Finds a queued or running task; paused tasks are not searched.
    #[must_use]
    pub fn find_by_url(&self, url: &str) -> Option<TaskHandle> {
        self.dispatcher.find_by_url(url)
    }

    /// Finds the first queued or running task carrying `tag`.
    #[must_use]
    pub fn find_by_tag(&self, tag: &str) -> Option<TaskHandle> {
        self.dispatcher.find_by_tag(tag)
    }

    /// Snapshot of the holding set.
    #[must_use]
    pub fn paused_tasks(&self) -> Vec<TaskHandle> {
        lock(&self.paused)
            .iter()
            .filter(|task| task.state() == TaskState::Pause)
            .cloned()
            .collect()
    }

    /// Tasks in the ready and running queues.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.dispatcher.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.dispatcher.running_count()
    }

    /// Outcome counters for finished transfers.
    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        self.engine.stats()
    }

    /// Cancels all active tasks, forgets paused ones (their breakpoints
    /// stay on disk), waits for in-flight transfers to report, and closes
    /// the breakpoint store.
    #[instrument(skip(self))]
    pub async fn destroy(mut self) {
        let active = self.dispatcher.tasks();
        for task in &active {
            task.request_stop(TaskState::Cancel);
        }
        for (task, slot) in self.dispatcher.destroy() {
            if slot == QueueSlot::Ready && task.state() == TaskState::Cancel {
                self.discard_breakpoint(&task).await;
                self.signals.emit(DownloadEvent::Cancel(task));
            }
        }
        let forgotten = {
            let mut paused = lock(&self.paused);
            let count = paused.len();
            paused.clear();
            count
        };
        self.engine.cancel_all();

        if self.signals.send(Signal::Shutdown).is_ok() {
            if let Err(error) = (&mut self.coordinator).await {
                error!(error = %error, "coordinator stopped abnormally");
            }
        }
        self.store.close().await;
        info!(
            canceled = active.len(),
            forgotten, "download manager destroyed"
        );
    }

    fn prepare(&self, config: TaskConfig) -> Result<TaskHandle, CoreError> {
        let task = Arc::new(DownloadTask::from_config(config)?);
        if lock(&self.paused).iter().any(|held| held.url() == task.url()) {
            return Err(CoreError::IdentityConflict {
                url: task.url().to_string(),
            });
        }
        Ok(task)
    }

    fn pause_active(&self, task: TaskHandle) -> Result<TaskHandle, CoreError> {
        loop {
            let state = task.state();
            match state {
                TaskState::Start if !task.supports_resume() => {
                    let error = CoreError::UnresumableTransfer {
                        url: task.url().to_string(),
                    };
                    warn!(url = %task.url(), "pause refused: transfer cannot resume");
                    self.report(Some(&task), &error);
                    return Err(error);
                }
                TaskState::Wait | TaskState::Start => {
                    if task.request_stop_from(state, TaskState::Pause) {
                        break;
                    }
                }
                _ => return Err(self.not_found(CoreError::not_found_by_url(task.url()))),
            }
        }

        match self.dispatcher.cancel(&task) {
            Ok(slot) => {
                lock(&self.paused).push(Arc::clone(&task));
                if slot == QueueSlot::Ready {
                    self.signals.emit(DownloadEvent::Pause(Arc::clone(&task)));
                }
                info!(url = %task.url(), bytes = task.bytes_transferred(), "paused");
                Ok(task)
            }
            Err(error) => {
                debug!(url = %task.url(), "task finished while pausing");
                Err(error.into())
            }
        }
    }

    async fn cancel_active(&self, task: &TaskHandle) {
        let stopping = task.request_stop(TaskState::Cancel);
        match self.dispatcher.cancel(task) {
            Ok(QueueSlot::Ready) => {
                self.discard_breakpoint(task).await;
                self.signals.emit(DownloadEvent::Cancel(Arc::clone(task)));
            }
            Ok(QueueSlot::Running) => {}
            Err(error) => debug!(error = %error, "task left the queues while canceling"),
        }
        info!(url = %task.url(), stopping, "canceled");
    }

    async fn cancel_paused(&self, task: TaskHandle) -> Result<TaskHandle, CoreError> {
        task.wait_settled().await;
        if !task.transition(TaskState::Pause, TaskState::Cancel) {
            return Err(self.not_found(CoreError::not_found_by_url(task.url())));
        }
        self.discard_breakpoint(&task).await;
        info!(url = %task.url(), "canceled paused task");
        self.signals.emit(DownloadEvent::Cancel(Arc::clone(&task)));
        Ok(task)
    }

    async fn resume_paused(&self, task: TaskHandle) -> Result<TaskHandle, CoreError> {
        task.wait_settled().await;
        if !task.transition(TaskState::Pause, TaskState::Wait) {
            return Err(self.not_found(CoreError::not_found_by_url(task.url())));
        }
        if let Err(error) = self.dispatcher.enqueue(Arc::clone(&task)) {
            task.set_state(TaskState::Pause);
            lock(&self.paused).push(task);
            return Err(error.into());
        }
        info!(url = %task.url(), offset = task.bytes_transferred(), "resumed");
        Ok(task)
    }

    fn take_paused(&self, matches: impl Fn(&TaskHandle) -> bool) -> Option<TaskHandle> {
        let mut paused = lock(&self.paused);
        let index = paused.iter().position(|task| matches(task))?;
        Some(paused.remove(index))
    }

    async fn discard_breakpoint(&self, task: &TaskHandle) {
        if let Err(error) = self.store.delete_by_url(task.url_identity()).await {
            warn!(url = %task.url(), error = %error, "failed to delete breakpoint");
        }
    }

    fn not_found(&self, error: CoreError) -> CoreError {
        debug!(error = %error, "lookup missed");
        self.report(None, &error);
        error
    }

    fn report(&self, task: Option<&TaskHandle>, error: &CoreError) {
        if let Some(callback) = current_callback(&self.callback) {
            callback.on_error(task, error);
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.coordinator.abort();
    }
}

/// Consumes scheduling and transfer events on behalf of the manager.
struct Coordinator {
    dispatcher: Arc<Dispatcher>,
    engine: Arc<DownloadEngine>,
    callback: CallbackSlot,
    paused: PausedSet,
    sink: Arc<dyn EventSink<DownloadEvent>>,
    transfers: JoinSet<()>,
}

impl Coordinator {
    async fn run(mut self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        let mut shutting_down = false;
        loop {
            if shutting_down && self.transfers.is_empty() {
                while let Ok(signal) = signals.try_recv() {
                    match signal {
                        Signal::Dispatch(DispatchEvent::Start(task)) => task.end_transfer(),
                        signal => self.handle(signal),
                    }
                }
                break;
            }
            tokio::select! {
                Some(joined) = self.transfers.join_next(), if !self.transfers.is_empty() => {
                    if let Err(error) = joined {
                        error!(error = %error, "transfer task failed");
                    }
                }
                signal = signals.recv() => match signal {
                    Some(Signal::Shutdown) => shutting_down = true,
                    Some(signal) => self.handle(signal),
                    None => break,
                },
            }
        }
        debug!("coordinator stopped");
    }

    fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::Dispatch(DispatchEvent::Wait(task)) => self.deliver(&DownloadEvent::Wait(task)),
            Signal::Dispatch(DispatchEvent::Start(task)) => self.spawn_transfer(task),
            Signal::Dispatch(DispatchEvent::CancelNeeded { task, run }) => {
                // The stop itself was recorded before the dispatcher let go.
                if run == task.current_run() {
                    task.wake_stop();
                } else {
                    debug!(url = %task.url(), run, "stale stop request dropped");
                }
            }
            Signal::Download(event) => self.on_download(&event),
            Signal::Shutdown => {}
        }
    }

    fn on_download(&self, event: &DownloadEvent) {
        self.deliver(event);
        if matches!(
            event,
            DownloadEvent::Error { .. } | DownloadEvent::Complete(_)
        ) {
            let task = event.task();
            if let Err(error) = self.dispatcher.cancel(task) {
                debug!(error = %error, "finished task already released");
            }
            lock(&self.paused).retain(|held| !Arc::ptr_eq(held, task));
        }
    }

    fn spawn_transfer(&mut self, task: TaskHandle) {
        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        self.transfers.spawn(async move {
            let run = AssertUnwindSafe(engine.start_download(Arc::clone(&task), sink.as_ref()))
                .catch_unwind()
                .await;
            if run.is_err() {
                error!(url = %task.url(), "transfer panicked");
                task.set_state(TaskState::Error);
                sink.emit(DownloadEvent::Error {
                    task: Arc::clone(&task),
                    error: DownloadError::Aborted {
                        url: task.url().to_string(),
                    }
                    .into(),
                });
                task.end_transfer();
            }
        });
    }

    fn deliver(&self, event: &DownloadEvent) {
        if let Some(callback) = current_callback(&self.callback) {
            event.deliver(callback.as_ref());
        }
    }
}

fn current_callback(slot: &CallbackSlot) -> Option<Arc<dyn DownloadCallback>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn lock(paused: &PausedSet) -> MutexGuard<'_, Vec<TaskHandle>> {
    paused.lock().unwrap_or_else(PoisonError::into_inner)
}
