//! Notifications flowing from the scheduler and the engine to the caller.
//!
//! Components never call each other through stored closures. The
//! dispatcher and the engine emit typed events into an [`EventSink`]; the
//! manager owns the single consumer and fans events out to the registered
//! [`DownloadCallback`]. One FIFO channel carries every event, so for a
//! single task the caller sees `wait <= start <= progress* <= terminal`.

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::CoreError;
use crate::task::TaskHandle;

/// Destination for events of type `E`.
pub trait EventSink<E>: Send + Sync {
    /// Delivers `event` without blocking.
    fn emit(&self, event: E);
}

impl<E, T> EventSink<E> for mpsc::UnboundedSender<T>
where
    T: From<E> + Send,
{
    fn emit(&self, event: E) {
        if self.send(T::from(event)).is_err() {
            trace!("event receiver dropped");
        }
    }
}

/// Per-task notification produced by the engine (or synthesized by the
/// manager for tasks that never reached the engine).
#[derive(Debug)]
pub enum DownloadEvent {
    /// Queued and waiting for a slot.
    Wait(TaskHandle),
    /// Response headers received; streaming begins.
    Start(TaskHandle),
    /// A buffer was written.
    Progress {
        /// The transferring task.
        task: TaskHandle,
        /// Bytes on disk, counted from the start of the file.
        transferred: u64,
        /// Expected final size, when known.
        total: Option<u64>,
    },
    /// Stopped; breakpoint kept.
    Pause(TaskHandle),
    /// Stopped; breakpoint deleted.
    Cancel(TaskHandle),
    /// Failed.
    Error {
        /// The failed task.
        task: TaskHandle,
        /// Cause.
        error: CoreError,
    },
    /// All bytes written.
    Complete(TaskHandle),
}

impl DownloadEvent {
    #[must_use]
    pub fn task(&self) -> &TaskHandle {
        match self {
            Self::Wait(task)
            | Self::Start(task)
            | Self::Pause(task)
            | Self::Cancel(task)
            | Self::Complete(task)
            | Self::Progress { task, .. }
            | Self::Error { task, .. } => task,
        }
    }

    /// Returns true for the single notification that ends a transfer attempt.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Pause(_) | Self::Cancel(_) | Self::Error { .. } | Self::Complete(_)
        )
    }

    /// Invokes the matching callback method.
    pub fn deliver(&self, callback: &dyn DownloadCallback) {
        match self {
            Self::Wait(task) => callback.on_wait(task),
            Self::Start(task) => callback.on_start(task),
            Self::Progress {
                task,
                transferred,
                total,
            } => callback.on_progress(task, *transferred, *total),
            Self::Pause(task) => callback.on_pause(task),
            Self::Cancel(task) => callback.on_cancel(task),
            Self::Error { task, error } => callback.on_error(Some(task), error),
            Self::Complete(task) => callback.on_complete(task),
        }
    }
}

/// Caller-facing notifications. Every method defaults to a no-op.
///
/// Methods run on the manager's event task; keep them short.
#[allow(unused_variables)]
pub trait DownloadCallback: Send + Sync {
    fn on_wait(&self, task: &TaskHandle) {}

    fn on_start(&self, task: &TaskHandle) {}

    fn on_progress(&self, task: &TaskHandle, transferred: u64, total: Option<u64>) {}

    fn on_pause(&self, task: &TaskHandle) {}

    fn on_cancel(&self, task: &TaskHandle) {}

    /// `task` is `None` when a command named a task that does not exist.
    fn on_error(&self, task: Option<&TaskHandle>, error: &CoreError) {}

    fn on_complete(&self, task: &TaskHandle) {}
}
