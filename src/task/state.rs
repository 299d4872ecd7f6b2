//! Task lifecycle states and their lock-free cell.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle state of a [`DownloadTask`](super::DownloadTask).
///
/// `Wait -> Start -> {Pause, Cancel, Error, Complete}`; `Pause -> Wait` on resume.
/// `Cancel`, `Error` and `Complete` are terminal for a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    /// Queued, not transferring.
    Wait = 0,
    /// Transfer in progress.
    Start = 1,
    /// Stopped with a breakpoint kept for later resumption.
    Pause = 2,
    /// Stopped and discarded.
    Cancel = 3,
    /// Failed; the breakpoint (if any) is kept.
    Error = 4,
    /// All expected bytes written.
    Complete = 5,
}

impl TaskState {
    /// Returns true for states a task instance never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancel | Self::Error | Self::Complete)
    }

    /// Returns the stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Cancel => "cancel",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Start,
            2 => Self::Pause,
            3 => Self::Cancel,
            4 => Self::Error,
            5 => Self::Complete,
            _ => Self::Wait,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically readable [`TaskState`].
///
/// The streaming loop polls this once per buffer; every other writer goes
/// through the manager or dispatcher.
#[derive(Debug)]
pub(crate) struct AtomicTaskState(AtomicU8);

impl AtomicTaskState {
    pub(crate) fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Moves to `new` only if the current state is `current`.
    pub(crate) fn transition(&self, current: TaskState, new: TaskState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
