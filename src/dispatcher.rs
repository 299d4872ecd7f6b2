//! Concurrency-bounded scheduler.
//!
//! The dispatcher owns two queues: `ready` (ordered by priority, highest
//! first, ties in arrival order) and `running` (insertion order). Whenever
//! a slot frees, the head of `ready` is promoted and a
//! [`DispatchEvent::Start`] is emitted. All queue mutations happen under
//! one lock; events are emitted while it is held, so their order matches
//! the order of the mutations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

use crate::callback::EventSink;
use crate::task::{TaskHandle, TaskState};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Error type for dispatcher operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A task for the same url is already ready or running.
    #[error("a task for {url} is already queued")]
    Duplicate {
        /// The duplicated url.
        url: String,
    },

    /// The task is in neither queue.
    #[error("no queued task for {lookup}")]
    NotQueued {
        /// The lookup that missed.
        lookup: String,
    },
}

/// Scheduling notifications.
#[derive(Debug)]
pub enum DispatchEvent {
    /// Accepted into the ready queue.
    Wait(TaskHandle),
    /// Promoted to running; the consumer must start the transfer.
    Start(TaskHandle),
    /// Removed from running while its transfer may still be active; the
    /// consumer must stop it (the task state says pause or cancel).
    ///
    /// A consumer whose task now reports a different run number must drop
    /// the event; the task has been resumed since.
    CancelNeeded {
        /// The removed task.
        task: TaskHandle,
        /// The task's run number when it was removed.
        run: u64,
    },
}

/// Which queue a removed task was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    /// Never started; no transfer to stop.
    Ready,
    /// Held a concurrency slot.
    Running,
}

#[derive(Default)]
struct Queues {
    ready: VecDeque<TaskHandle>,
    running: VecDeque<TaskHandle>,
}

impl Queues {
    fn contains_url(&self, url: &str) -> bool {
        self.running
            .iter()
            .chain(self.ready.iter())
            .any(|task| task.url() == url)
    }

    fn insert_ready(&mut self, task: TaskHandle) {
        let index = self
            .ready
            .iter()
            .position(|queued| queued.priority() < task.priority())
            .unwrap_or(self.ready.len());
        self.ready.insert(index, task);
    }

    fn find(&self, matches: impl Fn(&TaskHandle) -> bool) -> Option<TaskHandle> {
        self.running
            .iter()
            .chain(self.ready.iter())
            .find(|task| matches(task))
            .cloned()
    }
}

/// Ready/running scheduler with a fixed concurrency ceiling.
pub struct Dispatcher {
    queues: Mutex<Queues>,
    max_concurrency: usize,
    events: Arc<dyn EventSink<DispatchEvent>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_concurrency", &self.max_concurrency)
            .field("ready", &self.ready_count())
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher emitting into `events`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConcurrency`] if `max_concurrency` is
    /// outside [`MIN_CONCURRENCY`]..=[`MAX_CONCURRENCY`].
    pub fn new(
        max_concurrency: usize,
        events: Arc<dyn EventSink<DispatchEvent>>,
    ) -> Result<Self, DispatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(DispatchError::InvalidConcurrency {
                value: max_concurrency,
            });
        }
        Ok(Self {
            queues: Mutex::new(Queues::default()),
            max_concurrency,
            events,
        })
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Adds `task` to the ready queue and promotes while slots are free.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Duplicate`] if a task with the same url is
    /// ready or running; the queues are left unchanged.
    pub fn enqueue(&self, task: TaskHandle) -> Result<(), DispatchError> {
        let mut queues = self.lock();
        self.accept(&mut queues, task)?;
        self.promote(&mut queues);
        Ok(())
    }

    /// Adds several tasks, then runs a single promotion pass so the
    /// highest priorities of the whole batch start first.
    pub fn enqueue_all(&self, tasks: Vec<TaskHandle>) -> Vec<Result<TaskHandle, DispatchError>> {
        let mut queues = self.lock();
        let results = tasks
            .into_iter()
            .map(|task| {
                self.accept(&mut queues, Arc::clone(&task))?;
                Ok(task)
            })
            .collect();
        self.promote(&mut queues);
        results
    }

    /// Removes `task` from whichever queue holds it and backfills the slot.
    ///
    /// A task taken from `running` whose state is not already `Complete` or
    /// `Error` produces a [`DispatchEvent::CancelNeeded`]. A task taken
    /// from `ready` never reached the engine, so nothing is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotQueued`] if neither queue holds `task`.
    pub fn cancel(&self, task: &TaskHandle) -> Result<QueueSlot, DispatchError> {
        let mut queues = self.lock();
        self.remove(&mut queues, task).ok_or_else(|| DispatchError::NotQueued {
            lookup: format!("url {}", task.url()),
        })
    }

    /// Cancels the queued task for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotQueued`] if no queued task has this url.
    pub fn cancel_by_url(&self, url: &str) -> Result<(TaskHandle, QueueSlot), DispatchError> {
        self.cancel_matching(|task| task.url() == url, || format!("url {url}"))
    }

    /// Cancels the first queued task carrying `tag` (running tasks first).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotQueued`] if no queued task has this tag.
    pub fn cancel_by_tag(&self, tag: &str) -> Result<(TaskHandle, QueueSlot), DispatchError> {
        self.cancel_matching(|task| task.tag() == tag, || format!("tag {tag}"))
    }

    #[must_use]
    pub fn find_by_url(&self, url: &str) -> Option<TaskHandle> {
        self.lock().find(|task| task.url() == url)
    }

    /// Returns the first queued task carrying `tag`, running tasks first.
    #[must_use]
    pub fn find_by_tag(&self, tag: &str) -> Option<TaskHandle> {
        self.lock().find(|task| task.tag() == tag)
    }

    /// Snapshot of every queued task: running first, then ready in order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskHandle> {
        let queues = self.lock();
        queues
            .running
            .iter()
            .chain(queues.ready.iter())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.lock().ready.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let queues = self.lock();
        queues.running.len() + queues.ready.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties both queues and returns what they held.
    ///
    /// Running tasks that have not finished produce
    /// [`DispatchEvent::CancelNeeded`]. Calling this again returns nothing.
    pub fn destroy(&self) -> Vec<(TaskHandle, QueueSlot)> {
        let mut queues = self.lock();
        let running: Vec<_> = queues.running.drain(..).collect();
        let ready: Vec<_> = queues.ready.drain(..).collect();
        drop(queues);

        if !running.is_empty() || !ready.is_empty() {
            info!(
                running = running.len(),
                ready = ready.len(),
                "dispatcher destroyed"
            );
        }
        for task in &running {
            if needs_stop(task) {
                self.events.emit(DispatchEvent::CancelNeeded {
                    task: Arc::clone(task),
                    run: task.current_run(),
                });
            }
        }
        running
            .into_iter()
            .map(|task| (task, QueueSlot::Running))
            .chain(ready.into_iter().map(|task| (task, QueueSlot::Ready)))
            .collect()
    }

    fn accept(&self, queues: &mut Queues, task: TaskHandle) -> Result<(), DispatchError> {
        if queues.contains_url(task.url()) {
            debug!(url = %task.url(), "duplicate url rejected");
            return Err(DispatchError::Duplicate {
                url: task.url().to_string(),
            });
        }
        self.events.emit(DispatchEvent::Wait(Arc::clone(&task)));
        queues.insert_ready(task);
        Ok(())
    }

    fn promote(&self, queues: &mut Queues) {
        while queues.running.len() < self.max_concurrency {
            let Some(task) = queues.ready.pop_front() else {
                break;
            };
            let run = task.begin_transfer();
            debug!(url = %task.url(), priority = task.priority(), run, "promoted");
            queues.running.push_back(Arc::clone(&task));
            self.events.emit(DispatchEvent::Start(task));
        }
    }

    fn remove(&self, queues: &mut Queues, task: &TaskHandle) -> Option<QueueSlot> {
        let slot = if let Some(index) = position(&queues.running, task) {
            let removed = queues.running.remove(index)?;
            if needs_stop(&removed) {
                let run = removed.current_run();
                self.events.emit(DispatchEvent::CancelNeeded { task: removed, run });
            }
            QueueSlot::Running
        } else {
            let index = position(&queues.ready, task)?;
            queues.ready.remove(index)?;
            QueueSlot::Ready
        };
        self.promote(queues);
        Some(slot)
    }

    fn cancel_matching(
        &self,
        matches: impl Fn(&TaskHandle) -> bool,
        lookup: impl FnOnce() -> String,
    ) -> Result<(TaskHandle, QueueSlot), DispatchError> {
        let mut queues = self.lock();
        let task = queues
            .find(matches)
            .ok_or_else(|| DispatchError::NotQueued { lookup: lookup() })?;
        let slot = self
            .remove(&mut queues, &task)
            .ok_or_else(|| DispatchError::NotQueued {
                lookup: format!("url {}", task.url()),
            })?;
        Ok((task, slot))
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn position(queue: &VecDeque<TaskHandle>, task: &TaskHandle) -> Option<usize> {
    queue.iter().position(|queued| Arc::ptr_eq(queued, task))
}

fn needs_stop(task: &TaskHandle) -> bool {
    !matches!(task.state(), TaskState::Complete | TaskState::Error)
}
