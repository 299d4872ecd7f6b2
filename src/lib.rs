//! Resumable Download Core Library
//!
//! A concurrency-bounded download engine that streams files over HTTP and
//! can pause, cancel and later resume each transfer from the exact byte
//! offset where it stopped, using `Range`/`If-Range` and breakpoint
//! records persisted across process restarts.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`task`] - Task identity, configuration and lifecycle state
//! - [`breakpoint`] - Resume record contract with `SQLite` and in-memory stores
//! - [`db`] - Database connection and schema management
//! - [`download`] - Transport, range negotiation and the streaming engine
//! - [`dispatcher`] - Ready/running queues under a concurrency ceiling
//! - [`manager`] - Command façade, paused holding set and callback fan-out
//! - [`callback`] - Event types and the caller callback trait

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod breakpoint;
pub mod callback;
pub mod db;
pub mod dispatcher;
pub mod download;
pub mod error;
pub mod manager;
pub mod task;

// Re-export commonly used types
pub use breakpoint::{
    BreakpointError, BreakpointRecord, BreakpointStore, MemoryBreakpointStore,
    SqliteBreakpointStore,
};
pub use callback::{DownloadCallback, DownloadEvent};
pub use db::Database;
pub use dispatcher::{DEFAULT_CONCURRENCY, DispatchError, DispatchEvent, Dispatcher};
pub use download::{DownloadEngine, DownloadError, HttpClient, Transport};
pub use error::CoreError;
pub use manager::{DownloadManager, ManagerConfig};
pub use task::{DownloadTask, TaskConfig, TaskHandle, TaskState};
