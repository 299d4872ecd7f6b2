//! HTTP transfer layer: transport, range negotiation and the streaming engine.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large files)
//! - Byte-range resume guarded by `If-Range`
//! - Breakpoint persisted after every buffer
//! - Configurable timeouts (30s connect, 5min read by default)
//! - Structured error types with full context

mod client;
mod constants;
mod engine;
mod error;
pub mod range;

pub use client::{BodyStream, HttpClient, TransferRequest, TransferResponse, Transport};
pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use engine::{DownloadEngine, DownloadStats};
pub use error::DownloadError;
pub use range::{ResumeProbe, resume_headers};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
