//! Error taxonomy surfaced by the manager and through callbacks.
//!
//! Transport and persistence failures keep their module-level error as the
//! source; identity and lookup failures are raised by the manager itself.

use thiserror::Error;

use crate::breakpoint::BreakpointError;
use crate::dispatcher::DispatchError;
use crate::download::DownloadError;

/// Errors reported by the download manager, synchronously or via `on_error`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The url is already queued or running.
    #[error("a task for {url} is already queued")]
    IdentityConflict {
        /// The duplicated url.
        url: String,
    },

    /// No active or paused task matched the lookup.
    #[error("no task found for {lookup}")]
    TaskNotFound {
        /// Human-readable lookup key, e.g. `url https://...` or `tag nightly`.
        lookup: String,
    },

    /// Pause requested on a transfer without byte-range support.
    #[error("transfer of {url} does not support resumption and cannot be paused")]
    UnresumableTransfer {
        /// The url of the transfer.
        url: String,
    },

    /// Task configuration failed validation.
    #[error("invalid task: {reason}")]
    InvalidTask {
        /// What was wrong.
        reason: String,
    },

    /// Manager configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// Network-level failure before or during streaming.
    #[error(transparent)]
    Transport(#[from] DownloadError),

    /// Breakpoint store unavailable.
    #[error(transparent)]
    Persistence(#[from] BreakpointError),
}

impl From<DispatchError> for CoreError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Duplicate { url } => Self::IdentityConflict { url },
            DispatchError::NotQueued { lookup } => Self::TaskNotFound { lookup },
            DispatchError::InvalidConcurrency { .. } => Self::invalid_config(error.to_string()),
        }
    }
}

impl CoreError {
    pub(crate) fn invalid_task(reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found_by_url(url: &str) -> Self {
        Self::TaskNotFound {
            lookup: format!("url {url}"),
        }
    }

    pub(crate) fn not_found_by_tag(tag: &str) -> Self {
        Self::TaskNotFound {
            lookup: format!("tag {tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conflict_display() {
        let error = CoreError::IdentityConflict {
            url: "https://example.com/a.bin".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("already queued"), "unexpected: {msg}");
        assert!(msg.contains("https://example.com/a.bin"));
    }

    #[test]
    fn test_not_found_lookup_labels() {
        assert_eq!(
            CoreError::not_found_by_tag("nightly").to_string(),
            "no task found for tag nightly"
        );
        assert!(
            CoreError::not_found_by_url("https://x.test/f")
                .to_string()
                .contains("url https://x.test/f")
        );
    }

    #[test]
    fn test_dispatch_errors_map_to_taxonomy() {
        let conflict = CoreError::from(DispatchError::Duplicate {
            url: "https://example.com/a".to_string(),
        });
        assert!(matches!(conflict, CoreError::IdentityConflict { .. }));
        let invalid = CoreError::from(DispatchError::InvalidConcurrency { value: 0 });
        assert!(matches!(invalid, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let error = CoreError::from(DownloadError::timeout("https://example.com/a.bin"));
        assert_eq!(error.to_string(), "timeout downloading https://example.com/a.bin");
    }
}
