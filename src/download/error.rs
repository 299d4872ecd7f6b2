//! Error types for the download module.
//!
//! Every variant carries the url or path it concerns so a failure reported
//! through `on_error` is actionable without the task at hand.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Connection dropped mid-body by a transport that is not reqwest-backed.
    #[error("connection interrupted downloading {url}: {reason}")]
    Interrupted {
        /// The URL being streamed.
        url: String,
        /// Transport-provided description.
        reason: String,
    },

    /// Non-success HTTP response. A 416 means the stored offset is no
    /// longer satisfiable.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while opening, seeking or writing the destination.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A caller-supplied request header could not be encoded.
    #[error("invalid request header {name} for {url}")]
    InvalidHeader {
        /// The URL the header was meant for.
        url: String,
        /// Header name as supplied.
        name: String,
    },

    /// The body ended before the advertised length was written.
    #[error("{url} ended early: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// The URL being streamed.
        url: String,
        /// Advertised total in bytes.
        expected: u64,
        /// Bytes on disk when the body ended.
        actual: u64,
    },

    /// The partial file on disk is shorter than the stored breakpoint.
    #[error("partial file {path} holds {actual} bytes but resume starts at {expected}")]
    PartialFileMissing {
        /// Destination path.
        path: PathBuf,
        /// Offset the server resumed from.
        expected: u64,
        /// Current file length.
        actual: u64,
    },

    /// The transfer task stopped without reporting an outcome.
    #[error("transfer of {url} aborted unexpectedly")]
    Aborted {
        /// The URL being transferred.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error, promoting timeouts to [`DownloadError::Timeout`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn interrupted(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn incomplete(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::Incomplete {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Returns the HTTP status for [`DownloadError::HttpStatus`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server rejected the requested range (HTTP 416).
    #[must_use]
    pub fn is_range_not_satisfiable(&self) -> bool {
        self.status() == Some(416)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/file.iso");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/file.iso"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.iso", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/file.iso"),
            "Expected URL in: {msg}"
        );
        assert_eq!(error.status(), Some(404));
        assert!(!error.is_range_not_satisfiable());
    }

    #[test]
    fn test_range_not_satisfiable_detected() {
        let error = DownloadError::http_status("https://example.com/file.iso", 416);
        assert!(error.is_range_not_satisfiable());
        assert_eq!(DownloadError::timeout("u").status(), None);
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/test.iso"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/test.iso"), "Expected path in: {msg}");
    }

    #[test]
    fn test_download_error_incomplete_display() {
        let error = DownloadError::incomplete("https://example.com/file.iso", 5000, 3000);
        let msg = error.to_string();
        assert!(msg.contains("5000"), "Expected expected-size in: {msg}");
        assert!(msg.contains("3000"), "Expected actual-size in: {msg}");
    }

    #[test]
    fn test_download_error_interrupted_display() {
        let error = DownloadError::interrupted("https://example.com/f", "connection reset");
        assert_eq!(
            error.to_string(),
            "connection interrupted downloading https://example.com/f: connection reset"
        );
    }
}
