//! HTTP transport for the streaming engine.
//!
//! The engine talks to the network only through [`Transport`], so tests and
//! embedders can substitute a scripted body. [`HttpClient`] is the reqwest
//! implementation used by default.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/resumable-downloader";

/// Body chunks in arrival order.
pub type BodyStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// A GET request for one transfer attempt.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    /// Caller headers merged with the range headers.
    pub headers: HeaderMap,
}

/// A successful (2xx) response whose body has not been read yet.
pub struct TransferResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Length of this body, from `Content-Length`.
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl fmt::Debug for TransferResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Issues transfer requests.
///
/// Implementations return [`DownloadError::HttpStatus`] for any non-2xx
/// status so the engine never streams an error page to disk.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn fetch(&self, request: TransferRequest) -> Result<TransferResponse, DownloadError>;
}

/// reqwest-backed [`Transport`].
///
/// This client is designed to be created once and reused for every
/// transfer, taking advantage of connection pooling. Content decoding is
/// left off: byte offsets must refer to the stored representation.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default timeouts (30s connect, 5min read).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// The read timeout bounds the silence between body reads, not the
    /// whole transfer.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialized.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(default_user_agent())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpClient {
    #[instrument(level = "debug", skip(self, request), fields(url = %request.url))]
    async fn fetch(&self, request: TransferRequest) -> Result<TransferResponse, DownloadError> {
        let TransferRequest { url, headers } = request;
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url.clone(), e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "server rejected request");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| DownloadError::from_reqwest(url.clone(), e)))
            .boxed();

        Ok(TransferResponse {
            status,
            headers,
            content_length,
            body,
        })
    }
}

/// Default User-Agent for transfer requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("resumable-downloader/{version} (+{PROJECT_UA_URL})")
}
