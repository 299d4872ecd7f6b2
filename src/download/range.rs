//! Range/If-Range negotiation for resumable transfers.
//!
//! Requests always carry a `Range` header. When a breakpoint with a
//! validator exists, the request resumes from the stored offset and adds
//! `If-Range` so a changed resource comes back whole (200) instead of as a
//! mismatched tail.

use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_RANGE, ETAG, HeaderMap, HeaderValue, IF_RANGE, LAST_MODIFIED, RANGE,
};
use tracing::{debug, warn};

use crate::breakpoint::{BreakpointRecord, BreakpointStore};

const FULL_RANGE: &str = "bytes=0-";

/// Builds the range headers for a transfer attempt.
///
/// A record without a validator cannot be checked against the server, so
/// the transfer starts over from byte zero.
#[must_use]
pub fn resume_headers(record: Option<&BreakpointRecord>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let resume = record.filter(|r| r.start_point > 0).and_then(|r| {
        let range = HeaderValue::from_str(&format!("bytes={}-", r.start_point)).ok()?;
        let validator = HeaderValue::from_str(&r.etag)
            .ok()
            .filter(|value| !value.is_empty())?;
        Some((range, validator))
    });

    match resume {
        Some((range, validator)) => {
            headers.insert(RANGE, range);
            headers.insert(IF_RANGE, validator);
        }
        None => {
            headers.insert(RANGE, HeaderValue::from_static(FULL_RANGE));
        }
    }
    headers
}

/// What a response says about resumability and where its body starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeProbe {
    /// The server honors byte ranges for this resource.
    pub supports_resume: bool,
    /// `ETag`, else `Last-Modified`; only captured when resumable.
    pub validator: Option<String>,
    /// File offset of the first body byte.
    pub base_offset: u64,
    /// Expected final file size, when determinable.
    pub total_length: Option<u64>,
}

impl ResumeProbe {
    /// Inspects response status and headers.
    ///
    /// `content_length` is the length of this response body, not of the
    /// whole resource.
    #[must_use]
    pub fn inspect(status: StatusCode, headers: &HeaderMap, content_length: Option<u64>) -> Self {
        let content_range = if status == StatusCode::PARTIAL_CONTENT {
            header_str(headers, CONTENT_RANGE.as_str()).and_then(parse_content_range)
        } else {
            None
        };
        let accepts_ranges = header_str(headers, ACCEPT_RANGES.as_str())
            .is_some_and(|value| !value.trim().eq_ignore_ascii_case("none"));
        let supports_resume =
            status == StatusCode::PARTIAL_CONTENT || accepts_ranges || content_range.is_some();

        let validator = if supports_resume {
            header_str(headers, ETAG.as_str())
                .or_else(|| header_str(headers, LAST_MODIFIED.as_str()))
                .map(str::to_string)
        } else {
            None
        };

        let base_offset = content_range.map_or(0, |range| range.start);
        let total_length = match content_length {
            Some(length) => base_offset.checked_add(length),
            None => content_range.and_then(|range| range.complete_length),
        };

        Self {
            supports_resume,
            validator,
            base_offset,
            total_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    complete_length: Option<u64>,
}

/// Parses `bytes <start>-<end>/<complete|*>`.
fn parse_content_range(value: &str) -> Option<ContentRange> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, complete) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let complete_length = complete.trim().parse().ok();
    Some(ContentRange {
        start,
        complete_length,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Reads the breakpoint for `url_hash`, degrading to a fresh start when the
/// store is unavailable.
pub(crate) async fn load_breakpoint(
    store: &dyn BreakpointStore,
    url_hash: &str,
) -> Option<BreakpointRecord> {
    match store.find(url_hash).await {
        Ok(record) => {
            if let Some(record) = &record {
                debug!(
                    start_point = record.start_point,
                    "resuming from stored breakpoint"
                );
            }
            record
        }
        Err(error) => {
            warn!(error = %error, "breakpoint lookup failed; starting from byte zero");
            None
        }
    }
}
