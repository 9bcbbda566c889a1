//! One HTTP exchange that streams a resource, or a suffix of it, into a
//! [`PartialFileWriter`].
//!
//! # Status handling
//!
//! | Requested offset | Status | Meaning |
//! |------------------|--------|---------|
//! | 0 | 200 | fresh download |
//! | N > 0 | 206 | resume honored, body continues at N |
//! | N > 0 | 200 | Range ignored (or `If-Range` failed): body is the whole resource, prior bytes are discarded |
//! | N > 0 | 416 with `bytes */N` | the partial file already holds the whole resource |
//! | any | other | [`DownloadError::Protocol`] |

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, HeaderMap, LAST_MODIFIED};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{DownloadError, HttpClient, PartialFileWriter, ThroughputMeter};

/// How the server answered the transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// No offset was requested; the body is the whole resource.
    Fresh,
    /// `206 Partial Content`: the body continues at the requested offset.
    Resumed,
    /// `200 OK` to a Range request: the body is the whole resource.
    Restarted,
    /// Nothing left to fetch; the partial file is already complete.
    AlreadyComplete,
}

/// Tuning for the streaming loop.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Minimum spacing between throughput samples.
    pub progress_interval: Duration,
    /// A stream that yields nothing for this long is treated as truncated.
    pub stall_timeout: Duration,
}

/// Byte accounting after one chunk was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes in the partial file, including any resumed prefix.
    pub bytes_written: u64,
    /// Total resource size, `0` when unknown.
    pub total_expected: u64,
    /// Throughput sample, present at most once per progress interval.
    pub bytes_per_second: Option<u64>,
}

/// How a streaming loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server signalled end-of-body with all declared bytes received.
    Finished {
        /// Final length of the partial file.
        bytes_written: u64,
    },
    /// The cancellation token fired; the connection was dropped.
    Cancelled {
        /// Length of the partial file at the moment of cancellation.
        bytes_written: u64,
    },
}

/// An opened transfer whose headers have been interpreted.
#[derive(Debug)]
pub struct TransferSession {
    url: String,
    response: Option<reqwest::Response>,
    mode: ResumeMode,
    start_offset: u64,
    total_expected: u64,
    validator: Option<String>,
}

impl TransferSession {
    /// Sends the request and interprets the response headers.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Network`] / [`DownloadError::Timeout`] when no response arrives
    /// - [`DownloadError::Protocol`] for any status other than those in the module table
    /// - [`DownloadError::RangeMismatch`] when a `206` starts at the wrong byte
    #[instrument(level = "debug", skip(client, validator), fields(url = %url))]
    pub async fn open(
        client: &HttpClient,
        url: &str,
        resume_offset: u64,
        validator: Option<&str>,
    ) -> Result<Self, DownloadError> {
        let response = client.send_get(url, resume_offset, validator).await?;
        Self::from_response(url, resume_offset, response)
    }

    fn from_response(
        url: &str,
        resume_offset: u64,
        response: reqwest::Response,
    ) -> Result<Self, DownloadError> {
        let status = response.status();
        let headers = response.headers();
        let declared = header_u64(headers, CONTENT_LENGTH.as_str());
        let content_range = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let validator = extract_validator(headers);

        let (mode, start_offset, total_expected) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let start = content_range.and_then(|r| r.start).unwrap_or(resume_offset);
                if start != resume_offset {
                    return Err(DownloadError::range_mismatch(url, resume_offset, start));
                }
                let total = declared
                    .map(|remaining| resume_offset.saturating_add(remaining))
                    .or_else(|| content_range.and_then(|r| r.total))
                    .unwrap_or(0);
                let mode = if resume_offset > 0 {
                    ResumeMode::Resumed
                } else {
                    ResumeMode::Fresh
                };
                (mode, resume_offset, total)
            }
            StatusCode::OK => {
                let mode = if resume_offset > 0 {
                    warn!(
                        url = %url,
                        discarded = resume_offset,
                        "server ignored range request, restarting from zero"
                    );
                    ResumeMode::Restarted
                } else {
                    ResumeMode::Fresh
                };
                (mode, 0, declared.unwrap_or(0))
            }
            StatusCode::RANGE_NOT_SATISFIABLE
                if resume_offset > 0
                    && content_range.and_then(|r| r.total) == Some(resume_offset) =>
            {
                info!(url = %url, bytes = resume_offset, "partial file already complete");
                return Ok(Self {
                    url: url.to_string(),
                    response: None,
                    mode: ResumeMode::AlreadyComplete,
                    start_offset: resume_offset,
                    total_expected: resume_offset,
                    validator,
                });
            }
            other => return Err(DownloadError::protocol(url, other.as_u16())),
        };

        debug!(?mode, start_offset, total_expected, "transfer session opened");
        Ok(Self {
            url: url.to_string(),
            response: Some(response),
            mode,
            start_offset,
            total_expected,
            validator,
        })
    }

    /// How the server answered.
    #[must_use]
    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    /// Offset the body starts at: the resume offset, or `0` after a restart.
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Total resource size in bytes, `0` when the server did not declare it.
    #[must_use]
    pub fn total_expected(&self) -> u64 {
        self.total_expected
    }

    /// Strong `ETag` or `Last-Modified` usable as an `If-Range` validator.
    #[must_use]
    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    /// Streams the body into `writer` until end-of-body, error or cancellation.
    ///
    /// After a [`ResumeMode::Restarted`] answer the writer is reset to zero
    /// before the first byte is appended. Chunks are appended strictly in the
    /// order received. `on_progress` runs after every committed chunk.
    ///
    /// Cancellation drops the response, which aborts the connection, and is
    /// reported as [`StreamOutcome::Cancelled`] rather than an error.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::TruncatedTransfer`] when the body ends or stalls
    ///   before `total_expected` bytes
    /// - [`DownloadError::Network`] for transport failures when the total is unknown
    /// - [`DownloadError::FileSystem`] when appending fails
    pub async fn stream_into<F>(
        mut self,
        writer: &mut PartialFileWriter,
        settings: StreamSettings,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<StreamOutcome, DownloadError>
    where
        F: FnMut(TransferProgress),
    {
        if self.mode == ResumeMode::Restarted {
            writer.reset().await?;
        }

        let Some(response) = self.response.take() else {
            return Ok(StreamOutcome::Finished {
                bytes_written: writer.len(),
            });
        };

        let total = self.total_expected;
        let mut meter = ThroughputMeter::new(writer.len(), settings.progress_interval);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = tokio::time::timeout(settings.stall_timeout, stream.next()) => Some(next),
            };

            let Some(next) = next else {
                debug!(url = %self.url, bytes = writer.len(), "transfer cancelled in flight");
                return Ok(StreamOutcome::Cancelled {
                    bytes_written: writer.len(),
                });
            };

            match next {
                Err(_elapsed) => {
                    warn!(
                        url = %self.url,
                        bytes = writer.len(),
                        stall_secs = settings.stall_timeout.as_secs(),
                        "transfer stalled"
                    );
                    return Err(DownloadError::truncated(&self.url, writer.len(), total));
                }
                Ok(None) => break,
                Ok(Some(Err(error))) => {
                    if total > 0 {
                        debug!(error = %error, "body stream failed before declared length");
                        return Err(DownloadError::truncated(&self.url, writer.len(), total));
                    }
                    if error.is_timeout() {
                        return Err(DownloadError::timeout(&self.url));
                    }
                    return Err(DownloadError::network(&self.url, error));
                }
                Ok(Some(Ok(chunk))) => {
                    writer.append(&chunk).await?;
                    let bytes_written = writer.len();
                    on_progress(TransferProgress {
                        bytes_written,
                        total_expected: total,
                        bytes_per_second: meter.record(bytes_written),
                    });
                }
            }
        }

        writer.flush().await?;
        let bytes_written = writer.len();
        if total > 0 && bytes_written < total {
            return Err(DownloadError::truncated(&self.url, bytes_written, total));
        }
        Ok(StreamOutcome::Finished { bytes_written })
    }
}

/// Parsed `Content-Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    /// First byte of the range; `None` for the unsatisfied form `bytes */total`.
    start: Option<u64>,
    /// Complete length; `None` when the server sent `*`.
    total: Option<u64>,
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        digits => Some(digits.parse::<u64>().ok()?),
    };
    let start = match range.trim() {
        "*" => None,
        span => {
            let (first, _last) = span.split_once('-')?;
            Some(first.trim().parse::<u64>().ok()?)
        }
    };
    Some(ContentRange { start, total })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Weak ETags are not allowed in `If-Range`, so fall back to `Last-Modified`.
fn extract_validator(headers: &HeaderMap) -> Option<String> {
    let strong_etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|tag| !tag.starts_with("W/"));
    strong_etag
        .or_else(|| headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}
