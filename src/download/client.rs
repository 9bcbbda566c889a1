//! HTTP client wrapper for ranged downloads.
//!
//! This module provides the `HttpClient` struct which owns the pooled reqwest
//! client and issues the (optionally Range-qualified) GET for a transfer.
//! Status interpretation is left to [`TransferSession`](super::TransferSession).

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{IF_RANGE, RANGE};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/resumable-downloader";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("resumable-downloader/{version} (+{PROJECT_UA_URL})")
}

/// HTTP client for streaming downloads.
///
/// Created once and shared by every task of a manager so connections are
/// pooled. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Per-read timeout: 5 minutes
    /// - No transparent decompression (byte counts must match the wire)
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
            &default_user_agent(),
        )
        .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeouts and User-Agent.
    ///
    /// The read timeout applies to each body read, not to the whole transfer,
    /// so large downloads are not cut off by it.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialized.
    pub fn with_settings(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Sends the GET for a transfer.
    ///
    /// With `resume_offset > 0` the request carries `Range: bytes=<offset>-`
    /// and, when a validator is known, `If-Range: <validator>` so a changed
    /// resource comes back whole instead of as a mismatched suffix.
    ///
    /// Any HTTP status is returned as `Ok`; only transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`] or [`DownloadError::Network`] when
    /// the request cannot be sent or the headers do not arrive, and
    /// [`DownloadError::InvalidUrl`] when reqwest rejects the URL.
    #[instrument(level = "debug", skip(self, validator), fields(url = %url))]
    pub async fn send_get(
        &self,
        url: &str,
        resume_offset: u64,
        validator: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url);
        if resume_offset > 0 {
            request = request.header(RANGE, format!("bytes={resume_offset}-"));
            if let Some(validator) = validator {
                request = request.header(IF_RANGE, validator);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else if e.is_builder() {
                DownloadError::invalid_url(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        debug!(status = response.status().as_u16(), "response headers received");
        Ok(response)
    }
}
