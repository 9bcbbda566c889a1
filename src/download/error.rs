//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns so that the manager can
//! turn it into a human-readable failure reason without extra bookkeeping.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring a resource into its partial file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset, TLS).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being downloaded.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before the response headers arrived.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with a status other than `200` or `206`.
    #[error("HTTP {status} downloading {url}")]
    Protocol {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The body ended (or stalled) before the declared length was received.
    #[error("transfer of {url} ended after {received} of {expected} bytes")]
    TruncatedTransfer {
        /// The URL being downloaded.
        url: String,
        /// Bytes committed to the partial file so far.
        received: u64,
        /// Total bytes the server declared.
        expected: u64,
    },

    /// A `206` response whose `Content-Range` does not start at the requested offset.
    #[error("server resumed {url} at byte {actual}, expected {expected}")]
    RangeMismatch {
        /// The URL being downloaded.
        url: String,
        /// Offset that was requested.
        expected: u64,
        /// Offset the server sent.
        actual: u64,
    },

    /// File system error while creating, writing or moving a file.
    #[error("IO error on {path}: {source}")]
    FileSystem {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
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

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a protocol error for an unexpected HTTP status.
    pub fn protocol(url: impl Into<String>, status: u16) -> Self {
        Self::Protocol {
            url: url.into(),
            status,
        }
    }

    /// Creates a truncated-transfer error.
    pub fn truncated(url: impl Into<String>, received: u64, expected: u64) -> Self {
        Self::TruncatedTransfer {
            url: url.into(),
            received,
            expected,
        }
    }

    /// Creates a range-mismatch error.
    pub fn range_mismatch(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::RangeMismatch {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Creates a file system error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status for protocol errors.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// URL or path, which the source errors do not carry.
