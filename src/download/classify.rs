//! Failure classification for download errors.
//!
//! The engine never retries on its own. Classification decides two things:
//! whether the caller is told a retry may help, and whether the partial file
//! and progress record survive the failure.
//!
//! - [`FailureType::Transient`] - may succeed on a later `start`; artifacts kept
//! - [`FailureType::LocalResource`] - local disk problem; artifacts kept for
//!   diagnosis until the condition is fixed
//! - [`FailureType::Permanent`] - will not succeed; artifacts purged

use tracing::instrument;

use super::DownloadError;

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed when started again.
    ///
    /// Examples: connection reset, 5xx server errors, truncated body.
    Transient,

    /// The local file system refused an operation (permission, disk full).
    LocalResource,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 403 Forbidden, invalid URL.
    Permanent,
}

impl FailureType {
    /// Whether a later `start` for the same URL could plausibly succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }

    /// Whether the partial file and progress record should be kept.
    #[must_use]
    pub fn keeps_progress(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Classifies a download error.
///
/// | Error | Type |
/// |-------|------|
/// | Network (most), Timeout | Transient |
/// | Network (TLS) | Permanent |
/// | Protocol 408, 429, 5xx | Transient |
/// | Protocol other 4xx / unexpected | Permanent |
/// | TruncatedTransfer | Transient |
/// | RangeMismatch | Permanent |
/// | FileSystem | LocalResource |
/// | InvalidUrl | Permanent |
#[instrument(level = "debug", skip(error), fields(error = %error))]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Protocol { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. } | DownloadError::TruncatedTransfer { .. } => {
            FailureType::Transient
        }

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::FileSystem { .. } => FailureType::LocalResource,

        DownloadError::RangeMismatch { .. } | DownloadError::InvalidUrl { .. } => {
            FailureType::Permanent
        }
    }
}

/// Classifies an HTTP status code into a failure type.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient, // Request Timeout
        429 => FailureType::Transient, // Too Many Requests

        // Other 4xx are client errors: permanent
        status if (400..500).contains(&status) => FailureType::Permanent,

        // 5xx are server errors: transient
        status if (500..600).contains(&status) => FailureType::Transient,

        // Redirect loops, informational or other oddities
        _ => FailureType::Permanent,
    }
}

/// Checks whether a reqwest error looks like a TLS/certificate failure.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("certificate") || message.contains("tls") || message.contains("ssl")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 410, 451] {
            let error = DownloadError::protocol("https://example.com/a", status);
            assert_eq!(
                classify_error(&error),
                FailureType::Permanent,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504, 599] {
            let error = DownloadError::protocol("https://example.com/a", status);
            assert_eq!(
                classify_error(&error),
                FailureType::Transient,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_throttling_statuses_are_transient() {
        assert_eq!(
            classify_error(&DownloadError::protocol("https://example.com/a", 408)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::protocol("https://example.com/a", 429)),
            FailureType::Transient
        );
    }

    #[test]
    fn test_unexpected_success_status_is_permanent() {
        let error = DownloadError::protocol("https://example.com/a", 204);
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_truncated_and_timeout_keep_progress() {
        let truncated = classify_error(&DownloadError::truncated("https://example.com/a", 1, 2));
        assert_eq!(truncated, FailureType::Transient);
        assert!(truncated.keeps_progress());
        assert!(truncated.is_retryable());

        let timeout = classify_error(&DownloadError::timeout("https://example.com/a"));
        assert_eq!(timeout, FailureType::Transient);
    }

    #[test]
    fn test_filesystem_errors_keep_progress_but_are_local() {
        let io_error = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        let failure = classify_error(&DownloadError::io(PathBuf::from("/tmp/a.part"), io_error));
        assert_eq!(failure, FailureType::LocalResource);
        assert!(failure.keeps_progress());
    }

    #[test]
    fn test_permanent_failures_purge_progress() {
        let failure = classify_error(&DownloadError::range_mismatch("https://example.com/a", 5, 0));
        assert_eq!(failure, FailureType::Permanent);
        assert!(!failure.keeps_progress());
        assert!(!failure.is_retryable());
    }
}
