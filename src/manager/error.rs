//! Errors returned by [`DownloadManager`](super::DownloadManager) operations.
//!
//! Transfer failures are not errors here: they become
//! [`TaskState::Failed`](super::TaskState::Failed) and a failure event.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors from manager operations themselves.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The URL does not parse or is not `http`/`https`.
    #[error("invalid download URL: {url}")]
    InvalidUrl {
        /// The rejected input
        url: String,
    },

    /// The operation is not valid from the task's current state.
    #[error("cannot {operation} {url} while it is {state}")]
    InvalidTransition {
        /// Normalized URL of the task
        url: String,
        /// Operation that was attempted
        operation: &'static str,
        /// Current state label, `untracked` for unknown URLs
        state: &'static str,
    },

    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Removing artifacts during cancel failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    pub(crate) fn invalid_transition(
        url: impl Into<String>,
        operation: &'static str,
        state: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            url: url.into(),
            operation,
            state,
        }
    }
}
