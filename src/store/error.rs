//! Error types for progress persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing or deleting persisted progress.
///
/// Reads never fail: a missing or unreadable record is reported as "no
/// progress" by [`ProgressStore::load`](super::ProgressStore::load).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing the record (temp file or rename) failed.
    #[error("failed to write progress record {path}: {source}")]
    Write {
        /// File that could not be written
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Deleting a record or partial file failed for a reason other than absence.
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// File that could not be removed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialized.
    #[error("failed to encode progress record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a write error for the given path.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Creates a remove error for the given path.
    pub fn remove(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Remove {
            path: path.into(),
            source,
        }
    }
}
