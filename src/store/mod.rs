//! Durable per-URL progress persistence.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/progress/<key>.json   ProgressRecord
//! <state_dir>/partials/<key>.part   bytes downloaded so far
//! ```
//!
//! `<key>` is the lowercase hex SHA-256 of the normalized URL, so it has a
//! bounded length and contains no path-unsafe characters. Collisions are
//! treated as impossible at that digest length.

mod error;
mod record;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::download::constants::PARTIAL_EXTENSION;

pub use error::StoreError;
pub use record::ProgressRecord;

const PROGRESS_DIR: &str = "progress";
const PARTIALS_DIR: &str = "partials";

/// Normalizes a URL string for use as a task identity.
///
/// Parses with [`Url`] (lowercasing scheme and host, dropping default ports)
/// and strips the fragment, which is never sent to the server. Strings that
/// do not parse are only trimmed.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.trim().to_string(),
    }
}

/// Persistence key for a URL: hex SHA-256 of its normalized form.
#[must_use]
pub fn url_key(url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

/// Small persistent map from URL to [`ProgressRecord`].
///
/// Each URL owns an independent file, so operations on different URLs never
/// interfere. Operations on the same URL are serialized by its owning task.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    root: PathBuf,
}

impl ProgressStore {
    /// Creates a store rooted at `state_dir`. Directories are created lazily.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into(),
        }
    }

    /// State directory this store writes under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the partial file for `url`.
    #[must_use]
    pub fn partial_path(&self, url: &str) -> PathBuf {
        self.root
            .join(PARTIALS_DIR)
            .join(format!("{}.{PARTIAL_EXTENSION}", url_key(url)))
    }

    /// Location of the record file for `url`.
    #[must_use]
    pub fn record_path(&self, url: &str) -> PathBuf {
        self.root
            .join(PROGRESS_DIR)
            .join(format!("{}.json", url_key(url)))
    }

    /// Loads the record for `url`.
    ///
    /// Never fails: a missing record, an unreadable file or corrupt JSON all
    /// yield the zeroed [`ProgressRecord::default`].
    pub async fn load(&self, url: &str) -> ProgressRecord {
        let path = self.record_path(url);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ProgressRecord::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read progress record");
                return ProgressRecord::default();
            }
        };

        match serde_json::from_slice::<ProgressRecord>(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt progress record");
                ProgressRecord::default()
            }
        }
    }

    /// Overwrites the record for `url` atomically.
    ///
    /// The record is written to a sibling temp file and renamed into place,
    /// so a crash mid-save leaves either the old or the new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding, writing or renaming fails.
    pub async fn save(&self, url: &str, record: &ProgressRecord) -> Result<(), StoreError> {
        let path = self.record_path(url);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::write(parent, e))?;
        }

        let payload = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload)
            .await
            .map_err(|e| StoreError::write(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::write(&path, e))?;

        debug!(
            path = %path.display(),
            bytes = record.bytes_written,
            total = record.total_expected,
            "progress record saved"
        );
        Ok(())
    }

    /// Deletes the record for `url`. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Remove`] for failures other than a missing file.
    pub async fn remove(&self, url: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.record_path(url)).await
    }

    /// Deletes both the record and the partial file for `url`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Remove`] for failures other than a missing file.
    pub async fn purge(&self, url: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.partial_path(url)).await?;
        self.remove(url).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::remove(path, e)),
    }
}
