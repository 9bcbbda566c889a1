//! The persisted per-URL progress record.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Bookkeeping for one partially downloaded resource.
///
/// The partial file's length is the ground truth for how many bytes exist;
/// this record cross-checks it and carries what the file cannot (the total
/// size and the resume validator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Bytes committed to the partial file when the record was saved.
    pub bytes_written: u64,
    /// Total resource size, `0` when unknown.
    pub total_expected: u64,
    /// Unix time in milliseconds; `0` for the zeroed "no progress" record.
    pub saved_at: u64,
    /// Strong `ETag` or `Last-Modified` sent as `If-Range` on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl ProgressRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(bytes_written: u64, total_expected: u64) -> Self {
        Self {
            bytes_written,
            total_expected,
            saved_at: unix_millis_now(),
            validator: None,
        }
    }

    /// Attaches the resume validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Option<String>) -> Self {
        self.validator = validator;
        self
    }

    /// Whether this is the zeroed record returned when nothing was persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved_at == 0 && self.bytes_written == 0 && self.total_expected == 0
    }
}

fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
