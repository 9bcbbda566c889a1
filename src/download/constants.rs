//! Constants for the download module (timeouts, sampling, checkpoints).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for a single body read (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Minimum spacing between two throughput events for one task.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// A transfer that delivers no bytes for this long is treated as truncated.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// How often progress is checkpointed to the store while downloading.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Extension appended to partial files under the state directory.
pub const PARTIAL_EXTENSION: &str = "part";
