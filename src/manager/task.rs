//! Task state, failure reasons and per-URL bookkeeping.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::download::{DownloadError, FailureType, classify_error};

/// Lifecycle state of one download task.
///
/// `Idle → Downloading → {Paused, Completed, Failed, Cancelled}`,
/// `Paused → Downloading` via resume, `Failed → Downloading` via start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created, no activation yet.
    Idle,
    /// An activation owns the connection and the partial file.
    Downloading,
    /// Stopped by the caller; partial file and record are on disk.
    Paused,
    /// The finished file is at its destination.
    Completed,
    /// The last activation failed.
    Failed(FailureReason),
    /// Stopped by the caller; all artifacts were removed.
    Cancelled,
}

impl TaskState {
    /// Returns the stable label used in errors and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this task instance is finished for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What went wrong, in matchable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection-level failure.
    Network,
    /// No response headers within the connect/read timeout.
    Timeout,
    /// Unexpected HTTP status.
    Protocol {
        /// The HTTP status code.
        status: u16,
    },
    /// Body ended or stalled early.
    Truncated {
        /// Bytes in the partial file.
        received: u64,
        /// Declared total.
        expected: u64,
    },
    /// A `206` started at the wrong byte.
    RangeMismatch {
        /// Requested offset.
        expected: u64,
        /// Offset the server sent.
        actual: u64,
    },
    /// Local disk operation failed.
    FileSystem,
    /// The URL was rejected by the HTTP client.
    InvalidUrl,
    /// The activation ended without reporting an outcome.
    Interrupted,
}

/// Reason attached to [`TaskState::Failed`] and failure events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Matchable kind.
    pub kind: FailureKind,
    /// Retry/retention classification.
    pub failure_type: FailureType,
    /// Human-readable message.
    pub message: String,
}

impl FailureReason {
    /// Whether calling `start` again could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.failure_type.is_retryable()
    }

    pub(crate) fn interrupted() -> Self {
        Self {
            kind: FailureKind::Interrupted,
            failure_type: FailureType::Transient,
            message: "download task ended unexpectedly".to_string(),
        }
    }
}

impl From<&DownloadError> for FailureReason {
    fn from(error: &DownloadError) -> Self {
        let kind = match error {
            DownloadError::Network { .. } => FailureKind::Network,
            DownloadError::Timeout { .. } => FailureKind::Timeout,
            DownloadError::Protocol { status, .. } => FailureKind::Protocol { status: *status },
            DownloadError::TruncatedTransfer {
                received, expected, ..
            } => FailureKind::Truncated {
                received: *received,
                expected: *expected,
            },
            DownloadError::RangeMismatch {
                expected, actual, ..
            } => FailureKind::RangeMismatch {
                expected: *expected,
                actual: *actual,
            },
            DownloadError::FileSystem { .. } => FailureKind::FileSystem,
            DownloadError::InvalidUrl { .. } => FailureKind::InvalidUrl,
        };
        Self {
            kind,
            failure_type: classify_error(error),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of `start`/`resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new activation was spawned at this offset.
    Started {
        /// Offset the Range request asks for (`0` for a fresh download).
        resume_offset: u64,
    },
    /// The task was already downloading; nothing changed.
    AlreadyRunning,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Normalized source URL.
    pub url: String,
    /// Current state.
    pub state: TaskState,
    /// Bytes committed to the partial file.
    pub bytes_written: u64,
    /// Total size, `0` while unknown.
    pub total_expected: u64,
    /// Most recent throughput sample.
    pub bytes_per_second: u64,
    /// Location of the in-progress file.
    pub partial_path: PathBuf,
    /// Where the finished file goes.
    pub destination: PathBuf,
}

/// Counters the activation updates per chunk and snapshots read.
#[derive(Debug, Default)]
pub(crate) struct ProgressCounters {
    bytes_written: AtomicU64,
    total_expected: AtomicU64,
    bytes_per_second: AtomicU64,
}

impl ProgressCounters {
    pub(crate) fn reset(&self, bytes_written: u64, total_expected: u64) {
        self.bytes_written.store(bytes_written, Ordering::Relaxed);
        self.total_expected.store(total_expected, Ordering::Relaxed);
        self.bytes_per_second.store(0, Ordering::Relaxed);
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub(crate) fn set_bytes_written(&self, bytes: u64) {
        self.bytes_written.store(bytes, Ordering::Relaxed);
    }

    pub(crate) fn total_expected(&self) -> u64 {
        self.total_expected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_total_expected(&self, total: u64) {
        self.total_expected.store(total, Ordering::Relaxed);
    }

    pub(crate) fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Relaxed)
    }

    pub(crate) fn set_bytes_per_second(&self, rate: u64) {
        self.bytes_per_second.store(rate, Ordering::Relaxed);
    }
}

/// Why the caller stopped an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRequest {
    Pause,
    Cancel,
}

impl StopRequest {
    /// Combines two requests for the same activation. `Cancel` wins.
    pub(crate) fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Pause, Self::Pause) => Self::Pause,
            _ => Self::Cancel,
        }
    }
}

/// Handle on a running activation.
///
/// `settled` flips to `true` once the activation has applied its final state.
/// The sender is dropped without sending if the activation dies first.
#[derive(Debug)]
pub(crate) struct ActiveTransfer {
    pub(crate) cancel: CancellationToken,
    pub(crate) settled: watch::Receiver<bool>,
}

/// Everything the manager tracks for one URL. Guarded by a per-URL mutex.
#[derive(Debug)]
pub(crate) struct TaskSlot {
    pub(crate) url: String,
    pub(crate) destination: PathBuf,
    pub(crate) partial_path: PathBuf,
    pub(crate) state: TaskState,
    pub(crate) counters: Arc<ProgressCounters>,
    pub(crate) stop: Option<StopRequest>,
    pub(crate) active: Option<ActiveTransfer>,
}

impl TaskSlot {
    pub(crate) fn new(url: String, destination: PathBuf, partial_path: PathBuf) -> Self {
        Self {
            url,
            destination,
            partial_path,
            state: TaskState::Idle,
            counters: Arc::new(ProgressCounters::default()),
            stop: None,
            active: None,
        }
    }

    /// Starts a new task instance in place of a terminal one.
    pub(crate) fn renew(&mut self, destination: PathBuf) {
        self.destination = destination;
        self.state = TaskState::Idle;
        self.counters.reset(0, 0);
        self.stop = None;
        self.active = None;
    }

    /// Records a stop request and signals the running activation.
    ///
    /// Returns a receiver that resolves once the activation has settled, or
    /// `None` when nothing is running.
    pub(crate) fn request_stop(&mut self, request: StopRequest) -> Option<watch::Receiver<bool>> {
        let active = self.active.as_ref()?;
        self.stop = Some(match self.stop {
            Some(pending) => pending.merge(request),
            None => request,
        });
        active.cancel.cancel();
        Some(active.settled.clone())
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            url: self.url.clone(),
            state: self.state.clone(),
            bytes_written: self.counters.bytes_written(),
            total_expected: self.counters.total_expected(),
            bytes_per_second: self.counters.bytes_per_second(),
            partial_path: self.partial_path.clone(),
            destination: self.destination.clone(),
        }
    }
}
