//! Observer interface and asynchronous event dispatch.
//!
//! Activations never call observers directly. Events go through an unbounded
//! channel to one dispatcher task per manager, which calls the observer in
//! emission order. A slow observer delays later events but never a writer,
//! and a panicking observer loses only the event it panicked on.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::task::FailureReason;

/// Events reported for one task.
///
/// For each activation, `Progress` events carry non-decreasing
/// `bytes_written`, and `Paused`, `Completed` or `Failed` is the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Throughput sample, emitted at most once per progress interval.
    Progress {
        /// Bytes committed to the partial file.
        bytes_written: u64,
        /// Total size, `0` while unknown.
        total_expected: u64,
        /// Bytes per second since the previous sample.
        bytes_per_second: u64,
    },
    /// The activation was stopped by `pause` (or `shutdown`).
    Paused {
        /// Bytes retained on disk.
        bytes_written: u64,
    },
    /// The finished file is at `path`.
    Completed {
        /// Final location of the file.
        path: PathBuf,
        /// Final size.
        bytes_written: u64,
    },
    /// The activation failed.
    Failed {
        /// What went wrong.
        reason: FailureReason,
    },
}

impl DownloadEvent {
    /// Whether this event ends an activation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Receiver of download events (UI, automation, tests).
///
/// Called from the manager's dispatcher task, one event at a time.
pub trait DownloadObserver: Send + Sync {
    /// Handles one event for the task identified by its normalized `url`.
    fn on_event(&self, url: &str, event: DownloadEvent);
}

/// Observer that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl NoopObserver {
    /// Create a new no-op observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DownloadObserver for NoopObserver {
    fn on_event(&self, _url: &str, _event: DownloadEvent) {}
}

/// Observer that forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<(String, DownloadEvent)>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, DownloadEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DownloadObserver for ChannelObserver {
    fn on_event(&self, url: &str, event: DownloadEvent) {
        if self.tx.send((url.to_string(), event)).is_err() {
            debug!(url, "event receiver dropped");
        }
    }
}

/// Sending half used by activations; the receiving loop owns the observer.
#[derive(Debug, Clone)]
pub(crate) struct EventDispatcher {
    tx: mpsc::UnboundedSender<(String, DownloadEvent)>,
}

impl EventDispatcher {
    /// Spawns the dispatch loop. Must be called inside a Tokio runtime.
    pub(crate) fn spawn(observer: Arc<dyn DownloadObserver>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, DownloadEvent)>();
        tokio::spawn(async move {
            while let Some((url, event)) = rx.recv().await {
                let delivered =
                    panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&url, event)));
                if delivered.is_err() {
                    warn!(url = %url, "download observer panicked, event dropped");
                }
            }
            debug!("event dispatcher stopped");
        });
        Self { tx }
    }

    pub(crate) fn emit(&self, url: &str, event: DownloadEvent) {
        if self.tx.send((url.to_string(), event)).is_err() {
            warn!(url, "event dispatcher closed, dropping event");
        }
    }
}
