//! Download manager: the public state machine over per-URL tasks.
//!
//! Each URL owns one [`TaskSlot`](task::TaskSlot) behind its own mutex. An
//! activation (a spawned tokio task) owns the partial file and the connection
//! while the task is `Downloading` and settles the final state under that
//! mutex. `pause`/`cancel` flag the stop reason, cancel the activation's
//! token and wait for its settle signal, so they only return once the file
//! handle is closed. Concurrent stop requests all wait on the same signal and
//! a pending cancel is never downgraded to a pause.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resumable_core::{DownloadManager, DownloaderConfig, NoopObserver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloaderConfig::new("/var/lib/dl", "/srv/downloads");
//! let manager = DownloadManager::new(config, Arc::new(NoopObserver::new()))?;
//! manager.start("https://example.com/image.iso").await?;
//! manager.pause("https://example.com/image.iso").await?;
//! manager.resume("https://example.com/image.iso").await?;
//! # Ok(())
//! # }
//! ```

mod activation;
mod error;
mod events;
mod task;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;

use crate::config::DownloaderConfig;
use crate::download::{HttpClient, StreamSettings, destination_filename};
use crate::store::{ProgressStore, normalize_url, url_key};

use activation::{Activation, reconcile};
use task::{ActiveTransfer, StopRequest, TaskSlot};

pub use error::ManagerError;
pub use events::{ChannelObserver, DownloadEvent, DownloadObserver, NoopObserver};
pub use task::{FailureKind, FailureReason, StartOutcome, TaskSnapshot, TaskState};

/// Length of the digest prefix used in fallback file names.
const FALLBACK_TAG_LEN: usize = 12;

/// Orchestrates downloads keyed by normalized URL.
///
/// Cloning is cheap; clones share tasks, store and observer.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: DownloaderConfig,
    client: HttpClient,
    store: ProgressStore,
    events: events::EventDispatcher,
    tasks: Mutex<HashMap<String, Arc<Mutex<TaskSlot>>>>,
}

impl DownloadManager {
    /// Creates a manager. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] if the configuration is invalid, or
    /// [`ManagerError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(
        config: DownloaderConfig,
        observer: Arc<dyn DownloadObserver>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let client = HttpClient::with_settings(
            config.connect_timeout,
            config.read_timeout,
            &config.user_agent,
        )
        .map_err(ManagerError::HttpClient)?;
        let store = ProgressStore::new(config.state_dir.clone());
        let events = events::EventDispatcher::spawn(observer);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                store,
                events,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    /// The progress store backing this manager.
    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.inner.store
    }

    /// Default destination for `url`: the download directory plus a file
    /// name derived from the last path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidUrl`] for non-HTTP(S) or unparsable URLs.
    pub fn destination_for(&self, url: &str) -> Result<PathBuf, ManagerError> {
        let parsed = parse_task_url(url)?;
        let key = url_key(url);
        let tag = &key[..FALLBACK_TAG_LEN];
        Ok(self
            .inner
            .config
            .download_dir
            .join(destination_filename(&parsed, tag)))
    }

    /// Starts (or resumes) the download of `url` into the default destination.
    ///
    /// See [`DownloadManager::start_to`].
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidUrl`] for non-HTTP(S) or unparsable URLs.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self, url: &str) -> Result<StartOutcome, ManagerError> {
        let destination = self.destination_for(url)?;
        self.start_to(url, destination).await
    }

    /// Starts the download of `url` into `destination`.
    ///
    /// - no task, `Idle`, `Failed`: activates, resuming from persisted progress
    /// - `Paused`: same as [`DownloadManager::resume`]
    /// - `Completed`, `Cancelled`: begins a fresh task instance
    /// - `Downloading`: returns [`StartOutcome::AlreadyRunning`]
    ///
    /// Transfer failures are reported through the observer and
    /// [`TaskState::Failed`], not as errors from this call.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidUrl`] for non-HTTP(S) or unparsable URLs.
    #[instrument(level = "debug", skip(self, destination))]
    pub async fn start_to(
        &self,
        url: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<StartOutcome, ManagerError> {
        parse_task_url(url)?;
        let destination = destination.into();
        let key = normalize_url(url);
        let slot = self.slot_or_insert(&key, &destination).await;

        let mut guard = slot.lock().await;
        let state = guard.state.clone();
        match state {
            TaskState::Downloading => {
                debug!(url = %key, "already downloading");
                return Ok(StartOutcome::AlreadyRunning);
            }
            TaskState::Completed | TaskState::Cancelled => guard.renew(destination),
            TaskState::Idle | TaskState::Paused | TaskState::Failed(_) => {
                guard.destination = destination;
            }
        }

        let resume_offset = self.activate(&mut guard, &slot).await;
        Ok(StartOutcome::Started { resume_offset })
    }

    /// Stops a downloading task and keeps its progress.
    ///
    /// Returns after the activation has closed the partial file and persisted
    /// the record. The returned state is normally [`TaskState::Paused`]; it
    /// is `Completed` or `Failed` when the transfer ended on its own first,
    /// and `Cancelled` when a concurrent cancel won.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidTransition`] unless the task is
    /// `Downloading`.
    #[instrument(level = "debug", skip(self))]
    pub async fn pause(&self, url: &str) -> Result<TaskState, ManagerError> {
        let key = normalize_url(url);
        let Some(slot) = self.existing_slot(&key).await else {
            return Err(ManagerError::invalid_transition(key, "pause", "untracked"));
        };
        stop_activation(&slot, StopRequest::Pause, "pause").await
    }

    /// Re-activates a paused task at its persisted offset.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidTransition`] unless the task is `Paused`.
    #[instrument(level = "debug", skip(self))]
    pub async fn resume(&self, url: &str) -> Result<StartOutcome, ManagerError> {
        let key = normalize_url(url);
        let Some(slot) = self.existing_slot(&key).await else {
            return Err(ManagerError::invalid_transition(key, "resume", "untracked"));
        };

        let mut guard = slot.lock().await;
        if guard.state != TaskState::Paused {
            return Err(ManagerError::invalid_transition(
                key,
                "resume",
                guard.state.as_str(),
            ));
        }
        let resume_offset = self.activate(&mut guard, &slot).await;
        Ok(StartOutcome::Started { resume_offset })
    }

    /// Cancels the task for `url` and removes its partial file and record.
    ///
    /// Idempotent: unknown URLs and already cancelled tasks only get their
    /// (absent) artifacts removed again. A `Completed` task is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if an artifact exists but cannot be
    /// removed.
    #[instrument(level = "debug", skip(self))]
    pub async fn cancel(&self, url: &str) -> Result<(), ManagerError> {
        let key = normalize_url(url);
        let Some(slot) = self.existing_slot(&key).await else {
            self.inner.store.purge(&key).await?;
            return Ok(());
        };

        // A concurrent start may reactivate the task while we wait, so stop
        // again until it rests in a non-running state.
        loop {
            let mut guard = slot.lock().await;
            let state = guard.state.clone();
            let settled = match state {
                TaskState::Completed => return Ok(()),
                TaskState::Downloading => guard.request_stop(StopRequest::Cancel),
                TaskState::Idle
                | TaskState::Paused
                | TaskState::Failed(_)
                | TaskState::Cancelled => None,
            };
            if let Some(settled) = settled {
                drop(guard);
                wait_for_settle(&slot, settled).await;
                continue;
            }

            self.inner.store.purge(&key).await?;
            guard.counters.reset(0, 0);
            if guard.state != TaskState::Cancelled {
                guard.state = TaskState::Cancelled;
                info!(url = %key, "download cancelled");
            }
            return Ok(());
        }
    }

    /// Current state of the task for `url`, `None` if untracked.
    pub async fn state(&self, url: &str) -> Option<TaskState> {
        let slot = self.existing_slot(&normalize_url(url)).await?;
        let state = slot.lock().await.state.clone();
        Some(state)
    }

    /// Point-in-time view of the task for `url`, `None` if untracked.
    pub async fn snapshot(&self, url: &str) -> Option<TaskSnapshot> {
        let slot = self.existing_slot(&normalize_url(url)).await?;
        let snapshot = slot.lock().await.snapshot();
        Some(snapshot)
    }

    /// Snapshots of every tracked task.
    pub async fn snapshots(&self) -> Vec<TaskSnapshot> {
        let slots: Vec<_> = self.inner.tasks.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshots.push(slot.lock().await.snapshot());
        }
        snapshots
    }

    /// Pauses every downloading task, persisting its progress.
    ///
    /// Returns the number of tasks that ended up `Paused`.
    #[instrument(level = "debug", skip(self))]
    pub async fn shutdown(&self) -> usize {
        let slots: Vec<_> = self.inner.tasks.lock().await.values().cloned().collect();
        let mut paused = 0;
        for slot in slots {
            let stopped = stop_activation(&slot, StopRequest::Pause, "pause").await;
            if matches!(stopped, Ok(TaskState::Paused)) {
                paused += 1;
            }
        }
        info!(paused, "download manager shut down");
        paused
    }

    /// Stops tracking `Completed` and `Cancelled` tasks.
    ///
    /// The manager otherwise keeps one entry per URL it has ever handled.
    /// Tasks that are busy at the time of the call are kept. Returns the
    /// number of entries removed.
    pub async fn forget_finished(&self) -> usize {
        let mut tasks = self.inner.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => !matches!(guard.state, TaskState::Completed | TaskState::Cancelled),
            Err(_) => true,
        });
        let removed = before - tasks.len();
        debug!(removed, "forgot finished tasks");
        removed
    }

    async fn slot_or_insert(&self, key: &str, destination: &Path) -> Arc<Mutex<TaskSlot>> {
        let mut tasks = self.inner.tasks.lock().await;
        Arc::clone(tasks.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TaskSlot::new(
                key.to_string(),
                destination.to_path_buf(),
                self.inner.store.partial_path(key),
            )))
        }))
    }

    async fn existing_slot(&self, key: &str) -> Option<Arc<Mutex<TaskSlot>>> {
        self.inner.tasks.lock().await.get(key).cloned()
    }

    /// Spawns an activation for the locked slot and marks it `Downloading`.
    async fn activate(&self, guard: &mut TaskSlot, slot: &Arc<Mutex<TaskSlot>>) -> u64 {
        let resume = reconcile(&self.inner.store, &guard.url, &guard.partial_path).await;
        let resume_offset = resume.offset;

        guard.counters.reset(resume.offset, resume.total_expected);
        guard.stop = None;
        guard.state = TaskState::Downloading;

        let cancel = CancellationToken::new();
        let (settled_tx, settled_rx) = watch::channel(false);
        let activation = Activation {
            url: guard.url.clone(),
            destination: guard.destination.clone(),
            partial_path: guard.partial_path.clone(),
            resume,
            client: self.inner.client.clone(),
            store: self.inner.store.clone(),
            settings: StreamSettings {
                progress_interval: self.inner.config.progress_interval,
                stall_timeout: self.inner.config.stall_timeout,
            },
            checkpoint_interval: self.inner.config.checkpoint_interval,
            counters: Arc::clone(&guard.counters),
            events: self.inner.events.clone(),
            cancel: cancel.clone(),
            settled: settled_tx,
            slot: Arc::clone(slot),
        };

        guard.active = Some(ActiveTransfer {
            cancel,
            settled: settled_rx,
        });
        let span = info_span!("download", url = %guard.url);
        tokio::spawn(activation.run().instrument(span));

        info!(url = %guard.url, resume_offset, "download started");
        resume_offset
    }
}

/// Flags the stop reason, cancels the activation and waits for teardown.
///
/// Returns the state the task settled into.
async fn stop_activation(
    slot: &Arc<Mutex<TaskSlot>>,
    request: StopRequest,
    operation: &'static str,
) -> Result<TaskState, ManagerError> {
    let settled = {
        let mut guard = slot.lock().await;
        if guard.state != TaskState::Downloading {
            return Err(ManagerError::invalid_transition(
                guard.url.clone(),
                operation,
                guard.state.as_str(),
            ));
        }
        guard.request_stop(request)
    };

    if let Some(settled) = settled {
        wait_for_settle(slot, settled).await;
    }
    let state = slot.lock().await.state.clone();
    Ok(state)
}

/// Waits until the activation behind `settled` has applied its final state.
///
/// An activation that ends without settling (panic or abort) leaves the task
/// `Failed` rather than stuck in `Downloading`.
async fn wait_for_settle(slot: &Arc<Mutex<TaskSlot>>, mut settled: watch::Receiver<bool>) {
    if settled.wait_for(|done| *done).await.is_ok() {
        return;
    }
    warn!("download task ended without settling");
    let mut guard = slot.lock().await;
    let orphaned = guard
        .active
        .as_ref()
        .is_some_and(|active| active.settled.same_channel(&settled));
    if guard.state == TaskState::Downloading && orphaned {
        guard.active = None;
        guard.state = TaskState::Failed(FailureReason::interrupted());
    }
}

fn parse_task_url(url: &str) -> Result<Url, ManagerError> {
    let invalid = || ManagerError::InvalidUrl {
        url: url.to_string(),
    };
    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(parsed),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> DownloadManager {
        let config = DownloaderConfig::new(
            temp_dir.path().join("state"),
            temp_dir.path().join("downloads"),
        );
        DownloadManager::new(config, Arc::new(NoopObserver::new())).unwrap()
    }

    #[test]
    fn test_parse_task_url_accepts_http_only() {
        assert!(parse_task_url("https://example.com/a.bin").is_ok());
        assert!(parse_task_url("http://example.com/a.bin").is_ok());
        assert!(parse_task_url("ftp://example.com/a.bin").is_err());
        assert!(parse_task_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = DownloaderConfig::new(temp_dir.path(), temp_dir.path()).with_user_agent("");
        let result = DownloadManager::new(config, Arc::new(NoopObserver::new()));
        assert!(matches!(result, Err(ManagerError::Config(_))));
    }

    #[tokio::test]
    async fn test_destination_for_uses_last_segment_or_digest() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let downloads = temp_dir.path().join("downloads");

        assert_eq!(
            manager
                .destination_for("https://example.com/isos/disk.iso")
                .unwrap(),
            downloads.join("disk.iso")
        );

        let fallback = manager.destination_for("https://example.com/").unwrap();
        let name = fallback.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("download_") && name.ends_with(".bin"), "got: {name}");
        assert_eq!(name.len(), "download_".len() + FALLBACK_TAG_LEN + ".bin".len());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let result = manager.start("file:///etc/passwd").await;
        assert!(matches!(result, Err(ManagerError::InvalidUrl { .. })));
        assert!(manager.state("file:///etc/passwd").await.is_none());
    }

    #[tokio::test]
    async fn test_pause_and_resume_untracked_are_invalid_transitions() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let url = "https://example.com/a.bin";

        let pause = manager.pause(url).await;
        assert!(
            matches!(
                pause,
                Err(ManagerError::InvalidTransition {
                    operation: "pause",
                    state: "untracked",
                    ..
                })
            ),
            "got: {pause:?}"
        );
        let resume = manager.resume(url).await;
        assert!(matches!(resume, Err(ManagerError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancel_untracked_removes_leftover_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let url = "https://example.com/a.bin";

        let partial = manager.store().partial_path(url);
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, b"leftover").unwrap();
        manager
            .store()
            .save(url, &crate::store::ProgressRecord::new(8, 0))
            .await
            .unwrap();

        manager.cancel(url).await.unwrap();
        manager.cancel(url).await.unwrap();
        assert!(!partial.exists());
        assert!(!manager.store().record_path(url).exists());
    }
}
