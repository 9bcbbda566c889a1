//! One activation of a task: open writer and session, stream, then settle
//! the task state under the slot lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::{
    DownloadError, HttpClient, PartialFileWriter, ResumeMode, StreamOutcome, StreamSettings,
    TransferSession,
};
use crate::store::{ProgressRecord, ProgressStore};

use super::events::{DownloadEvent, EventDispatcher};
use super::task::{FailureReason, ProgressCounters, StopRequest, TaskSlot, TaskState};

/// Where the next request starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResumePoint {
    pub(crate) offset: u64,
    pub(crate) total_expected: u64,
    pub(crate) validator: Option<String>,
}

/// Derives the resume point from the partial file and the stored record.
///
/// The file length wins over the record. A file longer than a known total
/// cannot be a prefix of the resource and restarts the download.
pub(crate) async fn reconcile(
    store: &ProgressStore,
    url: &str,
    partial_path: &Path,
) -> ResumePoint {
    let record = store.load(url).await;
    let file_len = tokio::fs::metadata(partial_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    if record.total_expected > 0 && file_len > record.total_expected {
        warn!(
            url,
            file_len,
            total = record.total_expected,
            "partial file longer than resource, restarting"
        );
        return ResumePoint {
            offset: 0,
            total_expected: 0,
            validator: None,
        };
    }

    if !record.is_empty() && record.bytes_written != file_len {
        info!(
            url,
            recorded = record.bytes_written,
            file_len,
            "reconciling progress to partial file length"
        );
    }

    ResumePoint {
        offset: file_len,
        total_expected: record.total_expected,
        validator: if file_len > 0 { record.validator } else { None },
    }
}

enum Finish {
    Completed,
    Stopped,
    Failed(DownloadError),
}

/// Everything one spawned activation needs.
pub(crate) struct Activation {
    pub(crate) url: String,
    pub(crate) destination: PathBuf,
    pub(crate) partial_path: PathBuf,
    pub(crate) resume: ResumePoint,
    pub(crate) client: HttpClient,
    pub(crate) store: ProgressStore,
    pub(crate) settings: StreamSettings,
    pub(crate) checkpoint_interval: Option<Duration>,
    pub(crate) counters: Arc<ProgressCounters>,
    pub(crate) events: EventDispatcher,
    pub(crate) cancel: CancellationToken,
    pub(crate) settled: watch::Sender<bool>,
    pub(crate) slot: Arc<Mutex<TaskSlot>>,
}

impl Activation {
    pub(crate) async fn run(self) {
        let mut writer = None;
        let mut validator = self.resume.validator.clone();
        let finish = self.transfer(&mut writer, &mut validator).await;
        self.settle(writer, validator, finish).await;
    }

    async fn transfer(
        &self,
        writer_slot: &mut Option<PartialFileWriter>,
        validator: &mut Option<String>,
    ) -> Finish {
        let writer = match PartialFileWriter::open(&self.partial_path, self.resume.offset).await {
            Ok(writer) => writer_slot.insert(writer),
            Err(e) => return Finish::Failed(e),
        };
        let offset = writer.len();
        self.counters.set_bytes_written(offset);

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = TransferSession::open(
                &self.client,
                &self.url,
                offset,
                validator.as_deref(),
            ) => Some(result),
        };
        let session = match opened {
            None => return Finish::Stopped,
            Some(Err(e)) => return Finish::Failed(e),
            Some(Ok(session)) => session,
        };

        let fresh_validator = session.validator().map(str::to_string);
        *validator = match session.mode() {
            ResumeMode::Resumed | ResumeMode::AlreadyComplete => {
                fresh_validator.or(validator.take())
            }
            ResumeMode::Fresh | ResumeMode::Restarted => fresh_validator,
        };
        if session.mode() == ResumeMode::Restarted {
            self.counters.set_bytes_written(0);
        }
        let total = session.total_expected();
        self.counters.set_total_expected(total);

        let checkpoints = self.spawn_checkpoints(total, validator.clone());

        let counters = Arc::clone(&self.counters);
        let events = &self.events;
        let url = self.url.as_str();
        let result = session
            .stream_into(writer, self.settings, &self.cancel, |progress| {
                counters.set_bytes_written(progress.bytes_written);
                if let Some(rate) = progress.bytes_per_second {
                    counters.set_bytes_per_second(rate);
                    events.emit(
                        url,
                        DownloadEvent::Progress {
                            bytes_written: progress.bytes_written,
                            total_expected: progress.total_expected,
                            bytes_per_second: rate,
                        },
                    );
                }
            })
            .await;

        if let Some((stop, handle)) = checkpoints {
            stop.cancel();
            if let Err(e) = handle.await {
                debug!(error = %e, "checkpoint task ended abnormally");
            }
        }

        match result {
            Ok(StreamOutcome::Finished { .. }) => Finish::Completed,
            Ok(StreamOutcome::Cancelled { .. }) => Finish::Stopped,
            Err(e) => Finish::Failed(e),
        }
    }

    fn spawn_checkpoints(
        &self,
        total: u64,
        validator: Option<String>,
    ) -> Option<(CancellationToken, JoinHandle<()>)> {
        let interval = self.checkpoint_interval?;
        let stop = self.cancel.child_token();
        let store = self.store.clone();
        let url = self.url.clone();
        let counters = Arc::clone(&self.counters);
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stopped.cancelled() => break,
                    _ = ticker.tick() => {
                        let record = ProgressRecord::new(counters.bytes_written(), total)
                            .with_validator(validator.clone());
                        if let Err(e) = store.save(&url, &record).await {
                            warn!(url = %url, error = %e, "checkpoint save failed");
                        }
                    }
                }
            }
        });
        Some((stop, handle))
    }

    /// Applies the outcome to the task. Runs under the slot lock so callers
    /// that stopped the activation observe the final state once `settled`
    /// fires.
    async fn settle(
        self,
        writer: Option<PartialFileWriter>,
        validator: Option<String>,
        finish: Finish,
    ) {
        let slot_lock = Arc::clone(&self.slot);
        let mut slot = slot_lock.lock().await;
        slot.active = None;

        match finish {
            Finish::Completed => {
                let finalized = match writer {
                    Some(writer) => writer.finalize(&self.destination).await,
                    None => Err(DownloadError::io(
                        &self.partial_path,
                        std::io::Error::other("partial file was never opened"),
                    )),
                };
                match finalized {
                    Ok(bytes) => self.complete(&mut slot, bytes).await,
                    Err(e) => self.fail(&mut slot, None, validator, &e).await,
                }
            }
            Finish::Stopped => {
                let bytes = match writer {
                    Some(writer) => writer.abort().await,
                    None => self.counters.bytes_written(),
                };
                self.counters.set_bytes_written(bytes);
                let stop = slot.stop;
                match stop {
                    Some(StopRequest::Cancel) => self.cancelled(&mut slot).await,
                    Some(StopRequest::Pause) | None => {
                        self.paused(&mut slot, bytes, validator).await;
                    }
                }
            }
            Finish::Failed(e) => self.fail(&mut slot, writer, validator, &e).await,
        }
        self.settled.send_replace(true);
    }

    async fn complete(&self, slot: &mut TaskSlot, bytes: u64) {
        if let Err(e) = self.store.remove(&self.url).await {
            warn!(url = %self.url, error = %e, "failed to remove progress record");
        }
        self.counters.set_bytes_written(bytes);
        let total = match self.counters.total_expected() {
            0 => bytes,
            known => known,
        };
        self.counters.set_total_expected(total);
        slot.state = TaskState::Completed;
        info!(url = %self.url, bytes, path = %self.destination.display(), "download completed");

        self.events.emit(
            &self.url,
            DownloadEvent::Progress {
                bytes_written: bytes,
                total_expected: total,
                bytes_per_second: self.counters.bytes_per_second(),
            },
        );
        self.events.emit(
            &self.url,
            DownloadEvent::Completed {
                path: self.destination.clone(),
                bytes_written: bytes,
            },
        );
    }

    async fn paused(&self, slot: &mut TaskSlot, bytes: u64, validator: Option<String>) {
        let record =
            ProgressRecord::new(bytes, self.counters.total_expected()).with_validator(validator);
        if let Err(e) = self.store.save(&self.url, &record).await {
            warn!(url = %self.url, error = %e, "failed to persist progress on pause");
        }
        slot.state = TaskState::Paused;
        info!(url = %self.url, bytes, "download paused");
        self.events
            .emit(&self.url, DownloadEvent::Paused { bytes_written: bytes });
    }

    async fn cancelled(&self, slot: &mut TaskSlot) {
        if let Err(e) = self.store.purge(&self.url).await {
            warn!(url = %self.url, error = %e, "failed to remove artifacts on cancel");
        }
        self.counters.reset(0, 0);
        slot.state = TaskState::Cancelled;
        info!(url = %self.url, "download cancelled");
    }

    async fn fail(
        &self,
        slot: &mut TaskSlot,
        writer: Option<PartialFileWriter>,
        validator: Option<String>,
        error: &DownloadError,
    ) {
        let bytes = match writer {
            Some(writer) => writer.abort().await,
            None => tokio::fs::metadata(&self.partial_path)
                .await
                .map_or(0, |m| m.len()),
        };
        self.counters.set_bytes_written(bytes);

        let reason = FailureReason::from(error);
        if reason.failure_type.keeps_progress() {
            let record = ProgressRecord::new(bytes, self.counters.total_expected())
                .with_validator(validator);
            if let Err(e) = self.store.save(&self.url, &record).await {
                warn!(url = %self.url, error = %e, "failed to persist progress after failure");
            }
        } else {
            if let Err(e) = self.store.purge(&self.url).await {
                warn!(url = %self.url, error = %e, "failed to remove artifacts after failure");
            }
            self.counters.reset(0, 0);
        }

        warn!(
            url = %self.url,
            bytes,
            failure_type = ?reason.failure_type,
            error = %error,
            "download failed"
        );
        slot.state = TaskState::Failed(reason.clone());
        self.events.emit(&self.url, DownloadEvent::Failed { reason });
    }
}
