//! Resumable Downloader Core Library
//!
//! A resumable single-file HTTP download engine: one connection per task,
//! pause/resume across process restarts, throughput sampling, and graceful
//! fallback when a server ignores Range requests.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Directories, timeouts and sampling intervals
//! - [`download`] - HTTP exchange, partial file writer, failure classification
//! - [`store`] - Durable per-URL progress records
//! - [`manager`] - The `start`/`pause`/`resume`/`cancel` state machine and observer events
//!
//! The library never installs a tracing subscriber; hosts choose their own.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod manager;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, DownloaderConfig, default_state_dir};
pub use download::{DownloadError, FailureType, HttpClient, PartialFileWriter, TransferSession};
pub use manager::{
    ChannelObserver, DownloadEvent, DownloadManager, DownloadObserver, FailureKind, FailureReason,
    ManagerError, NoopObserver, StartOutcome, TaskSnapshot, TaskState,
};
pub use store::{ProgressRecord, ProgressStore, StoreError};
