//! Wire-level pieces of the engine: one HTTP exchange streamed into one
//! partial file.
//!
//! - [`HttpClient`] issues the (optionally Range-qualified) GET
//! - [`TransferSession`] interprets the response and streams the body
//! - [`PartialFileWriter`] owns the bytes on disk
//! - [`ThroughputMeter`] turns byte counts into rate samples
//! - [`classify_error`] decides whether a failure keeps its artifacts
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//! use resumable_core::download::{HttpClient, PartialFileWriter, StreamSettings, TransferSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let mut writer = PartialFileWriter::open(Path::new("/tmp/image.part"), 0).await?;
//! let session = TransferSession::open(&client, "https://example.com/image.iso", 0, None).await?;
//! let settings = StreamSettings {
//!     progress_interval: std::time::Duration::from_millis(250),
//!     stall_timeout: std::time::Duration::from_secs(60),
//! };
//! session
//!     .stream_into(&mut writer, settings, &CancellationToken::new(), |p| {
//!         println!("{} / {}", p.bytes_written, p.total_expected);
//!     })
//!     .await?;
//! writer.finalize(Path::new("./image.iso")).await?;
//! # Ok(())
//! # }
//! ```

mod classify;
mod client;
pub mod constants;
mod error;
mod filename;
mod session;
mod throughput;
mod writer;

pub use classify::{FailureType, classify_error};
pub use client::{HttpClient, default_user_agent};
pub use error::DownloadError;
pub(crate) use filename::destination_filename;
pub use session::{
    ResumeMode, StreamOutcome, StreamSettings, TransferProgress, TransferSession,
};
pub use throughput::ThroughputMeter;
pub use writer::PartialFileWriter;

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
