//! Engine configuration: directories, timeouts and sampling intervals.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_STALL_TIMEOUT, READ_TIMEOUT_SECS,
};
use crate::download::default_user_agent;

const APP_DIR_NAME: &str = "resumable-downloader";

/// Errors for invalid or unresolvable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value lies outside its accepted range.
    #[error("Invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Field name as written in [`DownloaderConfig`]
        field: &'static str,
        /// The rejected value, rendered for display
        value: String,
        /// The accepted range
        expected: &'static str,
    },

    /// A required path is empty.
    #[error("Invalid config value for `{field}`: path must not be empty")]
    EmptyPath {
        /// Field name as written in [`DownloaderConfig`]
        field: &'static str,
    },

    /// The User-Agent is empty or not a valid header value.
    #[error("Invalid config value for `user_agent`: {0:?}")]
    InvalidUserAgent(String),

    /// No state directory could be derived from the environment.
    #[error("unable to determine state directory (set XDG_STATE_HOME or HOME)")]
    StateDirUnavailable,
}

/// Settings shared by every task of one [`DownloadManager`](crate::DownloadManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// Root for progress records and partial files.
    pub state_dir: PathBuf,
    /// Directory finished files land in when no explicit destination is given.
    pub download_dir: PathBuf,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout on the response body.
    pub read_timeout: Duration,
    /// Minimum spacing between throughput samples.
    pub progress_interval: Duration,
    /// No-progress duration after which a transfer counts as truncated.
    pub stall_timeout: Duration,
    /// How often progress is persisted while downloading; `None` disables.
    pub checkpoint_interval: Option<Duration>,
    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl DownloaderConfig {
    /// Creates a config with default timeouts for the given directories.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            download_dir: download_dir.into(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            checkpoint_interval: Some(DEFAULT_CHECKPOINT_INTERVAL),
            user_agent: default_user_agent(),
        }
    }

    /// Sets connect and read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Sets the minimum interval between throughput samples.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the stall timeout.
    #[must_use]
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Sets or disables periodic checkpoints.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: Option<Duration>) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Overrides the User-Agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath { field: "state_dir" });
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath {
                field: "download_dir",
            });
        }

        validate_secs("connect_timeout", self.connect_timeout)?;
        validate_secs("read_timeout", self.read_timeout)?;
        validate_secs("stall_timeout", self.stall_timeout)?;

        if self.progress_interval > Duration::from_secs(60) {
            return Err(ConfigError::OutOfRange {
                field: "progress_interval",
                value: format!("{}ms", self.progress_interval.as_millis()),
                expected: "0ms..=60s",
            });
        }

        if let Some(interval) = self.checkpoint_interval
            && !(Duration::from_millis(100)..=Duration::from_secs(3_600)).contains(&interval)
        {
            return Err(ConfigError::OutOfRange {
                field: "checkpoint_interval",
                value: format!("{}ms", interval.as_millis()),
                expected: "100ms..=3600s",
            });
        }

        if self.user_agent.trim().is_empty()
            || reqwest::header::HeaderValue::from_str(&self.user_agent).is_err()
        {
            return Err(ConfigError::InvalidUserAgent(self.user_agent.clone()));
        }

        Ok(())
    }
}

fn validate_secs(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if !(Duration::from_secs(1)..=Duration::from_secs(3_600)).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value: format!("{}s", value.as_secs_f64()),
            expected: "1s..=3600s",
        });
    }
    Ok(())
}

/// Platform state directory for progress records and partial files.
///
/// Resolution order: `$XDG_STATE_HOME/resumable-downloader`,
/// `$HOME/.local/state/resumable-downloader`,
/// `%LOCALAPPDATA%/resumable-downloader`. Blank variables are ignored.
///
/// # Errors
///
/// Returns [`ConfigError::StateDirUnavailable`] when none is set.
pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
    resolve_state_dir(
        sanitize_env_path(env::var_os("XDG_STATE_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("LOCALAPPDATA")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }

    Some(PathBuf::from(value))
}

fn resolve_state_dir(
    xdg_state_home: Option<PathBuf>,
    home: Option<PathBuf>,
    local_app_data: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = xdg_state_home {
        return Ok(xdg.join(APP_DIR_NAME));
    }
    if let Some(home) = home {
        return Ok(home.join(".local").join("state").join(APP_DIR_NAME));
    }
    if let Some(local_app_data) = local_app_data {
        return Ok(local_app_data.join(APP_DIR_NAME));
    }

    Err(ConfigError::StateDirUnavailable)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> DownloaderConfig {
        DownloaderConfig::new("/tmp/state", "/tmp/downloads")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        config.validate().unwrap();
        assert_eq!(config.progress_interval, Duration::from_millis(250));
        assert_eq!(config.checkpoint_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_validate_rejects_zero_connect_timeout() {
        let config = config().with_timeouts(Duration::ZERO, Duration::from_secs(10));
        let error = config.validate().unwrap_err();
        assert!(
            matches!(
                error,
                ConfigError::OutOfRange {
                    field: "connect_timeout",
                    ..
                }
            ),
            "got: {error}"
        );
    }

    #[test]
    fn test_validate_rejects_tiny_checkpoint_interval() {
        let config = config().with_checkpoint_interval(Some(Duration::from_millis(5)));
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("checkpoint_interval"), "got: {error}");
    }

    #[test]
    fn test_validate_accepts_disabled_checkpoints() {
        config().with_checkpoint_interval(None).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_paths_and_user_agent() {
        let error = DownloaderConfig::new("", "/tmp").validate().unwrap_err();
        assert!(matches!(error, ConfigError::EmptyPath { field: "state_dir" }));

        let error = config().with_user_agent("  ").validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidUserAgent(_)));

        let error = config().with_user_agent("bad\nagent").validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidUserAgent(_)));
    }

    #[test]
    fn test_sanitize_env_path_rejects_blank_values() {
        assert!(sanitize_env_path(Some(OsString::from(""))).is_none());
        assert!(sanitize_env_path(Some(OsString::from("   "))).is_none());
    }

    #[test]
    fn test_resolve_state_dir_prefers_xdg_over_home() {
        let resolved = resolve_state_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
            Some(PathBuf::from("/tmp/local")),
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/resumable-downloader"));
    }

    #[test]
    fn test_resolve_state_dir_falls_back_to_home() {
        let resolved =
            resolve_state_dir(None, Some(PathBuf::from("/tmp/home")), None).unwrap();
        assert_eq!(
            resolved,
            PathBuf::from("/tmp/home/.local/state/resumable-downloader")
        );
    }

    #[test]
    fn test_resolve_state_dir_falls_back_to_local_app_data() {
        let resolved = resolve_state_dir(None, None, Some(PathBuf::from("/tmp/local"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/local/resumable-downloader"));
    }

    #[test]
    fn test_resolve_state_dir_errors_when_all_sources_missing() {
        let result = resolve_state_dir(None, None, None);
        assert!(matches!(result, Err(ConfigError::StateDirUnavailable)));
    }
}
