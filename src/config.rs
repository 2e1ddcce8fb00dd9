//! Session configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable naming the record target directory.
pub const RECORD_ENV: &str = "FRAMELINK_RECORD";

/// Environment variable naming the replay source directory.
pub const REPLAY_ENV: &str = "FRAMELINK_REPLAY";

/// Configuration for one device session.
///
/// `record_path` and `replay_path` are mutually exclusive: setting both
/// disables both and the session reports a configuration conflict.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Directory to record stream traffic into, one file per record source.
    pub record_path: Option<PathBuf>,
    /// Directory to replay previously recorded traffic from (extension
    /// point; no playback behavior yet).
    pub replay_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Configuration with recording and replay off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from `FRAMELINK_RECORD` / `FRAMELINK_REPLAY`.
    /// Empty values count as unset.
    pub fn from_env() -> Self {
        Self {
            record_path: env::var(RECORD_ENV).ok().filter(|v| !v.is_empty()).map(PathBuf::from),
            replay_path: env::var(REPLAY_ENV).ok().filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }

    /// Set the record target directory.
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// Set the replay source directory.
    pub fn with_replay_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.replay_path = Some(path.into());
        self
    }
}
