//! Crate-wide error taxonomy, one group per component, following the
//! teacher's `ConfigError` shape: named variants, `#[error("...")]`
//! messages, `#[from]` conversions at the boundary a caller actually
//! needs to match on.

use thiserror::Error;

use crate::model::SyncPath;

/// Raised when a `RawEvent` violates a consolidator precondition.
/// The consolidator itself never fails; these are rejected at ingress.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsolidatorError {
    #[error("Moved event source {src} and destination {dest} disagree on is_directory")]
    MovedKindMismatch { src: SyncPath, dest: SyncPath },

    #[error("dest_path set on non-Moved event for {0}")]
    UnexpectedDestPath(SyncPath),

    #[error("Moved event for {0} is missing a dest_path")]
    MissingDestPath(SyncPath),
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to start filesystem watch on {path}: {source}")]
    Start {
        path: std::path::PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    Consolidator(#[from] ConsolidatorError),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transient transport error: {0}")]
    Transient(String),

    #[error("authentication failed")]
    AuthFailure,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("operation not supported by remote: {0}")]
    Unsupported(String),

    #[error("remote node not found: {0}")]
    NotFound(SyncPath),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// True for errors whose retry policy is "back off and try again",
    /// per spec.md §7's transient/permanent split.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local filesystem error at {path}: {source}")]
    Local {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("intent execution panicked")]
    Panicked,
}

impl QueueError {
    /// True for errors worth retrying with backoff rather than dropping
    /// the intent outright (spec.md §7 transient tier).
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Remote(e) => e.is_transient(),
            QueueError::Local { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            QueueError::Snapshot(_) | QueueError::Panicked => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot journal at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write snapshot journal at {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot journal at {0} is corrupt: {1}")]
    Corrupt(std::path::PathBuf, String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file found. Create one at ~/.config/syncore/config.toml or pass --config PATH.")]
    NoConfigFound,

    #[error("Config file not found: {0}")]
    FileNotFound(std::path::PathBuf),

    #[error("{0}")]
    Validation(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The worker's own fatal tier: scheduler failure or unrecoverable snapshot
/// corruption. The worker logs and terminates rather than restarting past
/// this tier, matching spec.md §7.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("watcher failed to start: {0}")]
    Watcher(#[from] WatcherError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("restart budget exhausted for task {task}: {failures} failures in the last {window:?}")]
    Fatal {
        task: &'static str,
        failures: u32,
        window: std::time::Duration,
    },
}
