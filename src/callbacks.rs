//! Intervention/Notification callback types and the registration surface
//! exposed to the UI thread (spec.md §6). The core never holds a UI
//! reference directly; callers install these closures on the worker before
//! `start()`, the same shape the original's `Intervention()`/`Notification()`
//! singletons collapse to once the process boundary is explicit.

use std::fmt;

use crate::model::SyncPath;

/// A snapshot of one side's state at the moment a conflict was detected,
/// carried in an `InterventionRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideState {
    pub revision: Option<String>,
    pub modified_unix: Option<i64>,
}

/// What the queue recommends doing about a conflict, offered as a default
/// to the UI — the final choice is still the user's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

/// Carried to the registered intervention callback when an intent cannot be
/// applied because the opposite side's state has diverged (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionRequest {
    pub path: SyncPath,
    pub local_state: SideState,
    pub remote_state: SideState,
    pub recommended_action: RecommendedAction,
}

/// The user's (or an automated policy's) answer to an `InterventionRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionResolution {
    KeepLocal,
    KeepRemote,
    /// Rename one side so both survive under distinct names.
    KeepBoth,
    Skip,
}

/// The outcome of a committed or dropped intent, surfaced for UI display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Committed,
    PermanentError(String),
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub path: SyncPath,
    pub dest_path: Option<SyncPath>,
    pub kind: NotificationKind,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NotificationKind::Committed => write!(f, "synced {}", self.path),
            NotificationKind::PermanentError(msg) => write!(f, "failed {}: {}", self.path, msg),
            NotificationKind::Conflict => write!(f, "conflict at {}", self.path),
        }
    }
}

/// Invoked synchronously from the queue's drain loop; blocks the queue
/// until it returns a resolution, mirroring the original's synchronous
/// `Intervention` prompt future.
pub type InterventionCallback = Box<dyn Fn(&InterventionRequest) -> InterventionResolution + Send>;

/// Invoked after every committed or dropped intent; no return value.
pub type NotificationCallback = Box<dyn Fn(&Notification) + Send>;
