//! The local-path-to-Node resolver the watcher consults before handing an
//! intent to the queue (spec.md §4.2 "Contextualization").
//!
//! The resolver is supplied by the surrounding system (it is backed by
//! whatever persists the Snapshot for the running application) and is
//! assumed synchronous and side-effect free over a single poll cycle, per
//! spec.md §6.

use std::sync::{Arc, RwLock};

use crate::model::{Node, Snapshot, SyncPath};

/// `local_to_db(path, is_folder) -> Option<Node>` from spec.md §6.
pub trait Resolver: Send + Sync {
    fn local_to_db(&self, path: &SyncPath, is_folder: bool) -> Option<Node>;
}

/// A `Resolver` backed directly by a shared `Snapshot`, for callers that
/// keep the Snapshot itself as the source of truth (the default wiring in
/// `worker.rs`). Reads take a shared lock and never span I/O.
pub struct SnapshotResolver<'a> {
    snapshot: &'a RwLock<Snapshot>,
}

impl<'a> SnapshotResolver<'a> {
    pub fn new(snapshot: &'a RwLock<Snapshot>) -> Self {
        Self { snapshot }
    }
}

impl Resolver for SnapshotResolver<'_> {
    fn local_to_db(&self, path: &SyncPath, is_folder: bool) -> Option<Node> {
        let snapshot = self.snapshot.read().ok()?;
        let node = snapshot.get_by_path(path)?;
        if node.path.is_directory() != is_folder {
            return None;
        }
        Some(node.clone())
    }
}

/// An owned, `Arc`-backed equivalent of `SnapshotResolver`, for callers
/// (namely `worker::BackgroundWorker`) that need a `Resolver` crossing
/// thread boundaries as `Arc<dyn Resolver>`, which requires `'static` and
/// so can't be satisfied by the borrowed `SnapshotResolver<'a>`.
pub struct SharedSnapshotResolver {
    snapshot: Arc<RwLock<Snapshot>>,
}

impl SharedSnapshotResolver {
    pub fn new(snapshot: Arc<RwLock<Snapshot>>) -> Self {
        Self { snapshot }
    }
}

impl Resolver for SharedSnapshotResolver {
    fn local_to_db(&self, path: &SyncPath, is_folder: bool) -> Option<Node> {
        let snapshot = self.snapshot.read().ok()?;
        let node = snapshot.get_by_path(path)?;
        if node.path.is_directory() != is_folder {
            return None;
        }
        Some(node.clone())
    }
}
