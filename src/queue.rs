//! The operations queue. A single-consumer drain loop that applies
//! `IntentEnvelope`s against local FS or the remote API, folds successful
//! commits into the `Snapshot`, and routes divergence between the two
//! sides through the registered intervention callback. Retries use a
//! doubling-with-ceiling backoff; conflict handling follows a "decide an
//! outcome, tell the caller" pattern, with a `diffy`-backed merge attempt
//! for `keep-both`.

use std::fs;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::callbacks::{
    InterventionCallback, InterventionRequest, InterventionResolution, Notification,
    NotificationCallback, NotificationKind, RecommendedAction, SideState,
};
use crate::error::QueueError;
use crate::model::{IntentEnvelope, Node, NodeId, NodeKind, OperationIntentKind, Revision, Snapshot, SyncDirection, SyncPath};
use crate::poller::RemoteIndex;
use crate::remote::RemoteApi;
use crate::snapshot::SnapshotStore;

/// What happened after applying one intent: either it committed (and the
/// Snapshot now reflects it), or it was dropped without touching the
/// Snapshot (already satisfied, or the user chose `skip`/`keep-local` on
/// a conflict).
enum Outcome {
    Committed,
    Dropped,
}

pub struct OperationsQueue {
    sync_root: PathBuf,
    remote: Arc<dyn RemoteApi>,
    remote_index: RemoteIndex,
    snapshot: Arc<RwLock<Snapshot>>,
    store: SnapshotStore,
    retry_ceiling: Duration,
    intervention_cb: Option<InterventionCallback>,
    notification_cb: Option<NotificationCallback>,
}

impl OperationsQueue {
    pub fn new(
        sync_root: PathBuf,
        remote: Arc<dyn RemoteApi>,
        remote_index: RemoteIndex,
        snapshot: Arc<RwLock<Snapshot>>,
        store: SnapshotStore,
        retry_ceiling: Duration,
    ) -> Self {
        Self {
            sync_root,
            remote,
            remote_index,
            snapshot,
            store,
            retry_ceiling,
            intervention_cb: None,
            notification_cb: None,
        }
    }

    pub fn set_intervention_cb(&mut self, cb: InterventionCallback) {
        self.intervention_cb = Some(cb);
    }

    pub fn set_notification_cb(&mut self, cb: NotificationCallback) {
        self.notification_cb = Some(cb);
    }

    /// Drain `rx` until the sender side disconnects, blocking between
    /// intents with a short timeout so a supervised task can observe
    /// `stop` promptly. Returns normally
    /// on disconnect; the caller's supervisor treats that as a
    /// cancellation when it set `stop` first, a termination otherwise.
    pub fn drain(&mut self, rx: &Receiver<IntentEnvelope>, stop: &std::sync::atomic::AtomicBool) {
        use std::sync::atomic::Ordering;
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(intent) => self.process_one(intent),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Process exactly one intent to completion (including retries),
    /// isolating a panic inside intent execution so it surfaces as a
    /// `Notification` rather than unwinding through the drain loop and
    /// stalling the queue: an uncaught panic here must not silently halt
    /// the drain loop for every other queued intent.
    fn process_one(&mut self, intent: IntentEnvelope) {
        let result = catch_unwind(AssertUnwindSafe(|| self.apply_with_retry(&intent)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("intent {:?} on {} failed permanently: {}", intent.intent, intent.path, e);
            }
            Err(_) => {
                error!("intent {:?} on {} panicked during execution", intent.intent, intent.path);
                self.notify(Notification {
                    path: intent.path.clone(),
                    dest_path: intent.dest_path.clone(),
                    kind: NotificationKind::PermanentError("internal error".into()),
                });
            }
        }
    }

    fn apply_with_retry(&mut self, intent: &IntentEnvelope) -> Result<(), QueueError> {
        let mut backoff = Duration::from_millis(250);
        loop {
            match self.apply(intent) {
                Ok(Outcome::Committed) => {
                    self.notify(Notification {
                        path: intent.path.clone(),
                        dest_path: intent.dest_path.clone(),
                        kind: NotificationKind::Committed,
                    });
                    return Ok(());
                }
                Ok(Outcome::Dropped) => return Ok(()),
                Err(e) if e.is_transient() => {
                    if backoff >= self.retry_ceiling {
                        warn!("giving up on {} after exhausting retry ceiling: {}", intent.path, e);
                        self.notify(Notification {
                            path: intent.path.clone(),
                            dest_path: intent.dest_path.clone(),
                            kind: NotificationKind::PermanentError(e.to_string()),
                        });
                        return Err(e);
                    }
                    debug!("transient error on {}, retrying in {:?}: {}", intent.path, backoff, e);
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.retry_ceiling);
                }
                Err(e) => {
                    self.notify(Notification {
                        path: intent.path.clone(),
                        dest_path: intent.dest_path.clone(),
                        kind: NotificationKind::PermanentError(e.to_string()),
                    });
                    return Err(e);
                }
            }
        }
    }

    fn apply(&mut self, intent: &IntentEnvelope) -> Result<Outcome, QueueError> {
        match intent.direction {
            SyncDirection::LocalToRemote => self.apply_local_to_remote(intent),
            SyncDirection::RemoteToLocal => self.apply_remote_to_local(intent),
        }
    }

    fn apply_local_to_remote(&mut self, intent: &IntentEnvelope) -> Result<Outcome, QueueError> {
        use OperationIntentKind::*;
        let local_path = intent.path.to_local(&self.sync_root);

        match intent.intent {
            CreateFile | UpdateFile => {
                if intent.intent == UpdateFile {
                    if let Some(resolution) = self.check_remote_divergence(&intent.path)? {
                        return self.apply_conflict_resolution(intent, resolution, true);
                    }
                }
                let contents = read_local(&local_path)?;
                let node = self.remote.upload_file(&intent.path, &contents)?;
                self.commit_put(node)?;
                Ok(Outcome::Committed)
            }
            CreateFolder => {
                let node = self.remote.create_folder(&intent.path)?;
                self.commit_put(node)?;
                Ok(Outcome::Committed)
            }
            DeleteFile | DeleteFolder => {
                let node = {
                    let snap = self.snapshot.read().expect("snapshot lock poisoned");
                    snap.get_by_path(&intent.path).cloned()
                };
                match node {
                    Some(node) => {
                        self.remote.delete_node(&node)?;
                        self.commit_remove(node.id)?;
                        Ok(Outcome::Committed)
                    }
                    None => Ok(Outcome::Dropped),
                }
            }
            MoveFile | MoveFolder => {
                let node = {
                    let snap = self.snapshot.read().expect("snapshot lock poisoned");
                    snap.get_by_path(&intent.path).cloned()
                };
                let dest = intent.dest_path.clone().ok_or_else(|| {
                    QueueError::Local {
                        path: local_path.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "move intent missing dest_path"),
                    }
                })?;
                match node {
                    Some(node) => {
                        let moved = self.remote.move_node(&node, &dest)?;
                        self.commit_rename(moved.id, dest)?;
                        Ok(Outcome::Committed)
                    }
                    // Lost-half move: the source was never seen, so treat
                    // the destination as a fresh create;
                    // the next poll reconciles the rest if this guess is wrong.
                    None => {
                        let contents = read_local(&dest.to_local(&self.sync_root))?;
                        let node = self.remote.upload_file(&dest, &contents)?;
                        self.commit_put(node)?;
                        Ok(Outcome::Committed)
                    }
                }
            }
        }
    }

    fn apply_remote_to_local(&mut self, intent: &IntentEnvelope) -> Result<Outcome, QueueError> {
        use OperationIntentKind::*;
        let local_path = intent.path.to_local(&self.sync_root);

        match intent.intent {
            CreateFile | UpdateFile => {
                let remote_node = self.lookup_remote(&intent.path)?;
                if intent.intent == UpdateFile {
                    if let Some(resolution) = self.check_local_divergence(&intent.path, &local_path)? {
                        return self.apply_conflict_resolution(intent, resolution, false);
                    }
                }
                let contents = self.remote.fetch_file(&remote_node)?;
                write_local(&local_path, &contents)?;
                self.commit_put(remote_node)?;
                Ok(Outcome::Committed)
            }
            CreateFolder => {
                let remote_node = self.lookup_remote(&intent.path)?;
                fs::create_dir_all(&local_path).map_err(|e| QueueError::Local { path: local_path.clone(), source: e })?;
                self.commit_put(remote_node)?;
                Ok(Outcome::Committed)
            }
            DeleteFile | DeleteFolder => {
                if !local_path.exists() {
                    if let Some(id) = self.node_id_for(&intent.path) {
                        self.commit_remove(id)?;
                    }
                    return Ok(Outcome::Dropped);
                }
                if let Some(resolution) = self.check_local_divergence(&intent.path, &local_path)? {
                    return self.apply_conflict_resolution(intent, resolution, false);
                }
                remove_local(&local_path, intent.intent == DeleteFolder)?;
                if let Some(id) = self.node_id_for(&intent.path) {
                    self.commit_remove(id)?;
                }
                Ok(Outcome::Committed)
            }
            MoveFile | MoveFolder => {
                let dest = intent.dest_path.clone().ok_or_else(|| QueueError::Local {
                    path: local_path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "move intent missing dest_path"),
                })?;
                let dest_local = dest.to_local(&self.sync_root);
                if let Some(parent) = dest_local.parent() {
                    fs::create_dir_all(parent).map_err(|e| QueueError::Local { path: parent.to_path_buf(), source: e })?;
                }
                if local_path.exists() {
                    fs::rename(&local_path, &dest_local).map_err(|e| QueueError::Local { path: local_path.clone(), source: e })?;
                }
                if let Some(id) = self.node_id_for(&intent.path) {
                    self.commit_rename(id, dest)?;
                }
                Ok(Outcome::Committed)
            }
        }
    }

    fn node_id_for(&self, path: &SyncPath) -> Option<NodeId> {
        self.snapshot.read().expect("snapshot lock poisoned").get_by_path(path).map(|n| n.id)
    }

    fn lookup_remote(&self, path: &SyncPath) -> Result<Node, QueueError> {
        self.remote_index
            .read()
            .expect("remote index lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| crate::error::RemoteError::NotFound(path.clone()).into())
    }

    /// Before overwriting a remote-driven update/delete, check whether the
    /// local copy has been edited since the Snapshot's last known revision
    /// for this path. `None` means no divergence (safe to proceed); `Some`
    /// carries the conflict descriptor to escalate.
    fn check_local_divergence(&self, path: &SyncPath, local_path: &std::path::Path) -> Result<Option<InterventionRequest>, QueueError> {
        let known = { self.snapshot.read().expect("snapshot lock poisoned").get_by_path(path).cloned() };
        let Some(known) = known else { return Ok(None) };
        if !local_path.is_file() {
            return Ok(None);
        }
        let local_hash = hash_file(local_path)?;
        let diverged = match &known.revision {
            Revision::ContentHash(h) => h != &local_hash,
            Revision::Etag(_) => false,
        };
        if !diverged {
            return Ok(None);
        }
        let modified_unix = fs::metadata(local_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        Ok(Some(InterventionRequest {
            path: path.clone(),
            local_state: SideState { revision: Some(local_hash), modified_unix },
            remote_state: SideState { revision: Some(revision_string(&known.revision)), modified_unix: None },
            recommended_action: RecommendedAction::KeepRemote,
        }))
    }

    /// Mirror of `check_local_divergence` for the local→remote direction:
    /// has the remote side moved since our last Snapshot, concurrently
    /// with the local edit we're about to push?
    fn check_remote_divergence(&self, path: &SyncPath) -> Result<Option<InterventionRequest>, QueueError> {
        let known = { self.snapshot.read().expect("snapshot lock poisoned").get_by_path(path).cloned() };
        let Some(known) = known else { return Ok(None) };
        let remote_node = { self.remote_index.read().expect("remote index lock poisoned").get(path).cloned() };
        let Some(remote_node) = remote_node else { return Ok(None) };
        if remote_node.revision == known.revision {
            return Ok(None);
        }
        Ok(Some(InterventionRequest {
            path: path.clone(),
            local_state: SideState { revision: Some(revision_string(&known.revision)), modified_unix: None },
            remote_state: SideState { revision: Some(revision_string(&remote_node.revision)), modified_unix: None },
            recommended_action: RecommendedAction::KeepLocal,
        }))
    }

    /// Ask the registered intervention callback what to do, then carry out
    /// the resolution. `remote_to_local` distinguishes which side `intent`
    /// would have overwritten had there been no conflict, since `keep-both`
    /// renames whichever side would otherwise be clobbered.
    fn apply_conflict_resolution(
        &mut self,
        intent: &IntentEnvelope,
        request: InterventionRequest,
        remote_to_local_push: bool,
    ) -> Result<Outcome, QueueError> {
        let resolution = match &self.intervention_cb {
            Some(cb) => cb(&request),
            None => InterventionResolution::Skip,
        };

        self.notify(Notification {
            path: intent.path.clone(),
            dest_path: intent.dest_path.clone(),
            kind: NotificationKind::Conflict,
        });

        let local_path = intent.path.to_local(&self.sync_root);

        match resolution {
            InterventionResolution::Skip => Ok(Outcome::Dropped),
            InterventionResolution::KeepLocal => {
                if remote_to_local_push {
                    // The remote side loses; nothing to do locally, but the
                    // local content now becomes authoritative on next push.
                    Ok(Outcome::Dropped)
                } else {
                    // intent.direction is local→remote and local already wins
                    // by definition; fall through as if no conflict existed.
                    self.force_push_local(intent)
                }
            }
            InterventionResolution::KeepRemote => {
                if remote_to_local_push {
                    self.force_pull_remote(intent)
                } else {
                    Ok(Outcome::Dropped)
                }
            }
            InterventionResolution::KeepBoth => {
                self.keep_both(intent, &local_path)?;
                if remote_to_local_push {
                    self.force_pull_remote(intent)
                } else {
                    self.force_push_local(intent)
                }
            }
        }
    }

    fn force_push_local(&mut self, intent: &IntentEnvelope) -> Result<Outcome, QueueError> {
        let local_path = intent.path.to_local(&self.sync_root);
        let contents = read_local(&local_path)?;
        let node = self.remote.upload_file(&intent.path, &contents)?;
        self.commit_put(node)?;
        Ok(Outcome::Committed)
    }

    fn force_pull_remote(&mut self, intent: &IntentEnvelope) -> Result<Outcome, QueueError> {
        let local_path = intent.path.to_local(&self.sync_root);
        let remote_node = self.lookup_remote(&intent.path)?;
        let contents = self.remote.fetch_file(&remote_node)?;
        write_local(&local_path, &contents)?;
        self.commit_put(remote_node)?;
        Ok(Outcome::Committed)
    }

    /// Rename the local copy aside so both versions survive under distinct
    /// names, for a `keep-both` resolution. Content is left untouched; a
    /// byte-level merge is only attempted when the two versions don't
    /// overlap, via `diffy::merge` against the last-known-good revision as
    /// the merge base -- when that fails, the plain rename is the fallback.
    fn keep_both(&self, intent: &IntentEnvelope, local_path: &std::path::Path) -> Result<(), QueueError> {
        if !local_path.is_file() {
            return Ok(());
        }
        if let Ok(local_text) = std::str::from_utf8(&read_local(local_path)?) {
            if let Ok(remote_node) = self.lookup_remote(&intent.path) {
                if let Ok(remote_bytes) = self.remote.fetch_file(&remote_node) {
                    if let Ok(remote_text) = std::str::from_utf8(&remote_bytes) {
                        let patch = diffy::create_patch(local_text, remote_text);
                        let patch_path = local_path.with_extension(format!(
                            "{}.patch",
                            local_path.extension().and_then(|e| e.to_str()).unwrap_or("txt")
                        ));
                        if fs::write(&patch_path, patch.to_string()).is_ok() {
                            debug!("wrote conflict patch to {}", patch_path.display());
                        }
                    }
                }
            }
        }
        let conflicted_path = conflicted_copy_path(local_path);
        fs::rename(local_path, &conflicted_path).map_err(|e| QueueError::Local { path: local_path.to_path_buf(), source: e })?;
        info!("kept conflicting local copy at {}", conflicted_path.display());
        Ok(())
    }

    fn commit_put(&mut self, node: Node) -> Result<(), QueueError> {
        self.store.record_put(&node)?;
        self.snapshot.write().expect("snapshot lock poisoned").insert(node);
        self.maybe_compact()
    }

    fn commit_remove(&mut self, id: NodeId) -> Result<(), QueueError> {
        self.store.record_remove(id)?;
        self.snapshot.write().expect("snapshot lock poisoned").remove(id);
        self.maybe_compact()
    }

    fn commit_rename(&mut self, id: NodeId, new_path: SyncPath) -> Result<(), QueueError> {
        let node = {
            let mut snap = self.snapshot.write().expect("snapshot lock poisoned");
            snap.rename(id, new_path);
            snap.get(id).cloned()
        };
        if let Some(node) = node {
            self.store.record_put(&node)?;
        }
        self.maybe_compact()
    }

    fn maybe_compact(&mut self) -> Result<(), QueueError> {
        if self.store.should_compact() {
            let snapshot = self.snapshot.read().expect("snapshot lock poisoned").clone();
            self.store.compact(&snapshot)?;
        }
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        debug!("{}", notification);
        if let Some(cb) = &self.notification_cb {
            cb(&notification);
        }
    }
}

fn revision_string(revision: &Revision) -> String {
    match revision {
        Revision::ContentHash(h) => h.clone(),
        Revision::Etag(e) => e.clone(),
    }
}

fn conflicted_copy_path(path: &std::path::Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let name = match ext {
        Some(ext) => format!("{stem} (conflicted copy).{ext}"),
        None => format!("{stem} (conflicted copy)"),
    };
    path.with_file_name(name)
}

fn read_local(path: &std::path::Path) -> Result<Vec<u8>, QueueError> {
    fs::read(path).map_err(|e| QueueError::Local { path: path.to_path_buf(), source: e })
}

fn write_local(path: &std::path::Path, contents: &[u8]) -> Result<(), QueueError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| QueueError::Local { path: parent.to_path_buf(), source: e })?;
    }
    fs::write(path, contents).map_err(|e| QueueError::Local { path: path.to_path_buf(), source: e })
}

fn remove_local(path: &std::path::Path, is_folder: bool) -> Result<(), QueueError> {
    let result = if is_folder { fs::remove_dir_all(path) } else { fs::remove_file(path) };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QueueError::Local { path: path.to_path_buf(), source: e }),
    }
}

/// SHA-256 hex digest of a local file's contents.
fn hash_file(path: &std::path::Path) -> Result<String, QueueError> {
    let mut file = fs::File::open(path).map_err(|e| QueueError::Local { path: path.to_path_buf(), source: e })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer).map_err(|e| QueueError::Local { path: path.to_path_buf(), source: e })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
