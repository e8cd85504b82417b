//! C3, the remote poller (spec.md §4.3). Periodically lists the remote
//! tree and diffs it against the last-known-good `Snapshot`, emitting
//! `remote→local` `IntentEnvelope`s for anything that changed out from
//! under us. Structured as a dedicated thread with a timer plus an
//! explicit wake channel, the same shape as the teacher's debounce
//! thread in `watcher.rs` generalized from "wait for a burst of local
//! events" to "wait for the next scheduled poll or an explicit nudge".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::PollError;
use crate::model::{IntentEnvelope, Node, NodeKind, OperationIntentKind, Snapshot, SyncDirection, SyncPath};
use crate::remote::RemoteApi;

/// The most recently observed remote tree, keyed by path. The queue
/// consults this when applying a `remote→local` intent so it can call
/// `RemoteApi::fetch_file`/conflict-diff against a real `Node` without
/// re-listing the whole tree once per intent; `RemoteApi`'s six methods
/// have no single-node lookup, so the poller is the only place a fresh
/// listing happens and this index is how it shares that with the queue.
pub type RemoteIndex = Arc<RwLock<HashMap<SyncPath, Node>>>;

pub struct RemotePoller {
    stop: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RemotePoller {
    /// Spawn the poller thread. `interval` is the fixed cadence (spec.md
    /// §4.3); `poll_now` can be called at any time to run a cycle early
    /// without waiting out the rest of the interval.
    pub fn start(
        remote: Arc<dyn RemoteApi>,
        snapshot: Arc<RwLock<Snapshot>>,
        index: RemoteIndex,
        interval: Duration,
        sink: Sender<IntentEnvelope>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));

        let stop_loop = Arc::clone(&stop);
        let wake_loop = Arc::clone(&wake);

        let handle = thread::spawn(move || loop {
            if stop_loop.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = poll_once(remote.as_ref(), &snapshot, &index, &sink) {
                error!("remote poll cycle failed: {}", e);
            }

            let (lock, cvar) = &*wake_loop;
            let woke = lock.lock().unwrap();
            let (_woke, timeout) = cvar
                .wait_timeout_while(woke, interval, |w| !*w && !stop_loop.load(Ordering::SeqCst))
                .unwrap();
            let _ = timeout;

            let mut reset = lock.lock().unwrap();
            *reset = false;
        });

        Self {
            stop,
            wake,
            handle: Some(handle),
        }
    }

    /// Request an immediate poll cycle, short-circuiting the remaining
    /// wait on the interval timer.
    pub fn poll_now(&self) {
        let (lock, cvar) = &*self.wake;
        let mut woke = lock.lock().unwrap();
        *woke = true;
        cvar.notify_one();
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.poll_now();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// True once the poll-cycle thread has exited. The worker's supervisor
    /// (spec.md §4.5) polls this to detect an unexpected termination worth
    /// restarting; it stays false for the lifetime of a healthy poller.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

impl Drop for RemotePoller {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.poll_now();
    }
}

/// Run a single poll cycle: list the remote tree, diff against the
/// Snapshot, and send `IntentEnvelope`s for anything that changed.
/// Emission order follows the consolidator's convention (moves, then
/// deletes, then creates/updates) so a queue that commits in order
/// never observes a node at two paths at once.
pub fn poll_once(
    remote: &dyn RemoteApi,
    snapshot: &RwLock<Snapshot>,
    index: &RemoteIndex,
    sink: &Sender<IntentEnvelope>,
) -> Result<(), PollError> {
    let remote_nodes = remote.list_tree()?;

    {
        let mut idx = index.write().expect("remote index lock poisoned");
        idx.clear();
        idx.extend(remote_nodes.iter().map(|n| (n.path.clone(), n.clone())));
    }

    let (moves, deletes, creates_and_updates) = {
        let local = snapshot.read().expect("snapshot lock poisoned");
        diff_against_snapshot(&local, &remote_nodes)
    };

    debug!(
        "remote poll: {} moves, {} deletes, {} creates/updates",
        moves.len(),
        deletes.len(),
        creates_and_updates.len()
    );

    for intent in moves.into_iter().chain(deletes).chain(creates_and_updates) {
        if sink.send(intent).is_err() {
            debug!("operations queue receiver dropped; halting poll emission");
            break;
        }
    }

    Ok(())
}

fn diff_against_snapshot(
    local: &Snapshot,
    remote_nodes: &[Node],
) -> (Vec<IntentEnvelope>, Vec<IntentEnvelope>, Vec<IntentEnvelope>) {
    let mut moves = Vec::new();
    let mut deletes = Vec::new();
    let mut creates_and_updates = Vec::new();

    let mut seen_ids = std::collections::HashSet::new();

    for remote_node in remote_nodes {
        seen_ids.insert(remote_node.id);

        match local.get(remote_node.id) {
            None => {
                let kind = match remote_node.kind {
                    NodeKind::File => OperationIntentKind::CreateFile,
                    NodeKind::Folder => OperationIntentKind::CreateFolder,
                };
                creates_and_updates.push(IntentEnvelope::new(
                    kind,
                    SyncDirection::RemoteToLocal,
                    remote_node.path.clone(),
                    None,
                ));
            }
            Some(local_node) => {
                if local_node.path != remote_node.path {
                    let kind = match remote_node.kind {
                        NodeKind::File => OperationIntentKind::MoveFile,
                        NodeKind::Folder => OperationIntentKind::MoveFolder,
                    };
                    moves.push(IntentEnvelope::new(
                        kind,
                        SyncDirection::RemoteToLocal,
                        local_node.path.clone(),
                        Some(remote_node.path.clone()),
                    ));
                } else if remote_node.kind == NodeKind::File && local_node.revision != remote_node.revision {
                    creates_and_updates.push(IntentEnvelope::new(
                        OperationIntentKind::UpdateFile,
                        SyncDirection::RemoteToLocal,
                        remote_node.path.clone(),
                        None,
                    ));
                }
            }
        }
    }

    for local_node in local.iter() {
        if seen_ids.contains(&local_node.id) {
            continue;
        }
        let kind = match local_node.kind {
            NodeKind::File => OperationIntentKind::DeleteFile,
            NodeKind::Folder => OperationIntentKind::DeleteFolder,
        };
        deletes.push(IntentEnvelope::new(
            kind,
            SyncDirection::RemoteToLocal,
            local_node.path.clone(),
            None,
        ));
    }

    (moves, deletes, creates_and_updates)
}
