//! C2, the local watcher (spec.md §4.2). Subscribes to `notify`'s
//! `RecommendedWatcher` over the sync root and closes a batch on a
//! debounce timer thread, directly reusing the teacher's
//! `create_watcher`/`flush_source_events` debounce-thread-plus-cancel-token
//! shape (`watcher.rs`'s `RepoWatcher`), generalized from "copy files into
//! a mirror tree" to "push canonical events through the Consolidator and
//! emit `IntentEnvelope`s".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ignore::gitignore::Gitignore;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, warn};

use crate::consolidator::Consolidator;
use crate::error::WatcherError;
use crate::model::{intent_kind_for, IntentEnvelope, OperationIntentKind, RawEvent, SyncDirection, SyncPath};
use crate::resolver::Resolver;

/// Events accumulated since the last flush, plus the half-pairs of a
/// rename that notify delivered as two separate `RenameMode::From`/`To`
/// callbacks (distinguished by its rename cookie/tracker).
#[derive(Default)]
struct PendingBatch {
    events: Vec<RawEvent>,
    half_moves: HashMap<usize, SyncPath>,
}

pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    stop: Arc<AtomicBool>,
    debounce_handle: Option<thread::JoinHandle<()>>,
}

impl LocalWatcher {
    /// Start watching `sync_root` recursively. Canonical events are
    /// mapped to `local→remote` `IntentEnvelope`s (contextualized against
    /// `resolver` per spec.md §4.2) and sent on `sink`.
    pub fn start(
        sync_root: &Path,
        ignore: Gitignore,
        debounce: Duration,
        resolver: Arc<dyn Resolver>,
        sink: Sender<IntentEnvelope>,
    ) -> Result<Self, WatcherError> {
        let pending = Arc::new(Mutex::new(PendingBatch::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let root = sync_root.to_path_buf();
        let pending_cb = Arc::clone(&pending);
        let ignore_cb = ignore.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => handle_raw_event(&event, &root, &ignore_cb, &pending_cb),
                Err(e) => error!("filesystem watch error: {}", e),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| WatcherError::Start {
            path: sync_root.to_path_buf(),
            source: e,
        })?;

        watcher
            .watch(sync_root, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::Start {
                path: sync_root.to_path_buf(),
                source: e,
            })?;

        let pending_flush = Arc::clone(&pending);
        let stop_flush = Arc::clone(&stop);

        let debounce_handle = thread::spawn(move || {
            let check_interval = Duration::from_millis(50.min(debounce.as_millis() as u64).max(1));
            let mut last_event_time: Option<Instant> = None;

            loop {
                if stop_flush.load(Ordering::SeqCst) {
                    flush_batch(&pending_flush, &resolver, &sink);
                    break;
                }

                let has_pending = !pending_flush.lock().unwrap().events.is_empty();
                if has_pending {
                    let last = *last_event_time.get_or_insert_with(Instant::now);
                    if last.elapsed() >= debounce {
                        flush_batch(&pending_flush, &resolver, &sink);
                        last_event_time = None;
                    }
                } else {
                    last_event_time = None;
                }

                thread::sleep(check_interval);
            }
        });

        Ok(Self {
            _watcher: watcher,
            stop,
            debounce_handle: Some(debounce_handle),
        })
    }

    /// Stop the watcher and join its debounce thread, flushing any
    /// pending batch first.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.debounce_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn handle_raw_event(event: &Event, sync_root: &Path, ignore: &Gitignore, pending: &Mutex<PendingBatch>) {
    let mut batch = pending.lock().unwrap();

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            if let (Some(from_rel), Some(to_rel)) =
                (to_sync_path(from, sync_root, ignore), to_sync_path(to, sync_root, ignore))
            {
                batch.events.push(RawEvent::moved(from_rel, to_rel));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.first() {
                if let Some(rel) = to_sync_path(path, sync_root, ignore) {
                    if let Some(cookie) = event.attrs().tracker() {
                        batch.half_moves.insert(cookie, rel);
                    } else {
                        batch.events.push(RawEvent::deleted(rel));
                    }
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.first() {
                if let Some(rel) = to_sync_path(path, sync_root, ignore) {
                    let cookie = event.attrs().tracker();
                    let matched = cookie.and_then(|c| batch.half_moves.remove(&c));
                    match matched {
                        Some(from_rel) => batch.events.push(RawEvent::moved(from_rel, rel)),
                        None => batch.events.push(RawEvent::created(rel)),
                    }
                }
            }
        }
        EventKind::Create(kind) => {
            for path in &event.paths {
                if let Some(mut rel) = to_sync_path(path, sync_root, ignore) {
                    rel = force_directory(rel, matches!(kind, CreateKind::Folder) || path.is_dir());
                    batch.events.push(RawEvent::created(rel));
                }
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                if let Some(mut rel) = to_sync_path(path, sync_root, ignore) {
                    rel = force_directory(rel, matches!(kind, RemoveKind::Folder));
                    batch.events.push(RawEvent::deleted(rel));
                }
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) => {
            for path in &event.paths {
                if path.is_dir() {
                    continue;
                }
                if let Some(rel) = to_sync_path(path, sync_root, ignore) {
                    batch.events.push(RawEvent::modified(rel));
                }
            }
        }
        _ => {}
    }
}

fn force_directory(path: SyncPath, is_directory: bool) -> SyncPath {
    SyncPath::new(path.segments().to_vec(), is_directory)
}

/// Map an absolute path delivered by `notify` into a `SyncPath` relative
/// to the sync root, filtering ignored paths at ingress (spec.md §4.2
/// "Exclusions").
fn to_sync_path(path: &Path, sync_root: &Path, ignore: &Gitignore) -> Option<SyncPath> {
    let rel = path.strip_prefix(sync_root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    if ignore.matched_path_or_any_parents(rel, path.is_dir()).is_ignore() {
        return None;
    }
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(SyncPath::new(segments, path.is_dir()))
}

fn flush_batch(pending: &Mutex<PendingBatch>, resolver: &Arc<dyn Resolver>, sink: &Sender<IntentEnvelope>) {
    let (events, leftover_moves) = {
        let mut batch = pending.lock().unwrap();
        let events = std::mem::take(&mut batch.events);
        let leftover = std::mem::take(&mut batch.half_moves);
        (events, leftover)
    };

    if events.is_empty() && leftover_moves.is_empty() {
        return;
    }

    let mut consolidator = Consolidator::new();
    for event in events {
        if let Err(e) = consolidator.push(event) {
            warn!("dropping malformed raw event at ingress: {}", e);
        }
    }
    // A rename whose "to" half never arrived before flush (spec.md §9
    // open question: "lost half" of a move) is treated as a delete of
    // the source, to be reconciled against the remote on the next poll.
    for (_, from_rel) in leftover_moves {
        if let Err(e) = consolidator.push(RawEvent::deleted(from_rel)) {
            warn!("dropping malformed synthesized delete: {}", e);
        }
    }

    let canonical_events = consolidator.events();
    debug!("local batch consolidated into {} events", canonical_events.len());

    for canonical in canonical_events {
        let is_dir = canonical.is_directory();
        let mut kind = intent_kind_for(canonical.kind, is_dir);

        if kind == OperationIntentKind::CreateFile {
            if resolver.local_to_db(&canonical.path, false).is_some() {
                kind = OperationIntentKind::UpdateFile;
            }
        }

        let intent = IntentEnvelope::new(
            kind,
            SyncDirection::LocalToRemote,
            canonical.path,
            canonical.dest_path,
        );
        if sink.send(intent).is_err() {
            warn!("operations queue receiver dropped; local watcher intents will be lost");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeId, NodeKind, Revision};
    use ignore::gitignore::GitignoreBuilder;
    use std::sync::mpsc;

    struct NullResolver;
    impl Resolver for NullResolver {
        fn local_to_db(&self, _path: &SyncPath, _is_folder: bool) -> Option<Node> {
            None
        }
    }

    struct AlwaysKnownResolver;
    impl Resolver for AlwaysKnownResolver {
        fn local_to_db(&self, path: &SyncPath, is_folder: bool) -> Option<Node> {
            Some(Node {
                id: NodeId(1),
                path: path.clone(),
                kind: if is_folder { NodeKind::Folder } else { NodeKind::File },
                revision: Revision::ContentHash("x".into()),
                parent_id: None,
            })
        }
    }

    fn no_ignore() -> Gitignore {
        GitignoreBuilder::new("/").build().unwrap()
    }

    #[test]
    fn flush_with_create_maps_to_create_file_intent() {
        let pending = Mutex::new(PendingBatch {
            events: vec![RawEvent::created(SyncPath::parse("/a.txt"))],
            half_moves: HashMap::new(),
        });
        let (tx, rx) = mpsc::channel();
        let resolver: Arc<dyn Resolver> = Arc::new(NullResolver);
        flush_batch(&pending, &resolver, &tx);

        let intent = rx.recv().unwrap();
        assert_eq!(intent.intent, OperationIntentKind::CreateFile);
        assert_eq!(intent.direction, SyncDirection::LocalToRemote);
    }

    #[test]
    fn known_path_demotes_create_to_update() {
        let pending = Mutex::new(PendingBatch {
            events: vec![RawEvent::created(SyncPath::parse("/a.txt"))],
            half_moves: HashMap::new(),
        });
        let (tx, rx) = mpsc::channel();
        let resolver: Arc<dyn Resolver> = Arc::new(AlwaysKnownResolver);
        flush_batch(&pending, &resolver, &tx);

        let intent = rx.recv().unwrap();
        assert_eq!(intent.intent, OperationIntentKind::UpdateFile);
    }

    #[test]
    fn unmatched_half_move_becomes_delete() {
        let mut half_moves = HashMap::new();
        half_moves.insert(7usize, SyncPath::parse("/old.txt"));
        let pending = Mutex::new(PendingBatch {
            events: vec![],
            half_moves,
        });
        let (tx, rx) = mpsc::channel();
        let resolver: Arc<dyn Resolver> = Arc::new(NullResolver);
        flush_batch(&pending, &resolver, &tx);

        let intent = rx.recv().unwrap();
        assert_eq!(intent.intent, OperationIntentKind::DeleteFile);
        assert_eq!(intent.path, SyncPath::parse("/old.txt"));
    }

    #[test]
    fn empty_batch_flushes_nothing() {
        let pending = Mutex::new(PendingBatch::default());
        let (tx, rx) = mpsc::channel();
        let resolver: Arc<dyn Resolver> = Arc::new(NullResolver);
        flush_batch(&pending, &resolver, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn to_sync_path_filters_ignored_entries() {
        let mut builder = GitignoreBuilder::new("/repo");
        builder.add_line(None, "node_modules/").unwrap();
        let ignore = builder.build().unwrap();

        let root = Path::new("/repo");
        assert!(to_sync_path(Path::new("/repo/node_modules/pkg/index.js"), root, &ignore).is_none());
        assert!(to_sync_path(Path::new("/repo/src/main.rs"), root, &ignore).is_some());
    }

    #[test]
    fn to_sync_path_rejects_root_itself() {
        let ignore = no_ignore();
        let root = Path::new("/repo");
        assert!(to_sync_path(root, root, &ignore).is_none());
    }
}
