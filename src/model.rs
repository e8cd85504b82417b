//! Shared data model: paths, raw/canonical events, operation intents, and the
//! Node/Snapshot pair the queue and poller reconcile against.

use std::collections::HashMap;
use std::fmt;

/// A rooted, normalized sequence of name segments relative to the sync root.
///
/// Equality and ordering are bytewise on the segment list; `is_directory` is
/// part of identity since a file and a directory can share a name but never
/// a path in the same tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPath {
    segments: Vec<String>,
    is_directory: bool,
}

impl SyncPath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>, is_directory: bool) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            is_directory,
        }
    }

    /// Parse a `/`-separated path string such as `/folder/child.txt`.
    /// A trailing slash marks the path as directory-typed.
    pub fn parse(s: &str) -> Self {
        let is_directory = s.ends_with('/') || s.is_empty();
        let segments = s
            .split('/')
            .map(|seg| seg.to_string())
            .filter(|seg| !seg.is_empty())
            .collect();
        Self {
            segments,
            is_directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Depth in the tree; the sync root itself has depth 0.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True if `self` is a proper descendant of `ancestor` (not equal, nested under it).
    pub fn is_proper_descendant_of(&self, ancestor: &SyncPath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    /// Rewrite `self` as if it had been rooted under `new_ancestor` instead of
    /// `old_ancestor`. Panics if `self` is not nested under `old_ancestor`;
    /// callers must check `is_proper_descendant_of` first.
    pub fn rebase(&self, old_ancestor: &SyncPath, new_ancestor: &SyncPath) -> SyncPath {
        debug_assert!(self.is_proper_descendant_of(old_ancestor));
        let tail = &self.segments[old_ancestor.segments.len()..];
        let mut segments = new_ancestor.segments.clone();
        segments.extend(tail.iter().cloned());
        SyncPath {
            segments,
            is_directory: self.is_directory,
        }
    }

    /// Join `self` onto a filesystem root, producing the absolute local
    /// path the queue reads/writes for this entry.
    pub fn to_local(&self, sync_root: &std::path::Path) -> std::path::PathBuf {
        let mut buf = sync_root.to_path_buf();
        for seg in &self.segments {
            buf.push(seg);
        }
        buf
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))?;
        if self.is_directory && !self.segments.is_empty() {
            write!(f, "/")?;
        }
        Ok(())
    }
}

/// The kind of change a raw filesystem notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A single raw filesystem notification, as delivered by the watch library
/// before any consolidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: SyncPath,
    pub dest_path: Option<SyncPath>,
}

impl RawEvent {
    pub fn created(path: SyncPath) -> Self {
        Self {
            kind: RawEventKind::Created,
            path,
            dest_path: None,
        }
    }

    pub fn modified(path: SyncPath) -> Self {
        Self {
            kind: RawEventKind::Modified,
            path,
            dest_path: None,
        }
    }

    pub fn deleted(path: SyncPath) -> Self {
        Self {
            kind: RawEventKind::Deleted,
            path,
            dest_path: None,
        }
    }

    pub fn moved(path: SyncPath, dest_path: SyncPath) -> Self {
        Self {
            kind: RawEventKind::Moved,
            path,
            dest_path: Some(dest_path),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.path.is_directory()
    }
}

/// Produced by the consolidator: same shape as `RawEvent`, but guaranteed
/// non-redundant by construction (only ever built from `Consolidator::events`).
pub type CanonicalEvent = RawEvent;

/// What the local watcher or remote poller wants the queue to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationIntentKind {
    CreateFile,
    UpdateFile,
    DeleteFile,
    MoveFile,
    CreateFolder,
    DeleteFolder,
    MoveFolder,
}

/// Which side originated an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
}

/// A queued unit of work: what to do, which direction it flows, and the
/// path(s) it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentEnvelope {
    pub intent: OperationIntentKind,
    pub direction: SyncDirection,
    pub path: SyncPath,
    pub dest_path: Option<SyncPath>,
}

impl IntentEnvelope {
    pub fn new(
        intent: OperationIntentKind,
        direction: SyncDirection,
        path: SyncPath,
        dest_path: Option<SyncPath>,
    ) -> Self {
        Self {
            intent,
            direction,
            path,
            dest_path,
        }
    }
}

/// Maps a `CanonicalEvent` to the `OperationIntentKind` the watcher/poller
/// emits for it, per the kind × is_dir table.
pub fn intent_kind_for(kind: RawEventKind, is_directory: bool) -> OperationIntentKind {
    use OperationIntentKind::*;
    match (kind, is_directory) {
        (RawEventKind::Created, false) => CreateFile,
        (RawEventKind::Created, true) => CreateFolder,
        (RawEventKind::Modified, false) => UpdateFile,
        (RawEventKind::Modified, true) => {
            unreachable!("directory Modified is dropped by the consolidator before this mapping")
        }
        (RawEventKind::Deleted, false) => DeleteFile,
        (RawEventKind::Deleted, true) => DeleteFolder,
        (RawEventKind::Moved, false) => MoveFile,
        (RawEventKind::Moved, true) => MoveFolder,
    }
}

/// Opaque node identifier assigned by the sync core when a Node is first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Folder,
}

/// Either a content hash (files) or a provider-assigned version tag
/// (folders, or files on providers that don't expose hashes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    ContentHash(String),
    Etag(String),
}

/// The logical record describing a file or folder known to the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub path: SyncPath,
    pub kind: NodeKind,
    pub revision: Revision,
    pub parent_id: Option<NodeId>,
}

/// The last-known-good set of Nodes the remote poller diffs against and the
/// queue mutates on successful commit.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: HashMap<NodeId, Node>,
    by_path: HashMap<SyncPath, NodeId>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_by_path(&self, path: &SyncPath) -> Option<&Node> {
        self.by_path.get(path).and_then(|id| self.nodes.get(id))
    }

    pub fn contains_path(&self, path: &SyncPath) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn insert(&mut self, node: Node) {
        self.by_path.insert(node.path.clone(), node.id);
        self.nodes.insert(node.id, node);
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.by_path.remove(&node.path);
        Some(node)
    }

    pub fn remove_by_path(&mut self, path: &SyncPath) -> Option<Node> {
        let id = self.by_path.get(path).copied()?;
        self.remove(id)
    }

    /// Move a node to a new path, keeping its id and updating the path index.
    pub fn rename(&mut self, id: NodeId, new_path: SyncPath) -> Option<()> {
        let node = self.nodes.get_mut(&id)?;
        self.by_path.remove(&node.path);
        node.path = new_path.clone();
        self.by_path.insert(new_path, id);
        Some(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let p = SyncPath::parse("/folder/child.txt");
        assert_eq!(p.segments(), &["folder".to_string(), "child.txt".to_string()]);
        assert!(!p.is_directory());
        assert_eq!(p.to_string(), "/folder/child.txt");
    }

    #[test]
    fn parse_directory_trailing_slash() {
        let p = SyncPath::parse("/folder/");
        assert!(p.is_directory());
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn proper_descendant_check() {
        let parent = SyncPath::parse("/parent/");
        let child = SyncPath::parse("/parent/child.txt");
        let sibling = SyncPath::parse("/other/child.txt");
        assert!(child.is_proper_descendant_of(&parent));
        assert!(!sibling.is_proper_descendant_of(&parent));
        assert!(!parent.is_proper_descendant_of(&parent));
    }

    #[test]
    fn rebase_replaces_ancestor_prefix() {
        let old = SyncPath::parse("/folder/");
        let new = SyncPath::parse("/test/");
        let child = SyncPath::parse("/folder/donut");
        assert_eq!(child.rebase(&old, &new), SyncPath::parse("/test/donut"));
    }

    #[test]
    fn snapshot_insert_lookup_rename_remove() {
        let mut snap = Snapshot::new();
        let id = NodeId(1);
        snap.insert(Node {
            id,
            path: SyncPath::parse("/a.txt"),
            kind: NodeKind::File,
            revision: Revision::ContentHash("abc".into()),
            parent_id: None,
        });
        assert!(snap.contains_path(&SyncPath::parse("/a.txt")));

        snap.rename(id, SyncPath::parse("/b.txt"));
        assert!(!snap.contains_path(&SyncPath::parse("/a.txt")));
        assert!(snap.contains_path(&SyncPath::parse("/b.txt")));

        let removed = snap.remove(id).unwrap();
        assert_eq!(removed.path, SyncPath::parse("/b.txt"));
        assert!(snap.is_empty());
    }
}
