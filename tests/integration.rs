//! End-to-end exercise of the full worker: a real sync root on disk, a
//! fake `RemoteApi` standing in for the content-repository HTTP service,
//! and the `BackgroundWorker` wiring C2-C5 together exactly as `main.rs`
//! does. Follows the teacher's `tests/integration.rs` pattern of building
//! real on-disk fixtures and driving the whole pipeline rather than
//! mocking any one layer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use syncore::config::{self, DEFAULT_DEBOUNCE_MS};
use syncore::error::RemoteError;
use syncore::model::{Node, NodeId, NodeKind, Revision, SyncPath};
use syncore::remote::RemoteApi;
use syncore::worker::BackgroundWorker;

/// A `RemoteApi` backed by an in-memory tree, standing in for the real
/// content-repository HTTP API the way the teacher's tests never touch a
/// real upstream `cargo` registry either.
struct FakeRemote {
    tree: Mutex<Vec<(Node, Vec<u8>)>>,
    next_id: Mutex<u64>,
}

impl FakeRemote {
    fn new() -> Self {
        Self { tree: Mutex::new(Vec::new()), next_id: Mutex::new(1) }
    }

    fn seed_file(&self, path: &str, contents: &[u8]) -> Node {
        let mut id = self.next_id.lock().unwrap();
        let node = Node {
            id: NodeId(*id),
            path: SyncPath::parse(path),
            kind: NodeKind::File,
            revision: Revision::ContentHash(sha256_hex(contents)),
            parent_id: None,
        };
        *id += 1;
        self.tree.lock().unwrap().push((node.clone(), contents.to_vec()));
        node
    }

    fn uploaded_paths(&self) -> Vec<String> {
        self.tree.lock().unwrap().iter().map(|(n, _)| n.path.to_string()).collect()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}

impl RemoteApi for FakeRemote {
    fn list_tree(&self) -> Result<Vec<Node>, RemoteError> {
        Ok(self.tree.lock().unwrap().iter().map(|(n, _)| n.clone()).collect())
    }

    fn fetch_file(&self, node: &Node) -> Result<Vec<u8>, RemoteError> {
        self.tree
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n.id == node.id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| RemoteError::NotFound(node.path.clone()))
    }

    fn upload_file(&self, path: &SyncPath, contents: &[u8]) -> Result<Node, RemoteError> {
        let mut tree = self.tree.lock().unwrap();
        let mut id = self.next_id.lock().unwrap();
        if let Some(entry) = tree.iter_mut().find(|(n, _)| &n.path == path) {
            entry.0.revision = Revision::ContentHash(sha256_hex(contents));
            entry.1 = contents.to_vec();
            return Ok(entry.0.clone());
        }
        let node = Node {
            id: NodeId(*id),
            path: path.clone(),
            kind: NodeKind::File,
            revision: Revision::ContentHash(sha256_hex(contents)),
            parent_id: None,
        };
        *id += 1;
        tree.push((node.clone(), contents.to_vec()));
        Ok(node)
    }

    fn create_folder(&self, path: &SyncPath) -> Result<Node, RemoteError> {
        let mut id = self.next_id.lock().unwrap();
        let node = Node {
            id: NodeId(*id),
            path: path.clone(),
            kind: NodeKind::Folder,
            revision: Revision::Etag("v1".into()),
            parent_id: None,
        };
        *id += 1;
        self.tree.lock().unwrap().push((node.clone(), Vec::new()));
        Ok(node)
    }

    fn move_node(&self, node: &Node, new_path: &SyncPath) -> Result<Node, RemoteError> {
        let mut tree = self.tree.lock().unwrap();
        if let Some(entry) = tree.iter_mut().find(|(n, _)| n.id == node.id) {
            entry.0.path = new_path.clone();
            return Ok(entry.0.clone());
        }
        Err(RemoteError::NotFound(node.path.clone()))
    }

    fn delete_node(&self, node: &Node) -> Result<(), RemoteError> {
        self.tree.lock().unwrap().retain(|(n, _)| n.id != node.id);
        Ok(())
    }
}

fn write_config(config_dir: &Path, sync_root: &Path) -> PathBuf {
    let path = config_dir.join("syncore.toml");
    fs::write(
        &path,
        format!(
            "version = 1\nsync_root = \"{}\"\nremote_base_url = \"https://example.org\"\nproject_id = \"p1\"\npoll_interval_secs = 3600\ndebounce_ms = {DEFAULT_DEBOUNCE_MS}\n",
            sync_root.display()
        ),
    )
    .unwrap();
    path
}

fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn local_create_propagates_to_remote() {
    let tmp = TempDir::new().unwrap();
    let sync_root = tmp.path().join("root");
    fs::create_dir_all(&sync_root).unwrap();
    let config_path = write_config(tmp.path(), &sync_root);
    let cfg = config::load_config(Some(&config_path)).unwrap();

    let remote = Arc::new(FakeRemote::new());
    let mut worker = BackgroundWorker::new(cfg, remote.clone());
    worker.start().unwrap();

    fs::write(sync_root.join("notes.txt"), b"hello world").unwrap();

    let committed = wait_for(|| remote.uploaded_paths().contains(&"/notes.txt".to_string()), Duration::from_secs(5));
    worker.stop();

    assert!(committed, "expected notes.txt to reach the fake remote, saw {:?}", remote.uploaded_paths());
}

#[test]
fn remote_seeded_file_is_pulled_down_on_sync_now() {
    let tmp = TempDir::new().unwrap();
    let sync_root = tmp.path().join("root");
    fs::create_dir_all(&sync_root).unwrap();
    let config_path = write_config(tmp.path(), &sync_root);
    let cfg = config::load_config(Some(&config_path)).unwrap();

    let remote = Arc::new(FakeRemote::new());
    remote.seed_file("/hello.txt", b"from remote");

    let mut worker = BackgroundWorker::new(cfg, remote.clone());
    worker.start().unwrap();
    worker.sync_now();

    let pulled = wait_for(|| sync_root.join("hello.txt").is_file(), Duration::from_secs(5));
    worker.stop();

    assert!(pulled, "expected hello.txt to be pulled down from the fake remote");
    assert_eq!(fs::read(sync_root.join("hello.txt")).unwrap(), b"from remote");
}

#[test]
fn worker_survives_start_stop_with_no_intents() {
    let tmp = TempDir::new().unwrap();
    let sync_root = tmp.path().join("root");
    fs::create_dir_all(&sync_root).unwrap();
    let config_path = write_config(tmp.path(), &sync_root);
    let cfg = config::load_config(Some(&config_path)).unwrap();

    let remote = Arc::new(FakeRemote::new());
    let mut worker = BackgroundWorker::new(cfg, remote);
    worker.start().unwrap();
    assert!(worker.is_running());
    worker.stop();
    assert!(!worker.is_running());
}
