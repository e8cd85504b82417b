//! The remote content-repository API consumed by C3 (poller) and C4
//! (queue), plus a `ureq`-backed implementation. The wire format is kept
//! generic behind `RemoteCodec` so this module doesn't hardcode one
//! vendor's JSON schema; the request-building and status-handling idiom
//! (explicit header construction, matching on `ureq::Error`, `anyhow`
//! context at the glue layer) follows the teacher's `upgrade.rs`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RemoteError;
use crate::model::{Node, NodeKind, Revision, SyncPath};

/// Synchronous operations against the remote tree (spec.md §6). Implementors
/// must be safe to call from the poller thread and the queue's drain
/// thread; neither call path holds a lock across these calls.
pub trait RemoteApi: Send + Sync {
    fn list_tree(&self) -> Result<Vec<Node>, RemoteError>;
    fn fetch_file(&self, node: &Node) -> Result<Vec<u8>, RemoteError>;
    fn upload_file(&self, path: &SyncPath, contents: &[u8]) -> Result<Node, RemoteError>;
    fn create_folder(&self, path: &SyncPath) -> Result<Node, RemoteError>;
    fn move_node(&self, node: &Node, new_path: &SyncPath) -> Result<Node, RemoteError>;
    fn delete_node(&self, node: &Node) -> Result<(), RemoteError>;
}

/// On-the-wire representation of one remote tree entry. Kept minimal and
/// provider-agnostic; a concrete `RemoteCodec` maps it from whatever JSON
/// shape the actual content-repository API returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    pub id: String,
    pub path: String,
    pub is_directory: bool,
    pub revision: String,
    pub parent_id: Option<String>,
}

/// Translates between the crate's `Node` model and whatever JSON the
/// concrete provider speaks. Kept as a trait so `HttpRemoteApi` isn't
/// locked to one vendor's tree-listing response shape.
pub trait RemoteCodec: Send + Sync {
    fn decode_tree(&self, body: &[u8]) -> Result<Vec<WireNode>, RemoteError>;
    fn encode_node(&self, node: &Node) -> WireNode;
}

/// A `RemoteCodec` for a provider that returns a flat JSON array of
/// `WireNode`-shaped objects from its tree-listing endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonArrayCodec;

impl RemoteCodec for JsonArrayCodec {
    fn decode_tree(&self, body: &[u8]) -> Result<Vec<WireNode>, RemoteError> {
        serde_json::from_slice(body)
            .map_err(|e| RemoteError::Unsupported(format!("malformed tree listing: {e}")))
    }

    fn encode_node(&self, node: &Node) -> WireNode {
        WireNode {
            id: node.id.0.to_string(),
            path: node.path.to_string(),
            is_directory: node.path.is_directory(),
            revision: match &node.revision {
                Revision::ContentHash(h) => h.clone(),
                Revision::Etag(e) => e.clone(),
            },
            parent_id: node.parent_id.map(|p| p.0.to_string()),
        }
    }
}

/// Derives a stable `NodeId` from a wire id string. Real provider ids are
/// arbitrary strings (OSF-style guids, etc.), not small integers, so this
/// hashes the string rather than handing out sequential ids per call — the
/// same remote id must map to the same `NodeId` on every poll, since
/// `poller::diff_against_snapshot` matches remote nodes to `Snapshot`
/// entries by `NodeId` identity.
fn wire_id_to_node_id(id: &str) -> crate::model::NodeId {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    if let Ok(n) = id.parse::<u64>() {
        return crate::model::NodeId(n);
    }
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    crate::model::NodeId(hasher.finish())
}

fn wire_to_node(wire: &WireNode) -> Node {
    use crate::model::NodeId;

    let path = SyncPath::parse(&wire.path);
    let kind = if wire.is_directory {
        NodeKind::Folder
    } else {
        NodeKind::File
    };
    let revision = if wire.is_directory {
        Revision::Etag(wire.revision.clone())
    } else {
        Revision::ContentHash(wire.revision.clone())
    };
    let id: NodeId = wire_id_to_node_id(&wire.id);
    let parent_id = wire.parent_id.as_deref().map(wire_id_to_node_id);
    Node {
        id,
        path,
        kind,
        revision,
        parent_id,
    }
}

/// A `ureq`-backed `RemoteApi` implementation, suitable for integration
/// against a real content-repository HTTP API. Authentication is an
/// external collaborator per spec.md §1: the caller supplies a bearer
/// token, this module only shapes requests and handles status codes.
pub struct HttpRemoteApi {
    base_url: String,
    auth_token: String,
    agent: ureq::Agent,
    codec: Box<dyn RemoteCodec>,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build();
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            agent: config.into(),
            codec: Box::new(JsonArrayCodec),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn RemoteCodec>) -> Self {
        self.codec = codec;
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), suffix)
    }
}

/// Maps a transport-level `ureq::Error` to the crate's transient/permanent
/// split (spec.md §7): 5xx and connection failures are transient; 401/403
/// and 507/409-style quota responses are permanent.
fn classify_ureq_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => RemoteError::AuthFailure,
        ureq::Error::StatusCode(507) | ureq::Error::StatusCode(429) => RemoteError::QuotaExceeded,
        ureq::Error::StatusCode(code) if (500..600).contains(&code) => {
            RemoteError::Transient(format!("remote returned {code}"))
        }
        ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed => {
            RemoteError::Transient(err.to_string())
        }
        other => RemoteError::Unsupported(other.to_string()),
    }
}

impl RemoteApi for HttpRemoteApi {
    fn list_tree(&self) -> Result<Vec<Node>, RemoteError> {
        let mut response = self
            .agent
            .get(self.url("/tree"))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .call()
            .map_err(classify_ureq_error)?;
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let wire_nodes = self.codec.decode_tree(&body)?;
        Ok(wire_nodes.iter().map(wire_to_node).collect())
    }

    fn fetch_file(&self, node: &Node) -> Result<Vec<u8>, RemoteError> {
        let mut response = self
            .agent
            .get(self.url(&format!("/nodes/{}/content", node.id.0)))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .call()
            .map_err(classify_ureq_error)?;
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RemoteError::Transient(e.to_string()))
    }

    fn upload_file(&self, path: &SyncPath, contents: &[u8]) -> Result<Node, RemoteError> {
        if path.is_directory() {
            return Err(RemoteError::Unsupported(
                "upload_file called with a directory path".into(),
            ));
        }
        let mut response = self
            .agent
            .put(self.url("/files"))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .header("x-path", &path.to_string())
            .send(contents)
            .map_err(classify_ureq_error)?;
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let wire: WireNode = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Unsupported(format!("malformed upload response: {e}")))?;
        Ok(wire_to_node(&wire))
    }

    fn create_folder(&self, path: &SyncPath) -> Result<Node, RemoteError> {
        let mut response = self
            .agent
            .post(self.url("/folders"))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .send_json(serde_json::json!({ "path": path.to_string() }))
            .map_err(classify_ureq_error)?;
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let wire: WireNode = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Unsupported(format!("malformed folder response: {e}")))?;
        Ok(wire_to_node(&wire))
    }

    fn move_node(&self, node: &Node, new_path: &SyncPath) -> Result<Node, RemoteError> {
        let mut response = self
            .agent
            .post(self.url(&format!("/nodes/{}/move", node.id.0)))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .send_json(serde_json::json!({ "new_path": new_path.to_string() }))
            .map_err(classify_ureq_error)?;
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let wire: WireNode = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Unsupported(format!("malformed move response: {e}")))?;
        Ok(wire_to_node(&wire))
    }

    fn delete_node(&self, node: &Node) -> Result<(), RemoteError> {
        match self
            .agent
            .delete(self.url(&format!("/nodes/{}", node.id.0)))
            .header("authorization", &format!("Bearer {}", self.auth_token))
            .call()
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(404)) => {
                warn!("delete_node: remote node {:?} already gone", node.id);
                Ok(())
            }
            Err(e) => Err(classify_ureq_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn json_array_codec_round_trips_a_file_node() {
        let codec = JsonArrayCodec;
        let node = Node {
            id: NodeId(42),
            path: SyncPath::parse("/a/b.txt"),
            kind: NodeKind::File,
            revision: Revision::ContentHash("deadbeef".into()),
            parent_id: None,
        };
        let wire = codec.encode_node(&node);
        assert_eq!(wire.path, "/a/b.txt");
        assert!(!wire.is_directory);
        assert_eq!(wire.revision, "deadbeef");
    }

    #[test]
    fn decode_tree_rejects_malformed_body() {
        let codec = JsonArrayCodec;
        let err = codec.decode_tree(b"not json").unwrap_err();
        assert!(matches!(err, RemoteError::Unsupported(_)));
    }

    #[test]
    fn decode_tree_parses_wire_nodes() {
        let codec = JsonArrayCodec;
        let body = br#"[{"id":"1","path":"/a.txt","is_directory":false,"revision":"h1","parent_id":null}]"#;
        let nodes = codec.decode_tree(body).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].path, "/a.txt");
    }
}
