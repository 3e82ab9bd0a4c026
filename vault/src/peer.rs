//! Peer abstraction and HTTP peer client.
//!
//! The engine never talks to a transport directly; it sees peers through
//! the [`Peer`] trait (`replicate`, `fetch_blob`, `health`, `info`, plus
//! the proof fetch the garbage collector needs). [`HttpPeer`] is the
//! default implementation speaking the same JSON API this node serves.
//!
//! Per-operation timeouts follow the engine's resource model: health and
//! existence checks 3 s, proof fetch 5 s, replication attempts 10 s.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{Cid, NodeId, NodeUrl, ShardAssignment, StorageProof};

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
pub const EXISTS_TIMEOUT: Duration = Duration::from_secs(3);
pub const PROOF_TIMEOUT: Duration = Duration::from_secs(5);
pub const REPLICATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Strictly decodes a base64 ciphertext field.
///
/// The standard alphabet with padding, nothing lenient: malformed input is
/// an [`VaultError::InvalidRequest`], not a best-effort buffer.
pub fn decode_ciphertext(b64: &str) -> VaultResult<Vec<u8>> {
    BASE64_STANDARD
        .decode(b64)
        .map_err(|e| VaultError::InvalidRequest(format!("ciphertext is not valid base64: {e}")))
}

/// Encodes ciphertext for a JSON payload.
pub fn encode_ciphertext(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Outbound replication payload (`POST /replicate`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateRequest {
    pub cid: Cid,
    /// Base64 ciphertext.
    pub ciphertext: String,
    pub mime_type: String,
    pub from_peer: NodeUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

/// Acknowledgement for a replicate call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateAck {
    pub success: bool,
    pub cid: Cid,
    pub already_stored: bool,
}

/// `GET /health` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// `GET /node/info` payload subset the engine consumes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerNodeInfo {
    pub node_id: Option<NodeId>,
    pub version: Option<String>,
    pub shard_count: Option<u32>,
    pub shards: Option<ShardAssignment>,
    pub min_version: Option<String>,
}

/// Blob retrieval payload (`GET /blob/:cid`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResponse {
    pub cid: Cid,
    /// Base64 ciphertext.
    pub ciphertext: String,
    pub mime_type: String,
    pub created_at: u64,
    pub size: u64,
    pub version: u32,
}

/// `POST /proofs/generate` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    pub cid: Cid,
    pub challenge: String,
}

/// `POST /proofs/generate` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub node_id: NodeId,
    /// Hex signature.
    pub proof: String,
    pub public_key: String,
    pub timestamp: u64,
    pub challenge: String,
    pub cid: Cid,
}

impl ProofResponse {
    /// Converts the wire shape into a verifiable [`StorageProof`].
    pub fn into_proof(self) -> StorageProof {
        StorageProof {
            cid: self.cid,
            node_id: self.node_id,
            timestamp: self.timestamp,
            challenge: self.challenge,
            signature: self.proof,
            public_key: self.public_key,
        }
    }
}

/// A remote vault node as the engine sees it.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Endpoint URL identifying this peer.
    fn url(&self) -> &str;

    /// Pushes a blob to the peer.
    async fn replicate(&self, req: &ReplicateRequest) -> VaultResult<ReplicateAck>;

    /// Fetches a blob's ciphertext from the peer.
    async fn fetch_blob(&self, cid: &Cid) -> VaultResult<Vec<u8>>;

    /// Cheap existence probe.
    async fn has_blob(&self, cid: &Cid) -> VaultResult<bool>;

    /// Liveness check.
    async fn health(&self) -> VaultResult<PeerHealth>;

    /// Node metadata.
    async fn info(&self) -> VaultResult<PeerNodeInfo>;

    /// Asks the peer for a storage proof over the given challenge.
    async fn fetch_proof(&self, cid: &Cid, challenge: &str) -> VaultResult<StorageProof>;
}

/// HTTP implementation of [`Peer`] over this node's own JSON API.
pub struct HttpPeer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        // Avoid accidental double slashes.
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn transport_err(url: &str, e: reqwest::Error) -> VaultError {
    VaultError::Internal(format!("peer request {url} failed: {e}"))
}

#[async_trait]
impl Peer for HttpPeer {
    fn url(&self) -> &str {
        &self.base_url
    }

    async fn replicate(&self, req: &ReplicateRequest) -> VaultResult<ReplicateAck> {
        let url = self.endpoint("/replicate");
        let resp = self
            .client
            .post(&url)
            .timeout(REPLICATE_TIMEOUT)
            .json(req)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(VaultError::Internal(format!(
                "peer {url} refused replication with status {status}"
            )));
        }
        resp.json::<ReplicateAck>()
            .await
            .map_err(|e| transport_err(&url, e))
    }

    async fn fetch_blob(&self, cid: &Cid) -> VaultResult<Vec<u8>> {
        let url = self.endpoint(&format!("/blob/{cid}"));
        let resp = self
            .client
            .get(&url)
            .timeout(REPLICATE_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VaultError::BlobNotFound(cid.to_hex()));
        }
        if !resp.status().is_success() {
            return Err(VaultError::Internal(format!(
                "peer {url} returned status {}",
                resp.status()
            )));
        }
        let body = resp
            .json::<RetrieveResponse>()
            .await
            .map_err(|e| transport_err(&url, e))?;
        decode_ciphertext(&body.ciphertext)
    }

    async fn has_blob(&self, cid: &Cid) -> VaultResult<bool> {
        let url = self.endpoint(&format!("/blob/{cid}"));
        let resp = self
            .client
            .head(&url)
            .timeout(EXISTS_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;
        Ok(resp.status().is_success())
    }

    async fn health(&self) -> VaultResult<PeerHealth> {
        let url = self.endpoint("/health");
        let resp = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;
        if !resp.status().is_success() {
            return Err(VaultError::Internal(format!(
                "peer {url} unhealthy: status {}",
                resp.status()
            )));
        }
        resp.json::<PeerHealth>()
            .await
            .map_err(|e| transport_err(&url, e))
    }

    async fn info(&self) -> VaultResult<PeerNodeInfo> {
        let url = self.endpoint("/node/info");
        let resp = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;
        if !resp.status().is_success() {
            return Err(VaultError::Internal(format!(
                "peer {url} returned status {}",
                resp.status()
            )));
        }
        resp.json::<PeerNodeInfo>()
            .await
            .map_err(|e| transport_err(&url, e))
    }

    async fn fetch_proof(&self, cid: &Cid, challenge: &str) -> VaultResult<StorageProof> {
        let url = self.endpoint("/proofs/generate");
        let req = ProofRequest {
            cid: *cid,
            challenge: challenge.to_string(),
        };
        let resp = self
            .client
            .post(&url)
            .timeout(PROOF_TIMEOUT)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_err(&url, e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VaultError::BlobNotFound(cid.to_hex()));
        }
        if !resp.status().is_success() {
            return Err(VaultError::Internal(format!(
                "peer {url} returned status {}",
                resp.status()
            )));
        }
        let body = resp
            .json::<ProofResponse>()
            .await
            .map_err(|e| transport_err(&url, e))?;
        Ok(body.into_proof())
    }
}

/// Shared lookup of peers by URL, creating HTTP peers on demand.
///
/// Tests and embedded setups register their own [`Peer`] implementations;
/// anything unknown falls back to [`HttpPeer`].
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<NodeUrl, Arc<dyn Peer>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a peer under its URL.
    pub fn register(&self, peer: Arc<dyn Peer>) {
        self.peers
            .write()
            .expect("peer directory lock poisoned")
            .insert(peer.url().to_string(), peer);
    }

    /// Returns the peer for a URL, creating an [`HttpPeer`] if unknown.
    pub fn get_or_connect(&self, url: &str) -> Arc<dyn Peer> {
        if let Some(peer) = self
            .peers
            .read()
            .expect("peer directory lock poisoned")
            .get(url)
        {
            return Arc::clone(peer);
        }
        let peer: Arc<dyn Peer> = Arc::new(HttpPeer::new(url));
        self.peers
            .write()
            .expect("peer directory lock poisoned")
            .insert(url.to_string(), Arc::clone(&peer));
        peer
    }

    /// Currently known peer URLs.
    pub fn urls(&self) -> Vec<NodeUrl> {
        let mut urls: Vec<NodeUrl> = self
            .peers
            .read()
            .expect("peer directory lock poisoned")
            .keys()
            .cloned()
            .collect();
        urls.sort();
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_base64_roundtrip() {
        let encoded = encode_ciphertext(b"Hello World");
        assert_eq!(encoded, "SGVsbG8gV29ybGQ=");
        assert_eq!(decode_ciphertext(&encoded).unwrap(), b"Hello World");
    }

    #[test]
    fn malformed_base64_is_invalid_request() {
        let err = decode_ciphertext("not base64 at all!!!").unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        // Missing padding is also rejected, not silently repaired.
        let err = decode_ciphertext("SGVsbG8gV29ybGQ").unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn endpoint_join_avoids_double_slashes() {
        let peer = HttpPeer::new("http://node.vault.local:8081/");
        assert_eq!(
            peer.endpoint("/replicate"),
            "http://node.vault.local:8081/replicate"
        );
    }

    #[test]
    fn proof_response_maps_to_storage_proof() {
        let cid = crate::codec::cid(b"blob");
        let resp = ProofResponse {
            node_id: "node-1".into(),
            proof: "ab".repeat(64),
            public_key: "cd".repeat(32),
            timestamp: 12345,
            challenge: "ef".repeat(32),
            cid,
        };
        let proof = resp.clone().into_proof();
        assert_eq!(proof.cid, cid);
        assert_eq!(proof.signature, resp.proof);
        assert_eq!(proof.node_id, "node-1");
    }

    #[test]
    fn directory_creates_and_reuses_peers() {
        let dir = PeerDirectory::new();
        let a = dir.get_or_connect("http://n1");
        let b = dir.get_or_connect("http://n1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(dir.urls(), vec!["http://n1".to_string()]);
    }

    #[test]
    fn replicate_request_wire_shape() {
        let req = ReplicateRequest {
            cid: crate::codec::cid(b"x"),
            ciphertext: encode_ciphertext(b"x"),
            mime_type: "application/octet-stream".into(),
            from_peer: "http://origin".into(),
            content_type: None,
            guild_id: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"mimeType\""));
        assert!(json.contains("\"fromPeer\""));
        assert!(!json.contains("\"contentType\""));
    }
}
