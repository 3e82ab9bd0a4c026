//! Core domain types used by the vault engine.
//!
//! This module defines the strongly-typed content identifier ([`Cid`]) and
//! the metadata records that travel between the blob store, the replication
//! coordinator, the proof service, and the feed log. The goal is to avoid
//! "naked" byte buffers and stringly-typed hashes in public APIs.
//!
//! All JSON documents (on-disk metadata, proofs, HTTP bodies) use camelCase
//! field names; the structs below carry the serde renames so one type serves
//! both persistence and the wire.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VaultError;

/// Length in bytes of a content identifier (SHA-256 digest).
pub const CID_LEN: usize = 32;

/// Schema version written into freshly created blob metadata.
pub const METADATA_VERSION: u32 = 1;

/// Node identifier: opaque string derived from the node's public key.
pub type NodeId = String;

/// Peer endpoint URL, e.g. `"http://node2.vault.local:8533"`.
pub type NodeUrl = String;

/// Content identifier: SHA-256 of the ciphertext, rendered as lowercase hex.
///
/// The canonical textual form is always 64 lowercase hex characters; parsing
/// accepts uppercase input and normalizes it. Serialized as a hex string in
/// every JSON document.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Wraps a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; CID_LEN]) -> Self {
        Cid(bytes)
    }

    /// Parses a CID from its hex form, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, VaultError> {
        if s.len() != CID_LEN * 2 {
            return Err(VaultError::InvalidRequest(format!(
                "cid must be {} hex chars, got {}",
                CID_LEN * 2,
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|_| VaultError::InvalidRequest(format!("cid is not valid hex: {s}")))?;
        let mut arr = [0u8; CID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Cid(arr))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    /// Returns the canonical lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// ASCII bytes of the canonical hex form.
    ///
    /// Challenge derivation, proof signing, and selector ranking all hash
    /// the textual CID, not the raw digest.
    pub fn hex_bytes(&self) -> Vec<u8> {
        self.to_hex().into_bytes()
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_hex())
    }
}

impl FromStr for Cid {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Replication bookkeeping embedded in [`BlobMetadata`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationInfo {
    /// Peer this blob arrived from, when stored via inbound replication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_peer: Option<NodeUrl>,
    /// When the last outbound replication confirmation landed (ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_at: Option<u64>,
    /// Peers that have confirmed holding this blob.
    pub replicated_to: BTreeSet<NodeUrl>,
}

/// Access metrics embedded in [`BlobMetadata`]; best-effort, updated after
/// reads rather than inside them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlobMetrics {
    pub retrieval_count: u64,
    /// Last read, ms since epoch. Zero until the first retrieval.
    pub last_accessed: u64,
    /// Rolling average read latency in milliseconds.
    pub avg_latency: f64,
}

/// Metadata record persisted 1:1 with each blob at `meta/<cid>.json`.
///
/// `integrity_hash` is an HMAC over the identity fields keyed by the CID
/// itself, so metadata copied from another blob never verifies. Records
/// written before hashing was introduced have no hash and verify as
/// `legacy_no_hash`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub cid: Cid,
    pub size: u64,
    pub mime_type: String,
    /// Creation time, ms since epoch.
    pub created_at: u64,
    /// Metadata schema version.
    pub version: u32,
    /// Whether the at-rest blob file is gzip-framed.
    pub compressed: bool,
    /// Pinned blobs are never garbage-collection candidates.
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub replication: ReplicationInfo,
    #[serde(default)]
    pub metrics: BlobMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
}

/// Per-CID replication progress owned by the coordinator.
///
/// `complete` holds exactly when `confirmed_nodes` has reached the
/// replication factor; `integrity_hash` is an HMAC over the sorted member
/// set plus the other fields, so it is invariant under permutation of the
/// confirmations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationState {
    pub cid: Cid,
    pub replication_factor: usize,
    pub confirmed_nodes: BTreeSet<NodeUrl>,
    pub complete: bool,
    pub integrity_hash: String,
}

/// Ed25519 proof that a node held a blob during a given hour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProof {
    pub cid: Cid,
    pub node_id: NodeId,
    /// Seconds since epoch at signing time.
    pub timestamp: u64,
    /// Hex SHA-256 over the CID and the hour bucket.
    pub challenge: String,
    /// Hex Ed25519 signature over the proof digest.
    pub signature: String,
    /// Hex Ed25519 public key of the signer.
    pub public_key: String,
}

/// Category of a feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Dm,
    Post,
    Listing,
    Activity,
}

/// One signed event in a feed: a CID reference linked to its parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub feed_id: String,
    pub cid: Cid,
    pub parent_cid: Option<Cid>,
    /// Hex Ed25519 public key of the author; must be in the writer set.
    pub author_key: String,
    /// Author-supplied time, ms since epoch.
    pub timestamp: u64,
    /// Hex Ed25519 signature over the canonical entry JSON.
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

/// Mutable per-feed header tracked by the feed log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetadata {
    pub feed_id: String,
    pub feed_type: FeedType,
    /// Hex public keys allowed to append.
    pub writers: Vec<String>,
    /// CID of the first accepted entry; set once and never changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cid: Option<Cid>,
    pub entry_count: u64,
    pub created_at: u64,
    pub last_updated_at: u64,
}

/// Classification of an indexed blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexEntryType {
    Message,
    Post,
    Comment,
    Attachment,
}

/// One row in the in-memory indexes. Never carries plaintext; `thread_id`
/// is a caller-supplied opaque hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub cid: Cid,
    #[serde(rename = "type")]
    pub entry_type: IndexEntryType,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_cid: Option<Cid>,
    /// Index time, ms since epoch.
    pub timestamp: u64,
    pub size: u64,
}

/// Inclusive shard range `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: u32,
    pub end: u32,
}

/// A node's slice of the shard space: either explicit ids or ranges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardAssignment {
    Explicit(BTreeSet<u32>),
    Ranges(Vec<ShardRange>),
}

impl ShardAssignment {
    /// Membership test for a shard id.
    pub fn contains(&self, shard: u32) -> bool {
        match self {
            ShardAssignment::Explicit(set) => set.contains(&shard),
            ShardAssignment::Ranges(ranges) => {
                ranges.iter().any(|r| shard >= r.start && shard <= r.end)
            }
        }
    }

    /// All shard ids covered by this assignment.
    pub fn shard_ids(&self) -> Vec<u32> {
        match self {
            ShardAssignment::Explicit(set) => set.iter().copied().collect(),
            ShardAssignment::Ranges(ranges) => {
                let mut ids = Vec::new();
                for r in ranges {
                    for s in r.start..=r.end {
                        ids.push(s);
                    }
                }
                ids.sort_unstable();
                ids.dedup();
                ids
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn unix_secs() -> u64 {
    unix_millis() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_parse_normalizes_case() {
        let lower = "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e";
        let upper = lower.to_uppercase();

        let a = Cid::parse(lower).expect("lowercase parses");
        let b = Cid::parse(&upper).expect("uppercase parses");

        assert_eq!(a, b);
        assert_eq!(a.to_hex(), lower);
    }

    #[test]
    fn cid_parse_rejects_bad_input() {
        assert!(Cid::parse("abc").is_err());
        assert!(Cid::parse(&"z".repeat(64)).is_err());
    }

    #[test]
    fn cid_serializes_as_hex_string() {
        let hexstr = "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e";
        let cid = Cid::parse(hexstr).unwrap();
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(json, format!("\"{hexstr}\""));

        let back: Cid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cid);
    }

    #[test]
    fn shard_assignment_ranges_and_sets_agree() {
        let ranges = ShardAssignment::Ranges(vec![
            ShardRange { start: 0, end: 3 },
            ShardRange { start: 10, end: 10 },
        ]);
        let explicit =
            ShardAssignment::Explicit([0u32, 1, 2, 3, 10].into_iter().collect());

        for shard in 0..12 {
            assert_eq!(
                ranges.contains(shard),
                explicit.contains(shard),
                "disagreement at shard {shard}"
            );
        }
        assert_eq!(ranges.shard_ids(), explicit.shard_ids());
    }

    #[test]
    fn shard_assignment_deserializes_both_forms() {
        let set: ShardAssignment = serde_json::from_str("[1, 2, 3]").unwrap();
        assert!(set.contains(2));
        assert!(!set.contains(4));

        let ranges: ShardAssignment =
            serde_json::from_str(r#"[{"start": 0, "end": 7}]"#).unwrap();
        assert!(ranges.contains(7));
        assert!(!ranges.contains(8));
    }

    #[test]
    fn metadata_json_uses_camel_case() {
        let meta = BlobMetadata {
            cid: Cid::from_bytes([7u8; CID_LEN]),
            size: 42,
            mime_type: "application/json".into(),
            created_at: 1_700_000_000_000,
            version: METADATA_VERSION,
            compressed: false,
            pinned: true,
            app_id: None,
            content_type: None,
            sender: None,
            timestamp: None,
            replication: ReplicationInfo::default(),
            metrics: BlobMetrics::default(),
            integrity_hash: Some("00".into()),
        };

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"mimeType\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"integrityHash\""));
        assert!(!json.contains("\"appId\""), "None options are omitted");

        let back: BlobMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
