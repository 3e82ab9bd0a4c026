//! CID computation and HMAC integrity codec.
//!
//! Two concerns live here:
//!
//! - deriving and checking content identifiers (`cid`, `verify_cid`),
//! - tamper-evident hashes for blob metadata and replication state
//!   (`meta_hash`, `verify_meta`, `replication_state_hash`).
//!
//! The integrity HMACs are keyed by the CID itself (`"vault-meta-" + cid`),
//! which binds each metadata record to its blob: a hash lifted from another
//! CID's metadata can never verify.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::types::{BlobMetadata, Cid, ReplicationState};

type HmacSha256 = Hmac<Sha256>;

/// Key prefix for blob-metadata HMACs.
const META_KEY_PREFIX: &str = "vault-meta-";

/// Key prefix for replication-state HMACs.
const REPL_KEY_PREFIX: &str = "vault-repl-";

/// Computes the content identifier of a ciphertext.
pub fn cid(ciphertext: &[u8]) -> Cid {
    let digest = Sha256::digest(ciphertext);
    Cid::from_bytes(digest.into())
}

/// Checks a hex CID against a ciphertext, case-insensitively.
pub fn verify_cid(declared: &str, ciphertext: &[u8]) -> bool {
    match Cid::parse(declared) {
        Ok(parsed) => parsed == cid(ciphertext),
        Err(_) => false,
    }
}

fn hmac_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC over the identity fields of a metadata record.
///
/// Input layout: `cid|size|mimeType|createdAt|pinned`, keyed by
/// `"vault-meta-" + cid`.
pub fn meta_hash(cid: &Cid, size: u64, mime_type: &str, created_at: u64, pinned: bool) -> String {
    let key = format!("{META_KEY_PREFIX}{cid}");
    let data = format!("{cid}|{size}|{mime_type}|{created_at}|{pinned}");
    hmac_hex(key.as_bytes(), data.as_bytes())
}

/// Outcome of verifying a metadata record's integrity hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaVerdict {
    /// Hash present and correct.
    Ok,
    /// Record predates integrity hashing; nothing to check.
    LegacyNoHash,
    /// Hash present but wrong: the record was mutated in place.
    HashMismatch,
}

impl MetaVerdict {
    /// True unless the record demonstrably fails verification.
    pub fn valid(&self) -> bool {
        !matches!(self, MetaVerdict::HashMismatch)
    }
}

/// Recomputes a metadata record's HMAC and compares it to the stored one.
pub fn verify_meta(meta: &BlobMetadata) -> MetaVerdict {
    let Some(stored) = meta.integrity_hash.as_deref() else {
        return MetaVerdict::LegacyNoHash;
    };
    let expected = meta_hash(
        &meta.cid,
        meta.size,
        &meta.mime_type,
        meta.created_at,
        meta.pinned,
    );
    if constant_time_str_eq(stored, &expected) {
        MetaVerdict::Ok
    } else {
        MetaVerdict::HashMismatch
    }
}

/// HMAC over a replication state.
///
/// The confirmed-node set is serialized in sorted order, so the hash is
/// invariant under permutation of confirmations.
pub fn replication_state_hash(
    cid: &Cid,
    replication_factor: usize,
    confirmed_nodes: &std::collections::BTreeSet<String>,
    complete: bool,
) -> String {
    let key = format!("{REPL_KEY_PREFIX}{cid}");
    let nodes: Vec<&str> = confirmed_nodes.iter().map(String::as_str).collect();
    let data = format!(
        "{cid}|{replication_factor}|{}|{complete}",
        nodes.join(",")
    );
    hmac_hex(key.as_bytes(), data.as_bytes())
}

/// Recomputes a replication state's HMAC and compares it to the stored one.
pub fn verify_replication_state(state: &ReplicationState) -> bool {
    let expected = replication_state_hash(
        &state.cid,
        state.replication_factor,
        &state.confirmed_nodes,
        state.complete,
    );
    constant_time_str_eq(&state.integrity_hash, &expected)
}

// Comparison over full length regardless of where the first difference is.
fn constant_time_str_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BlobMetrics, CID_LEN, METADATA_VERSION, ReplicationInfo,
    };
    use std::collections::BTreeSet;

    const HELLO_WORLD_CID: &str =
        "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e";

    fn meta_for(cid: Cid) -> BlobMetadata {
        let integrity = meta_hash(&cid, 11, "application/octet-stream", 1_700_000_000_000, false);
        BlobMetadata {
            cid,
            size: 11,
            mime_type: "application/octet-stream".into(),
            created_at: 1_700_000_000_000,
            version: METADATA_VERSION,
            compressed: false,
            pinned: false,
            app_id: None,
            content_type: None,
            sender: None,
            timestamp: None,
            replication: ReplicationInfo::default(),
            metrics: BlobMetrics::default(),
            integrity_hash: Some(integrity),
        }
    }

    #[test]
    fn hello_world_cid_matches_known_digest() {
        let computed = cid(b"Hello World");
        assert_eq!(computed.to_hex(), HELLO_WORLD_CID);
    }

    #[test]
    fn verify_cid_is_case_insensitive() {
        assert!(verify_cid(HELLO_WORLD_CID, b"Hello World"));
        assert!(verify_cid(&HELLO_WORLD_CID.to_uppercase(), b"Hello World"));
    }

    #[test]
    fn single_bit_flip_breaks_verification() {
        let mut data = b"Hello World".to_vec();
        data[0] ^= 0x01;
        assert!(!verify_cid(HELLO_WORLD_CID, &data));
    }

    #[test]
    fn verify_cid_rejects_garbage_strings() {
        assert!(!verify_cid("not-a-cid", b"Hello World"));
    }

    #[test]
    fn fresh_metadata_verifies_ok() {
        let meta = meta_for(cid(b"Hello World"));
        assert_eq!(verify_meta(&meta), MetaVerdict::Ok);
        assert!(verify_meta(&meta).valid());
    }

    #[test]
    fn mutated_mime_type_is_detected() {
        let mut meta = meta_for(cid(b"Hello World"));
        meta.mime_type = "image/png".into();
        assert_eq!(verify_meta(&meta), MetaVerdict::HashMismatch);
        assert!(!verify_meta(&meta).valid());
    }

    #[test]
    fn mutated_pinned_flag_is_detected() {
        let mut meta = meta_for(cid(b"Hello World"));
        meta.pinned = true;
        assert_eq!(verify_meta(&meta), MetaVerdict::HashMismatch);
    }

    #[test]
    fn missing_hash_is_legacy_not_failure() {
        let mut meta = meta_for(cid(b"Hello World"));
        meta.integrity_hash = None;
        assert_eq!(verify_meta(&meta), MetaVerdict::LegacyNoHash);
        assert!(verify_meta(&meta).valid());
    }

    #[test]
    fn meta_hash_is_bound_to_the_cid() {
        let a = cid(b"blob a");
        let b = cid(b"blob b");
        let hash_a = meta_hash(&a, 5, "application/json", 1, false);
        let hash_b = meta_hash(&b, 5, "application/json", 1, false);
        assert_ne!(hash_a, hash_b, "same fields under different cids must differ");
    }

    #[test]
    fn replication_state_hash_is_permutation_invariant() {
        let c = Cid::from_bytes([9u8; CID_LEN]);
        let forward: BTreeSet<String> = ["http://a", "http://b", "http://c"]
            .into_iter()
            .map(String::from)
            .collect();
        // BTreeSet sorts internally, so inserting in any order gives the
        // same serialized member list.
        let reversed: BTreeSet<String> = ["http://c", "http://b", "http://a"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            replication_state_hash(&c, 3, &forward, true),
            replication_state_hash(&c, 3, &reversed, true)
        );
    }

    #[test]
    fn replication_state_roundtrip_verifies() {
        let c = Cid::from_bytes([3u8; CID_LEN]);
        let nodes: BTreeSet<String> =
            ["http://n1", "http://n2"].into_iter().map(String::from).collect();
        let hash = replication_state_hash(&c, 2, &nodes, true);
        let state = ReplicationState {
            cid: c,
            replication_factor: 2,
            confirmed_nodes: nodes,
            complete: true,
            integrity_hash: hash,
        };
        assert!(verify_replication_state(&state));

        let mut tampered = state.clone();
        tampered.confirmed_nodes.insert("http://evil".into());
        assert!(!verify_replication_state(&tampered));
    }
}
