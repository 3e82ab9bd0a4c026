//! Horizontal sharding of the CID space.
//!
//! The shard of a CID is the big-endian integer of its first 6 digest bytes
//! modulo the shard count. CIDs are already SHA-256 outputs, so the prefix
//! is uniformly distributed and a fixed-size prefix keeps the computation
//! cheap and deterministic across nodes. Inputs that are not hex (opaque
//! ids routed through the same placement code) fall back to hashing the
//! string itself first.

use sha2::{Digest, Sha256};

use crate::types::ShardAssignment;

/// Number of leading digest bytes that feed the shard key.
const SHARD_PREFIX_BYTES: usize = 6;

/// Maps an identifier to its shard in `[0, shard_count)`.
pub fn shard_key(id: &str, shard_count: u32) -> u32 {
    let n = u64::from(shard_count.max(1));
    let prefix = match hex_prefix(id) {
        Some(bytes) => bytes,
        None => {
            let digest = Sha256::digest(id.as_bytes());
            let mut bytes = [0u8; SHARD_PREFIX_BYTES];
            bytes.copy_from_slice(&digest[..SHARD_PREFIX_BYTES]);
            bytes
        }
    };
    (be_uint(&prefix) % n) as u32
}

/// Whether the given assignment covers a shard.
pub fn responsible(shard: u32, assignment: &ShardAssignment) -> bool {
    assignment.contains(shard)
}

/// Whether this node should store a blob, per its local assignment.
///
/// A node without an assignment stores everything (unsharded deployment).
pub fn should_store(cid: &str, shard_count: u32, assignment: Option<&ShardAssignment>) -> bool {
    match assignment {
        Some(a) => responsible(shard_key(cid, shard_count), a),
        None => true,
    }
}

/// Coverage statistics over the union of all known node assignments.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDistribution {
    pub shard_count: u32,
    /// Shards claimed by at least one node.
    pub covered_shards: u32,
    /// `covered_shards / shard_count` in `[0, 1]`.
    pub coverage: f64,
    pub avg_shards_per_node: f64,
    pub min_shards_per_node: u32,
    pub max_shards_per_node: u32,
}

/// Computes distribution stats for a set of node assignments.
pub fn distribution(shard_count: u32, assignments: &[ShardAssignment]) -> ShardDistribution {
    let shard_count = shard_count.max(1);
    let mut covered = vec![false; shard_count as usize];
    let mut per_node: Vec<u32> = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let mut owned = 0u32;
        for shard in assignment.shard_ids() {
            if shard < shard_count {
                covered[shard as usize] = true;
                owned += 1;
            }
        }
        per_node.push(owned);
    }

    let covered_shards = covered.iter().filter(|c| **c).count() as u32;
    let (avg, min, max) = if per_node.is_empty() {
        (0.0, 0, 0)
    } else {
        let total: u32 = per_node.iter().sum();
        (
            f64::from(total) / per_node.len() as f64,
            *per_node.iter().min().unwrap_or(&0),
            *per_node.iter().max().unwrap_or(&0),
        )
    };

    ShardDistribution {
        shard_count,
        covered_shards,
        coverage: f64::from(covered_shards) / f64::from(shard_count),
        avg_shards_per_node: avg,
        min_shards_per_node: min,
        max_shards_per_node: max,
    }
}

fn hex_prefix(id: &str) -> Option<[u8; SHARD_PREFIX_BYTES]> {
    let prefix = id.get(..SHARD_PREFIX_BYTES * 2)?;
    let decoded = hex::decode(prefix).ok()?;
    let mut bytes = [0u8; SHARD_PREFIX_BYTES];
    bytes.copy_from_slice(&decoded);
    Some(bytes)
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
