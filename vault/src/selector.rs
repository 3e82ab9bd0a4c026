//! Deterministic replica selection.
//!
//! Placement must be reproducible on every node that looks at the same
//! candidate set, so selection is a pure function: filter (explicit
//! exclusions, minimum reputation, shard responsibility), then rank by
//! `SHA-256(cid ":" nodeId)` ascending and take the first k. The hash
//! ranking spreads load uniformly over random CIDs while staying stable
//! when unrelated nodes join.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::reputation::NEUTRAL_SCORE;
use crate::shard;
use crate::types::{NodeId, NodeUrl, ShardAssignment};

/// Nodes scoring below this are never selected.
pub const MIN_REPUTATION: f64 = 200.0;

/// A node eligible for placement decisions.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateNode {
    pub node_id: NodeId,
    pub url: NodeUrl,
    /// Reputation score; `None` ranks at the neutral default.
    pub score: Option<f64>,
    /// Shard slice this node serves; `None` means it stores everything.
    pub shards: Option<ShardAssignment>,
}

impl CandidateNode {
    /// Effective score used for filtering and ranking.
    pub fn effective_score(&self) -> f64 {
        self.score.unwrap_or(NEUTRAL_SCORE)
    }
}

/// Why a candidate was not selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Caller listed the node in the exclusion set.
    Excluded,
    /// Score below [`MIN_REPUTATION`].
    LowReputation,
    /// Node's shard assignment does not cover this CID.
    NotResponsible,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::Excluded => "excluded",
            ExclusionReason::LowReputation => "low-reputation",
            ExclusionReason::NotResponsible => "not-responsible",
        }
    }
}

/// One filtered-out candidate with its reason.
#[derive(Clone, Debug, PartialEq)]
pub struct ExcludedCandidate {
    pub node_id: NodeId,
    pub reason: ExclusionReason,
}

/// Result of a selection round.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Chosen replicas in rank order.
    pub selected: Vec<CandidateNode>,
    /// Everyone filtered out, with reasons.
    pub excluded: Vec<ExcludedCandidate>,
}

/// Picks up to `k` replicas for `cid` from `candidates`.
///
/// `shard_count` enables the shard-responsibility filter for candidates
/// that carry an assignment; candidates without one always pass it.
/// Deterministic: identical inputs yield identical output order.
pub fn select_nodes(
    cid: &str,
    candidates: &[CandidateNode],
    k: usize,
    excluded: &HashSet<NodeId>,
    shard_count: Option<u32>,
) -> Selection {
    let mut eligible: Vec<&CandidateNode> = Vec::with_capacity(candidates.len());
    let mut rejected: Vec<ExcludedCandidate> = Vec::new();

    for node in candidates {
        if excluded.contains(&node.node_id) {
            rejected.push(ExcludedCandidate {
                node_id: node.node_id.clone(),
                reason: ExclusionReason::Excluded,
            });
            continue;
        }
        if node.effective_score() < MIN_REPUTATION {
            rejected.push(ExcludedCandidate {
                node_id: node.node_id.clone(),
                reason: ExclusionReason::LowReputation,
            });
            continue;
        }
        if let (Some(n), Some(assignment)) = (shard_count, node.shards.as_ref()) {
            if !shard::responsible(shard::shard_key(cid, n), assignment) {
                rejected.push(ExcludedCandidate {
                    node_id: node.node_id.clone(),
                    reason: ExclusionReason::NotResponsible,
                });
                continue;
            }
        }
        eligible.push(node);
    }

    eligible.sort_by_key(|node| placement_rank(cid, &node.node_id));

    Selection {
        selected: eligible.into_iter().take(k).cloned().collect(),
        excluded: rejected,
    }
}

/// Re-selection after failures: same algorithm with the already-confirmed
/// and failed nodes added to the exclusion set.
pub fn select_replacements(
    cid: &str,
    candidates: &[CandidateNode],
    k: usize,
    current: &HashSet<NodeId>,
    failed: &HashSet<NodeId>,
    shard_count: Option<u32>,
) -> Selection {
    let mut excluded: HashSet<NodeId> = current.clone();
    excluded.extend(failed.iter().cloned());
    select_nodes(cid, candidates, k, &excluded, shard_count)
}

/// Sorts candidates by reputation, best first. Unset scores rank neutral.
pub fn rank_by_reputation(candidates: &[CandidateNode]) -> Vec<CandidateNode> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        b.effective_score()
            .partial_cmp(&a.effective_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    ranked
}

fn placement_rank(cid: &str, node_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cid.as_bytes());
    hasher.update(b":");
    hasher.update(node_id.as_bytes());
    hasher.finalize().into()
}
