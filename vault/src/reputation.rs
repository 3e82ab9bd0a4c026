//! Event-weighted node reputation with time decay.
//!
//! Every interaction outcome (proof served, blob missing, bad signature...)
//! appends a typed event to the node's record. The score is derived on
//! demand, never stored:
//!
//! ```text
//! score(node, now) = clamp(0, 1000, 500 + Σ weight(e) · exp(−Δ/τ))
//! ```
//!
//! τ is 14 days, so a single event has visibly less influence after a
//! month than on the day it happened. Unknown nodes score the neutral 500.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::types::{Cid, NodeId, unix_millis};

/// Neutral score assigned before any events are known.
pub const NEUTRAL_SCORE: f64 = 500.0;

/// Decay time constant: 14 days in milliseconds.
const DECAY_TAU_MS: f64 = 14.0 * 24.0 * 3600.0 * 1000.0;

/// Events kept per node; the oldest fall off beyond this.
const MAX_EVENTS_PER_NODE: usize = 1024;

/// Outcome categories and their base weights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReputationEventType {
    ProofSuccess,
    BlobAvailable,
    UptimePing,
    ProofFailure,
    BlobMissing,
    BlobCorrupted,
    InvalidSignature,
}

impl ReputationEventType {
    /// Signed base weight applied before decay.
    pub fn weight(self) -> f64 {
        match self {
            ReputationEventType::ProofSuccess => 20.0,
            ReputationEventType::BlobAvailable => 10.0,
            ReputationEventType::UptimePing => 5.0,
            ReputationEventType::ProofFailure => -50.0,
            ReputationEventType::BlobMissing => -30.0,
            ReputationEventType::BlobCorrupted => -100.0,
            ReputationEventType::InvalidSignature => -80.0,
        }
    }
}

/// One recorded outcome.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationEvent {
    #[serde(rename = "type")]
    pub event_type: ReputationEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<Cid>,
    /// Ms since epoch.
    pub timestamp: u64,
    pub weight: f64,
}

#[derive(Clone, Debug)]
struct NodeRecord {
    events: Vec<ReputationEvent>,
    first_seen: u64,
    last_seen: u64,
}

/// Score entry in a [`ReputationSnapshot`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeScore {
    pub node_id: NodeId,
    pub score: f64,
}

/// Point-in-time view over all known nodes.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationSnapshot {
    pub nodes: Vec<NodeScore>,
    pub total_events: usize,
    pub unique_nodes: usize,
    pub avg_score: f64,
}

/// Append-only reputation ledger guarded by a single mutex.
#[derive(Default)]
pub struct ReputationTracker {
    nodes: Mutex<HashMap<NodeId, NodeRecord>>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event with the type's base weight.
    pub fn record(&self, node_id: &str, event_type: ReputationEventType, cid: Option<Cid>) {
        self.record_at(node_id, event_type, cid, unix_millis());
    }

    /// Appends an event at an explicit timestamp (ms since epoch).
    pub fn record_at(
        &self,
        node_id: &str,
        event_type: ReputationEventType,
        cid: Option<Cid>,
        timestamp: u64,
    ) {
        let event = ReputationEvent {
            event_type,
            cid,
            timestamp,
            weight: event_type.weight(),
        };

        let mut nodes = self.nodes.lock().expect("reputation mutex poisoned");
        let record = nodes.entry(node_id.to_string()).or_insert_with(|| NodeRecord {
            events: Vec::new(),
            first_seen: timestamp,
            last_seen: timestamp,
        });
        record.last_seen = record.last_seen.max(timestamp);
        record.events.push(event);
        if record.events.len() > MAX_EVENTS_PER_NODE {
            let excess = record.events.len() - MAX_EVENTS_PER_NODE;
            record.events.drain(..excess);
        }
    }

    /// Positive outcome shorthand.
    pub fn apply_reward(&self, node_id: &str, event_type: ReputationEventType, cid: Option<Cid>) {
        debug_assert!(event_type.weight() > 0.0);
        self.record(node_id, event_type, cid);
    }

    /// Negative outcome shorthand.
    pub fn apply_penalty(&self, node_id: &str, event_type: ReputationEventType, cid: Option<Cid>) {
        debug_assert!(event_type.weight() < 0.0);
        self.record(node_id, event_type, cid);
    }

    /// Derived score at the current wall clock.
    pub fn score(&self, node_id: &str) -> f64 {
        self.score_at(node_id, unix_millis())
    }

    /// Derived score at an explicit time (ms since epoch).
    pub fn score_at(&self, node_id: &str, now: u64) -> f64 {
        let nodes = self.nodes.lock().expect("reputation mutex poisoned");
        let Some(record) = nodes.get(node_id) else {
            return NEUTRAL_SCORE;
        };

        let sum: f64 = record
            .events
            .iter()
            .map(|e| {
                let age_ms = now.saturating_sub(e.timestamp) as f64;
                e.weight * (-age_ms / DECAY_TAU_MS).exp()
            })
            .sum();

        (NEUTRAL_SCORE + sum).clamp(0.0, 1000.0)
    }

    /// Scores for every known node plus summary numbers.
    pub fn snapshot(&self) -> ReputationSnapshot {
        let now = unix_millis();
        let nodes = self.nodes.lock().expect("reputation mutex poisoned");

        let mut scores: Vec<NodeScore> = Vec::with_capacity(nodes.len());
        let mut total_events = 0usize;
        for (node_id, record) in nodes.iter() {
            total_events += record.events.len();
            let sum: f64 = record
                .events
                .iter()
                .map(|e| {
                    let age_ms = now.saturating_sub(e.timestamp) as f64;
                    e.weight * (-age_ms / DECAY_TAU_MS).exp()
                })
                .sum();
            scores.push(NodeScore {
                node_id: node_id.clone(),
                score: (NEUTRAL_SCORE + sum).clamp(0.0, 1000.0),
            });
        }
        scores.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let unique_nodes = scores.len();
        let avg_score = if unique_nodes == 0 {
            NEUTRAL_SCORE
        } else {
            scores.iter().map(|s| s.score).sum::<f64>() / unique_nodes as f64
        };

        ReputationSnapshot {
            nodes: scores,
            total_events,
            unique_nodes,
            avg_score,
        }
    }
}
