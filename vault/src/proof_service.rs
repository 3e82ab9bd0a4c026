//! Storage-proof service: challenge → signed proof, retention, cleanup.
//!
//! Owns the node keypair (`node-key.json`) and the `proofs/` directory.
//! Every generated proof is persisted as `proofs/<cid>-<hourTs>.json` so
//! auditors can replay what this node attested to, and old snapshots are
//! swept out after a retention window.
//!
//! Proof outcomes feed the reputation tracker: serving a proof is a reward
//! event for this node, failing to serve one is a penalty.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::crypto::{self, NodeKeypair};
use crate::error::{VaultError, VaultResult};
use crate::reputation::{ReputationEventType, ReputationTracker};
use crate::store::BlobStore;
use crate::types::{Cid, NodeId, StorageProof, unix_secs};

const KEY_FILE: &str = "node-key.json";
const PROOFS_DIR: &str = "proofs";

/// Default retention for persisted proof snapshots, in hours.
pub const DEFAULT_PROOF_RETENTION_HOURS: u64 = 24;

/// Generates and verifies possession proofs for locally stored blobs.
pub struct ProofService {
    keypair: NodeKeypair,
    node_id: NodeId,
    store: Arc<BlobStore>,
    proofs_dir: PathBuf,
    reputation: Arc<ReputationTracker>,
}

impl ProofService {
    /// Loads (or generates) the node keypair and prepares the proofs dir.
    pub fn new(
        store: Arc<BlobStore>,
        reputation: Arc<ReputationTracker>,
        configured_node_id: Option<String>,
    ) -> VaultResult<Self> {
        let keypair = NodeKeypair::load_or_generate(&store.data_dir().join(KEY_FILE))?;
        let node_id =
            configured_node_id.unwrap_or_else(|| keypair.public_key_hex().to_string());

        let proofs_dir = store.data_dir().join(PROOFS_DIR);
        fs::create_dir_all(&proofs_dir)?;

        Ok(Self {
            keypair,
            node_id,
            store,
            proofs_dir,
            reputation,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn public_key_hex(&self) -> &str {
        self.keypair.public_key_hex()
    }

    /// The challenge this node would expect for `cid` right now.
    pub fn current_challenge(&self, cid: &Cid) -> String {
        crypto::derive_challenge(cid, unix_secs())
    }

    /// Signs a possession proof over the supplied challenge.
    ///
    /// Requires the blob to exist locally; a miss is recorded as a
    /// reputation penalty against this node before failing.
    pub fn generate_proof(&self, cid: &Cid, challenge: &str) -> VaultResult<StorageProof> {
        if !self.store.has_blob(cid) {
            self.reputation.apply_penalty(
                &self.node_id,
                ReputationEventType::ProofFailure,
                Some(*cid),
            );
            return Err(VaultError::BlobNotFound(cid.to_hex()));
        }

        let timestamp = unix_secs();
        let proof = crypto::sign_proof(&self.keypair, cid, &self.node_id, challenge, timestamp);

        if let Err(e) = self.persist(&proof) {
            // Persistence is for auditability; the proof itself is valid.
            tracing::warn!(%cid, error = %e, "failed to persist proof snapshot");
        }

        self.reputation.apply_reward(
            &self.node_id,
            ReputationEventType::ProofSuccess,
            Some(*cid),
        );
        Ok(proof)
    }

    /// Verifies a proof, optionally against an expected public key.
    pub fn verify_proof(
        proof: &StorageProof,
        expected_public_key: Option<&str>,
    ) -> VaultResult<()> {
        crypto::verify_proof(proof, expected_public_key, unix_secs())
    }

    /// Deletes persisted proofs older than the retention window.
    ///
    /// Returns how many snapshot files were removed.
    pub fn cleanup_old_proofs(&self, retention_hours: u64) -> VaultResult<usize> {
        let cutoff = unix_secs().saturating_sub(retention_hours * 3600);
        let mut removed = 0usize;

        for entry in fs::read_dir(&self.proofs_dir)?.flatten() {
            let name = entry.file_name();
            let Some(hour_ts) = parse_proof_filename(name.to_str().unwrap_or_default()) else {
                continue;
            };
            if hour_ts < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(file = ?name, error = %e, "failed to remove old proof")
                    }
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, retention_hours, "cleaned up old proof snapshots");
        }
        Ok(removed)
    }

    fn persist(&self, proof: &StorageProof) -> VaultResult<()> {
        let hour_ts = crypto::hour_bucket(proof.timestamp);
        let path = self.proofs_dir.join(format!("{}-{hour_ts}.json", proof.cid));
        let json = serde_json::to_string_pretty(proof)
            .map_err(|e| VaultError::Internal(format!("serialize proof: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Extracts the hour timestamp from a `<cid>-<hourTs>.json` filename.
fn parse_proof_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".json")?;
    let (_cid, hour_ts) = stem.rsplit_once('-')?;
    hour_ts.parse().ok()
}
