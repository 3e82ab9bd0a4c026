//! Ed25519 node identity and storage-proof primitives.
//!
//! A node owns exactly one keypair, generated on first start and persisted
//! at `node-key.json`. Everything that hashes a CID here hashes its ASCII
//! hex form, matching what goes over the wire.
//!
//! Proof protocol:
//!
//! - `challenge = SHA-256(cid ‖ ascii(hour_bucket))` where `hour_bucket`
//!   is the timestamp floored to the hour,
//! - `signature = Ed25519(SHA-256(cid ‖ challenge ‖ nodeId))`,
//! - a proof is fresh iff `−300 s ≤ now − timestamp ≤ 3600 s`.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};
use crate::types::{Cid, StorageProof, unix_millis};

/// Maximum age of a fresh proof, in seconds.
pub const PROOF_MAX_AGE_SECS: u64 = 3600;

/// Allowed clock skew into the future, in seconds.
pub const PROOF_MAX_SKEW_SECS: u64 = 300;

/// On-disk layout of `node-key.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedKey {
    public_key: String,
    private_key: String,
    /// Ms since epoch when the key was generated.
    generated: u64,
}

/// The node's Ed25519 identity.
pub struct NodeKeypair {
    signing: SigningKey,
    public_hex: String,
    generated: u64,
}

impl NodeKeypair {
    /// Loads the keypair from `path`, generating and persisting a fresh one
    /// on first run.
    pub fn load_or_generate(path: &Path) -> VaultResult<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let persisted: PersistedKey = serde_json::from_str(&raw).map_err(|e| {
                VaultError::Internal(format!("node key file {} is corrupt: {e}", path.display()))
            })?;
            let secret = hex_to_array::<32>(&persisted.private_key)
                .ok_or_else(|| VaultError::Internal("node key: bad private key hex".into()))?;
            let signing = SigningKey::from_bytes(&secret);
            let public_hex = hex::encode(signing.verifying_key().to_bytes());
            if public_hex != persisted.public_key.to_lowercase() {
                return Err(VaultError::Internal(
                    "node key: public key does not match private key".into(),
                ));
            }
            return Ok(Self {
                signing,
                public_hex,
                generated: persisted.generated,
            });
        }

        let signing = SigningKey::generate(&mut OsRng);
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        let generated = unix_millis();
        let persisted = PersistedKey {
            public_key: public_hex.clone(),
            private_key: hex::encode(signing.to_bytes()),
            generated,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| VaultError::Internal(format!("serialize node key: {e}")))?;
        fs::write(path, json)?;
        tracing::info!(path = %path.display(), "generated fresh node keypair");

        Ok(Self {
            signing,
            public_hex,
            generated,
        })
    }

    /// Builds a keypair from raw secret bytes (tests, embedded setups).
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&secret);
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        Self {
            signing,
            public_hex,
            generated: unix_millis(),
        }
    }

    /// Hex form of the public key.
    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// Ms timestamp of key generation.
    pub fn generated_at(&self) -> u64 {
        self.generated
    }

    /// Signs an arbitrary message, returning the hex signature.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

/// Floors a seconds timestamp to its hour bucket.
pub fn hour_bucket(timestamp_secs: u64) -> u64 {
    (timestamp_secs / 3600) * 3600
}

/// Derives the hex challenge for a CID at a point in time.
pub fn derive_challenge(cid: &Cid, timestamp_secs: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cid.hex_bytes());
    hasher.update(hour_bucket(timestamp_secs).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// The digest a storage proof signs.
pub fn proof_digest(cid: &Cid, challenge: &str, node_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cid.hex_bytes());
    hasher.update(challenge.as_bytes());
    hasher.update(node_id.as_bytes());
    hasher.finalize().into()
}

/// Signs a storage proof for a blob this node holds.
pub fn sign_proof(
    keypair: &NodeKeypair,
    cid: &Cid,
    node_id: &str,
    challenge: &str,
    timestamp_secs: u64,
) -> StorageProof {
    let digest = proof_digest(cid, challenge, node_id);
    StorageProof {
        cid: *cid,
        node_id: node_id.to_string(),
        timestamp: timestamp_secs,
        challenge: challenge.to_string(),
        signature: keypair.sign_hex(&digest),
        public_key: keypair.public_key_hex().to_string(),
    }
}

/// Verifies a storage proof: signature first, then freshness.
///
/// When `expected_public_key` is given, the proof must carry exactly that
/// key; otherwise the embedded key is used.
pub fn verify_proof(
    proof: &StorageProof,
    expected_public_key: Option<&str>,
    now_secs: u64,
) -> VaultResult<()> {
    let key_hex = match expected_public_key {
        Some(expected) => {
            if !expected.eq_ignore_ascii_case(&proof.public_key) {
                return Err(VaultError::InvalidSignature(
                    "proof public key does not match expected key".into(),
                ));
            }
            expected
        }
        None => proof.public_key.as_str(),
    };

    let digest = proof_digest(&proof.cid, &proof.challenge, &proof.node_id);
    verify_detached(&digest, &proof.signature, key_hex)?;

    if now_secs.saturating_sub(proof.timestamp) > PROOF_MAX_AGE_SECS {
        return Err(VaultError::ProofStale(format!(
            "proof is {} s old",
            now_secs - proof.timestamp
        )));
    }
    if proof.timestamp.saturating_sub(now_secs) > PROOF_MAX_SKEW_SECS {
        return Err(VaultError::ProofInFuture(format!(
            "proof is {} s ahead of local clock",
            proof.timestamp - now_secs
        )));
    }
    Ok(())
}

/// Verifies a detached hex Ed25519 signature over a message.
pub fn verify_detached(message: &[u8], signature_hex: &str, public_key_hex: &str) -> VaultResult<()> {
    let key_bytes = hex_to_array::<32>(public_key_hex)
        .ok_or_else(|| VaultError::InvalidSignature("malformed public key".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| VaultError::InvalidSignature("invalid public key".into()))?;

    let sig_bytes = hex_to_array::<64>(signature_hex)
        .ok_or_else(|| VaultError::InvalidSignature("malformed signature".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify(message, &signature)
        .map_err(|_| VaultError::InvalidSignature("signature verification failed".into()))
}

fn hex_to_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != N {
        return None;
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Some(arr)
}
