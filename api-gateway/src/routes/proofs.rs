//! Storage-proof handler.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use vault::{Cid, ProofResponse};

use crate::error::ApiError;
use crate::state::SharedState;

/// Request body for `POST /proofs/generate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofRequest {
    pub cid: Cid,
    /// Hex challenge the verifier derived for the current hour.
    pub challenge: String,
}

/// `POST /proofs/generate`
///
/// Signs a possession proof for a locally held blob. Fails with
/// `BLOB_NOT_FOUND` (and a reputation penalty) when the blob is absent.
pub async fn generate(
    State(state): State<SharedState>,
    Json(body): Json<GenerateProofRequest>,
) -> Result<Json<ProofResponse>, ApiError> {
    let proof = state
        .proofs
        .generate_proof(&body.cid, &body.challenge)
        .inspect_err(|_| state.metrics.vault.proof_failures_total.inc())?;

    state.metrics.vault.proofs_generated_total.inc();
    Ok(Json(ProofResponse {
        node_id: proof.node_id,
        proof: proof.signature,
        public_key: proof.public_key,
        timestamp: proof.timestamp,
        challenge: proof.challenge,
        cid: proof.cid,
    }))
}
