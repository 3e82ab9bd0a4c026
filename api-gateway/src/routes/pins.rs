//! Pin management handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use vault::{BlobMetadata, Cid};

use crate::error::ApiError;
use crate::state::SharedState;

/// Response for pin and unpin calls.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinResponse {
    pub cid: Cid,
    pub pinned: bool,
}

/// `POST /pin/:cid`
pub async fn pin(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
) -> Result<Json<PinResponse>, ApiError> {
    let cid = Cid::parse(&cid)?;
    let meta = state.store.pin_blob(&cid)?;
    Ok(Json(PinResponse {
        cid,
        pinned: meta.pinned,
    }))
}

/// `DELETE /pin/:cid`
pub async fn unpin(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
) -> Result<Json<PinResponse>, ApiError> {
    let cid = Cid::parse(&cid)?;
    let meta = state.store.unpin_blob(&cid)?;
    Ok(Json(PinResponse {
        cid,
        pinned: meta.pinned,
    }))
}

/// Response for `GET /pin/list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinListResponse {
    pub count: usize,
    pub pinned: Vec<BlobMetadata>,
}

/// `GET /pin/list`
pub async fn list(State(state): State<SharedState>) -> Json<PinListResponse> {
    let pinned = state.store.list_pinned_blobs();
    Json(PinListResponse {
        count: pinned.len(),
        pinned,
    })
}

/// Request body for `POST /pin/bulk`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPinRequest {
    pub operation: BulkOperation,
    pub cids: Vec<Cid>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    Pin,
    Unpin,
}

/// One per-CID outcome in a bulk response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPinResult {
    pub cid: Cid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `POST /pin/bulk`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPinResponse {
    pub results: Vec<BulkPinResult>,
}

/// `POST /pin/bulk`
///
/// Applies the operation per CID; individual failures do not abort the
/// batch.
pub async fn bulk(
    State(state): State<SharedState>,
    Json(body): Json<BulkPinRequest>,
) -> Json<BulkPinResponse> {
    let mut results = Vec::with_capacity(body.cids.len());
    for cid in body.cids {
        let outcome = match body.operation {
            BulkOperation::Pin => state.store.pin_blob(&cid),
            BulkOperation::Unpin => state.store.unpin_blob(&cid),
        };
        results.push(match outcome {
            Ok(_) => BulkPinResult {
                cid,
                success: true,
                error: None,
            },
            Err(e) => BulkPinResult {
                cid,
                success: false,
                error: Some(e.code().to_string()),
            },
        });
    }
    Json(BulkPinResponse { results })
}
