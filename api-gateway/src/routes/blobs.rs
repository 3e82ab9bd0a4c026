//! Blob store, retrieve, replicate, delete, and status handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use vault::peer::{decode_ciphertext, encode_ciphertext};
use vault::replication::FOREGROUND_DEADLINE;
use vault::store::StoreOptions;
use vault::{
    Cid, IndexEntry, IndexEntryType, NodeUrl, ReplicateAck, ReplicateRequest,
    ReplicationState, RetrieveResponse, StoreContext, unix_millis,
};

use crate::error::ApiError;
use crate::state::SharedState;

/// Request body for `POST /store`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    /// Base64 ciphertext; decoded strictly.
    pub ciphertext: String,
    pub mime_type: String,
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    pub sender: Option<String>,
    pub guild_id: Option<String>,
    /// Opaque thread hash; enables indexing of this blob.
    pub thread_id: Option<String>,
    /// Parent blob for comment threading in the index.
    pub parent_cid: Option<Cid>,
    pub timestamp: Option<u64>,
}

/// Response body for `POST /store`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    pub cid: Cid,
    pub replication_suggested: Vec<NodeUrl>,
    /// Ms since epoch at which the blob was durably stored.
    pub stored_at: u64,
}

/// `POST /store`
///
/// Admission, strict base64 decode, content-addressed write, synchronous
/// index update, then a bounded foreground replication phase. Replication
/// continues in the background after the response.
pub async fn store(
    State(state): State<SharedState>,
    Json(body): Json<StoreRequest>,
) -> Result<(StatusCode, Json<StoreResponse>), ApiError> {
    let started = Instant::now();

    let ctx = StoreContext {
        app_id: body.app_id.clone(),
        sender: body.sender.clone(),
        content_type: body.content_type.clone(),
        guild_id: body.guild_id.clone(),
    };
    state.admission.check_store(&ctx).await?;

    let ciphertext = decode_ciphertext(&body.ciphertext)?;
    let outcome = state.store.store_blob(
        &ciphertext,
        &body.mime_type,
        StoreOptions {
            app_id: body.app_id,
            content_type: body.content_type.clone(),
            sender: body.sender,
            timestamp: body.timestamp,
            from_peer: None,
        },
    )?;

    // The index is updated before the store call returns.
    if let (Some(thread_id), Some(entry_type)) = (
        body.thread_id.as_deref(),
        body.content_type.as_deref().and_then(parse_entry_type),
    ) {
        state.indexer.insert(IndexEntry {
            cid: outcome.cid,
            entry_type,
            thread_id: thread_id.to_string(),
            guild_id: body.guild_id.clone(),
            parent_cid: body.parent_cid,
            timestamp: body.timestamp.unwrap_or_else(unix_millis),
            size: outcome.metadata.size,
        });
    }

    if !outcome.already_stored {
        state.metrics.vault.blobs_stored_total.inc();
    }
    state
        .metrics
        .vault
        .storage_used_bytes
        .set(state.store.used_bytes() as f64);

    // Best-effort replicate phase bounded by the response deadline.
    let _ = state
        .coordinator
        .replicate_with_deadline(outcome.cid, FOREGROUND_DEADLINE)
        .await;
    let suggested = state.coordinator.suggest_replicas(&outcome.cid);

    state
        .metrics
        .vault
        .store_seconds
        .observe(started.elapsed().as_secs_f64());

    Ok((
        StatusCode::CREATED,
        Json(StoreResponse {
            cid: outcome.cid,
            replication_suggested: suggested,
            stored_at: outcome.metadata.created_at,
        }),
    ))
}

/// `GET /blob/:cid`
///
/// Ban check, cache/disk read, response; retrieval metrics are bumped off
/// the response path.
pub async fn retrieve(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let cid = Cid::parse(&cid)?;
    state.bans.check(&cid)?;

    let started = Instant::now();
    let (bytes, meta) = state.store.get_blob(&cid)?;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    state.metrics.vault.blobs_retrieved_total.inc();
    state
        .metrics
        .vault
        .retrieve_seconds
        .observe(started.elapsed().as_secs_f64());

    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.record_retrieval(&cid, latency_ms));

    Ok(Json(RetrieveResponse {
        cid,
        ciphertext: encode_ciphertext(&bytes),
        mime_type: meta.mime_type,
        created_at: meta.created_at,
        size: meta.size,
        version: meta.version,
    }))
}

/// `POST /replicate`
///
/// Peer-initiated replica push: CID verification, registry enforcement,
/// idempotent store.
pub async fn replicate(
    State(state): State<SharedState>,
    Json(body): Json<ReplicateRequest>,
) -> Result<Json<ReplicateAck>, ApiError> {
    let ack = state.coordinator.handle_inbound(body).await?;
    Ok(Json(ack))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

/// Response for `DELETE /blob/:cid`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub cid: Cid,
    pub deleted: bool,
}

/// `DELETE /blob/:cid?force=bool`
///
/// Pins are always respected; replica verification is skipped only with
/// `force=true`.
pub async fn delete(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let cid = Cid::parse(&cid)?;
    state.gc.delete_single_blob(&cid, params.force).await?;
    state.indexer.remove(&cid);
    state
        .metrics
        .vault
        .storage_used_bytes
        .set(state.store.used_bytes() as f64);
    Ok(Json(DeleteResponse { cid, deleted: true }))
}

/// Per-blob status for `GET /status/:cid`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStatus {
    pub cid: Cid,
    pub size: u64,
    pub mime_type: String,
    pub created_at: u64,
    pub pinned: bool,
    pub compressed: bool,
    pub retrieval_count: u64,
    pub replicated_to: Vec<NodeUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationState>,
}

/// `GET /status/:cid`
pub async fn status(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
) -> Result<Json<BlobStatus>, ApiError> {
    let cid = Cid::parse(&cid)?;
    let meta = state.store.get_metadata(&cid)?;
    Ok(Json(BlobStatus {
        cid,
        size: meta.size,
        mime_type: meta.mime_type,
        created_at: meta.created_at,
        pinned: meta.pinned,
        compressed: meta.compressed,
        retrieval_count: meta.metrics.retrieval_count,
        replicated_to: meta.replication.replicated_to.iter().cloned().collect(),
        replication: state.coordinator.verified_state(&cid)?,
    }))
}

fn parse_entry_type(raw: &str) -> Option<IndexEntryType> {
    match raw {
        "message" => Some(IndexEntryType::Message),
        "post" => Some(IndexEntryType::Post),
        "comment" => Some(IndexEntryType::Comment),
        "attachment" => Some(IndexEntryType::Attachment),
        _ => None,
    }
}
