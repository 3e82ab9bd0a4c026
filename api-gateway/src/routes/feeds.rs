//! Feed log handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use vault::feed::DEFAULT_EVENT_LIMIT;
use vault::{Cid, FeedEntry, FeedMetadata, FeedPage, FeedType, FeedValidation, ForkResolution};

use crate::error::ApiError;
use crate::state::SharedState;

/// Request body for `POST /feed`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedRequest {
    pub feed_id: String,
    pub feed_type: FeedType,
    /// Hex Ed25519 public keys allowed to append.
    pub writers: Vec<String>,
}

/// `POST /feed`
pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateFeedRequest>,
) -> Result<(StatusCode, Json<FeedMetadata>), ApiError> {
    let meta = state
        .feeds
        .create_feed(&body.feed_id, body.feed_type, body.writers)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

/// Request body for `POST /feed/:id/entry`; the feed id comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEventRequest {
    pub cid: Cid,
    pub parent_cid: Option<Cid>,
    pub author_key: String,
    pub timestamp: u64,
    pub signature: String,
    pub event_type: Option<String>,
}

/// `POST /feed/:id/entry`
pub async fn add_entry(
    State(state): State<SharedState>,
    Path(feed_id): Path<String>,
    Json(body): Json<FeedEventRequest>,
) -> Result<(StatusCode, Json<FeedMetadata>), ApiError> {
    let entry = FeedEntry {
        feed_id,
        cid: body.cid,
        parent_cid: body.parent_cid,
        author_key: body.author_key,
        timestamp: body.timestamp,
        signature: body.signature,
        event_type: body.event_type,
    };
    let meta = state.feeds.add_entry(entry)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// `GET /feed/:id?limit&cursor`
pub async fn events(
    State(state): State<SharedState>,
    Path(feed_id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Result<Json<FeedPage>, ApiError> {
    let page = state.feeds.get_feed_events(
        &feed_id,
        params.limit.unwrap_or(DEFAULT_EVENT_LIMIT),
        params.cursor.as_deref(),
    )?;
    Ok(Json(page))
}

/// Response for `GET /feed/:id/blobs`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedBlobsResponse {
    pub feed_id: String,
    pub cids: Vec<Cid>,
}

/// `GET /feed/:id/blobs`
pub async fn blobs(
    State(state): State<SharedState>,
    Path(feed_id): Path<String>,
) -> Result<Json<FeedBlobsResponse>, ApiError> {
    let cids = state.feeds.get_feed_blobs(&feed_id)?;
    Ok(Json(FeedBlobsResponse { feed_id, cids }))
}

/// `GET /feed/:id/validate`
pub async fn validate(
    State(state): State<SharedState>,
    Path(feed_id): Path<String>,
) -> Result<Json<FeedValidation>, ApiError> {
    Ok(Json(state.feeds.validate_feed(&feed_id)?))
}

/// `POST /feed/:id/resolve-forks`
pub async fn resolve_forks(
    State(state): State<SharedState>,
    Path(feed_id): Path<String>,
) -> Result<Json<ForkResolution>, ApiError> {
    Ok(Json(state.feeds.resolve_forks(&feed_id)?))
}
