//! Index query handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use vault::index::DEFAULT_QUERY_LIMIT;
use vault::{Cid, IndexEntry, IndexEntryType, IndexPage, ThreadDelta};

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(rename = "type")]
    pub entry_type: Option<IndexEntryType>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// `GET /index/latest?type&limit&cursor`
pub async fn latest(
    State(state): State<SharedState>,
    Query(params): Query<PageParams>,
) -> Result<Json<IndexPage>, ApiError> {
    let page = state.indexer.query_latest(
        params.entry_type,
        params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        params.cursor.as_deref(),
    )?;
    Ok(Json(page))
}

/// `GET /index/thread/:id?limit&cursor`
pub async fn thread(
    State(state): State<SharedState>,
    Path(thread_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<IndexPage>, ApiError> {
    let page = state.indexer.query_thread(
        &thread_id,
        params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        params.cursor.as_deref(),
    )?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct DeltaParams {
    pub since: u64,
}

/// `GET /index/thread/:id/delta?since=<ms>`
pub async fn thread_delta(
    State(state): State<SharedState>,
    Path(thread_id): Path<String>,
    Query(params): Query<DeltaParams>,
) -> Json<ThreadDelta> {
    Json(state.indexer.query_thread_delta(&thread_id, params.since))
}

/// `GET /index/guild/:id?limit&cursor`
pub async fn guild(
    State(state): State<SharedState>,
    Path(guild_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<IndexPage>, ApiError> {
    let page = state.indexer.query_guild(
        &guild_id,
        params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        params.cursor.as_deref(),
    )?;
    Ok(Json(page))
}

/// `GET /index/guild/:id/posts?limit&cursor`
pub async fn guild_posts(
    State(state): State<SharedState>,
    Path(guild_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<IndexPage>, ApiError> {
    let page = state.indexer.query_guild_posts(
        &guild_id,
        params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        params.cursor.as_deref(),
    )?;
    Ok(Json(page))
}

/// `GET /index/guild/:id/comments/:parent`
pub async fn comments(
    State(state): State<SharedState>,
    Path((guild_id, parent)): Path<(String, String)>,
) -> Result<Json<Vec<IndexEntry>>, ApiError> {
    let parent = Cid::parse(&parent)?;
    Ok(Json(state.indexer.query_comments(&guild_id, &parent)))
}
