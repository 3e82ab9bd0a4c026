//! Garbage-collection handlers.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use vault::{GcReport, GcStatus};

use crate::error::ApiError;
use crate::state::SharedState;

/// `GET /gc/status`
pub async fn status(State(state): State<SharedState>) -> Json<GcStatus> {
    Json(state.gc.status())
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    /// Defaults to a dry run; pass `simulate=false` to actually delete.
    pub simulate: Option<bool>,
}

/// `POST /admin/gc?simulate=bool`
pub async fn run(
    State(state): State<SharedState>,
    Query(params): Query<RunParams>,
) -> Result<Json<GcReport>, ApiError> {
    let report = state.gc.run(params.simulate.unwrap_or(true)).await?;
    Ok(Json(report))
}
