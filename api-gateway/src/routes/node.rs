//! Node info handler.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use vault::shard::{self, ShardDistribution};
use vault::store::StoreStats;
use vault::{ShardAssignment, unix_millis};

use crate::error::ApiError;
use crate::state::SharedState;

/// Response for `GET /node/info`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoResponse {
    pub node_id: String,
    pub public_key: String,
    pub version: String,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_url: Option<String>,
    pub shard_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<ShardAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_distribution: Option<ShardDistribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    pub replication_factor: usize,
    pub storage: StoreStats,
    pub timestamp: u64,
}

/// `GET /node/info`
pub async fn info(State(state): State<SharedState>) -> Result<Json<NodeInfoResponse>, ApiError> {
    let cfg = &state.config;
    let storage = state.store.stats()?;

    let shard_distribution = cfg.shard.assignment.as_ref().map(|assignment| {
        shard::distribution(cfg.shard.shard_count, std::slice::from_ref(assignment))
    });

    Ok(Json(NodeInfoResponse {
        node_id: state.node_id.clone(),
        public_key: state.proofs.public_key_hex().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: cfg.storage.environment.clone(),
        node_url: cfg.network.node_url.clone(),
        shard_count: cfg.shard.shard_count,
        shards: cfg.shard.assignment.clone(),
        shard_distribution,
        min_version: state.registry.min_version(),
        replication_factor: cfg.replication.factor,
        storage,
        timestamp: unix_millis(),
    }))
}
