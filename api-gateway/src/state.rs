//! Shared application state for request handlers and background tasks.

use std::sync::Arc;

use vault::registry::RegistryAdapter;
use vault::{
    AdmissionPolicy, BanList, BlobStore, FeedLog, GcEngine, Indexer, MetricsRegistry,
    ProofService, ReplicationCoordinator, ReputationTracker, VaultConfig,
};

/// Per-node singletons created once at process start and injected into
/// handlers. Handlers themselves are stateless.
pub struct AppState {
    pub config: VaultConfig,
    pub store: Arc<BlobStore>,
    pub coordinator: Arc<ReplicationCoordinator>,
    pub proofs: Arc<ProofService>,
    pub feeds: Arc<FeedLog>,
    pub indexer: Arc<Indexer>,
    pub reputation: Arc<ReputationTracker>,
    pub gc: Arc<GcEngine>,
    pub admission: Arc<AdmissionPolicy>,
    pub bans: Arc<BanList>,
    pub registry: Arc<dyn RegistryAdapter>,
    pub metrics: Arc<MetricsRegistry>,
    /// This node's identity as exposed in proofs and `/node/info`.
    pub node_id: String,
}

/// Thread-safe alias for `AppState`, passed via axum's `State` extractor.
pub type SharedState = Arc<AppState>;
