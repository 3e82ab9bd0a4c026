// api-gateway/src/main.rs

//! API gateway binary: a full vault node.
//!
//! This binary wires the `vault` engine into an HTTP surface:
//!
//! - blob store / retrieve / replicate / delete,
//! - storage proofs,
//! - feeds, pins, index queries, GC administration,
//! - `/health`, `/node/info`, and a Prometheus exporter on `/metrics`.
//!
//! It also runs the node's background loops: the under-replication sweep,
//! the periodic garbage collector, and proof-snapshot cleanup.

mod config;
mod error;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::signal;

use vault::proof_service::DEFAULT_PROOF_RETENTION_HOURS;
use vault::registry::{RegistryAdapter, StaticRegistry};
use vault::{
    AdmissionPolicy, BanList, BlobStore, FeedLog, GcEngine, Indexer, KnownPeer,
    MetricsRegistry, PeerDirectory, ProofService, ReplicationCoordinator, ReputationTracker,
    run_prometheus_http_server,
};

use config::ApiConfig;
use routes::{blobs, feeds, gc, health, index, node, pins, proofs};
use state::{AppState, SharedState};

/// How often the under-replication sweep wakes up.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// How often old proof snapshots are cleaned up.
const PROOF_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    // Basic tracing setup.
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api_gateway=info,vault=info".to_string()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let vault_cfg = config::load_vault_config()?;
    let api_cfg = ApiConfig::from_vault_config(&vault_cfg);

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if vault_cfg.observability.metrics_enabled {
        let metrics_clone = metrics.clone();
        let addr = api_cfg.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!(error = %e, "metrics HTTP server error");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Engine singletons
    // ---------------------------

    let store = Arc::new(
        BlobStore::open(
            &vault_cfg.storage,
            &vault_cfg.cache,
            vault_cfg.identity.node_id.as_deref(),
        )
        .map_err(|e| format!("failed to open blob store: {e}"))?,
    );
    metrics.vault.storage_used_bytes.set(store.used_bytes() as f64);

    let reputation = Arc::new(ReputationTracker::new());

    // Membership is provisioned via config in this build; an on-chain
    // registry adapter can be swapped in behind the same trait.
    let registry: Arc<dyn RegistryAdapter> = Arc::new(StaticRegistry::allow_all());

    let proofs = Arc::new(
        ProofService::new(
            Arc::clone(&store),
            Arc::clone(&reputation),
            vault_cfg.identity.node_id.clone(),
        )
        .map_err(|e| format!("failed to initialise proof service: {e}"))?,
    );
    let node_id = proofs.node_id().to_string();

    let peers = Arc::new(PeerDirectory::new());
    let local_url = vault_cfg
        .network
        .node_url
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", vault_cfg.network.port));

    let coordinator = Arc::new(ReplicationCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&peers),
        Arc::clone(&reputation),
        Arc::clone(&registry),
        Arc::clone(&metrics),
        vault_cfg.replication.clone(),
        local_url,
        vault_cfg.shard.shard_count,
    ));
    for url in vault_cfg
        .replication
        .bootstrap_peers
        .iter()
        .chain(vault_cfg.replication.relay_peers.iter())
    {
        coordinator.add_known_peer(KnownPeer {
            node_id: url.clone(),
            url: url.clone(),
            shards: None,
        });
    }

    let feeds_log = Arc::new(FeedLog::new(Arc::clone(&store)));
    let indexer = Arc::new(Indexer::new());
    let gc_engine = Arc::new(GcEngine::new(
        Arc::clone(&store),
        Arc::clone(&peers),
        Arc::clone(&reputation),
        Arc::clone(&metrics),
        vault_cfg.gc.clone(),
    ));
    let admission = Arc::new(AdmissionPolicy::new(
        vault_cfg.admission.clone(),
        vault_cfg.content_filter.clone(),
        Arc::clone(&registry),
        vault_cfg.identity.public_key.clone(),
        Some(node_id.clone()),
    ));
    let bans = Arc::new(BanList::new(vault_cfg.admission.enable_blocked_content));

    // ---------------------------
    // Shared state
    // ---------------------------

    let app_state: SharedState = Arc::new(AppState {
        config: vault_cfg.clone(),
        store,
        coordinator,
        proofs,
        feeds: feeds_log,
        indexer,
        reputation,
        gc: gc_engine,
        admission,
        bans,
        registry,
        metrics: metrics.clone(),
        node_id: node_id.clone(),
    });

    // ---------------------------
    // Background loops
    // ---------------------------

    if vault_cfg.replication.enabled {
        let sweep_state = app_state.clone();
        tokio::spawn(async move {
            run_replication_sweep(sweep_state).await;
        });
    }

    if vault_cfg.gc.enabled {
        let gc_state = app_state.clone();
        let interval_minutes = vault_cfg.gc.interval_minutes.max(1);
        tokio::spawn(async move {
            run_gc_loop(gc_state, interval_minutes).await;
        });
    }

    let cleanup_state = app_state.clone();
    tokio::spawn(async move {
        run_proof_cleanup(cleanup_state).await;
    });

    // ---------------------------
    // HTTP router
    // ---------------------------

    // Blobs travel base64-encoded inside JSON (4/3 inflation), so the
    // body limit must sit above the configured max blob size or the
    // engine's own PayloadTooLarge check becomes unreachable.
    let body_limit =
        (vault_cfg.storage.max_blob_size_bytes as usize / 3 + 1) * 4 + 64 * 1024;

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/store", post(blobs::store))
        .route("/blob/{cid}", get(blobs::retrieve).delete(blobs::delete))
        .route("/replicate", post(blobs::replicate))
        .route("/status/{cid}", get(blobs::status))
        .route("/proofs/generate", post(proofs::generate))
        .route("/feed", post(feeds::create))
        .route("/feed/{id}", get(feeds::events))
        .route("/feed/{id}/entry", post(feeds::add_entry))
        .route("/feed/{id}/blobs", get(feeds::blobs))
        .route("/feed/{id}/validate", get(feeds::validate))
        .route("/feed/{id}/resolve-forks", post(feeds::resolve_forks))
        .route("/pin/list", get(pins::list))
        .route("/pin/bulk", post(pins::bulk))
        .route("/pin/{cid}", post(pins::pin).delete(pins::unpin))
        .route("/index/latest", get(index::latest))
        .route("/index/thread/{id}", get(index::thread))
        .route("/index/thread/{id}/delta", get(index::thread_delta))
        .route("/index/guild/{id}", get(index::guild))
        .route("/index/guild/{id}/posts", get(index::guild_posts))
        .route("/index/guild/{id}/comments/{parent}", get(index::comments))
        .route("/gc/status", get(gc::status))
        .route("/admin/gc", post(gc::run))
        .route("/node/info", get(node::info))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state);

    tracing::info!(
        node_id,
        "vault node listening on http://{}",
        api_cfg.listen_addr
    );

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    Ok(())
}

/// Periodically re-replicates anything under its factor.
async fn run_replication_sweep(state: SharedState) {
    tracing::info!(
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "replication sweep running"
    );
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        let swept = state.coordinator.sweep_under_replicated().await;
        if swept > 0 {
            tracing::info!(swept, "replication sweep re-queued blobs");
        }
    }
}

/// Periodic real (non-simulated) GC runs.
async fn run_gc_loop(state: SharedState, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);
    tracing::info!(interval_minutes, "gc loop running");
    loop {
        tokio::time::sleep(interval).await;
        match state.gc.run(false).await {
            Ok(report) => {
                if report.deleted > 0 {
                    tracing::info!(
                        deleted = report.deleted,
                        bytes = report.bytes_reclaimed,
                        "periodic gc reclaimed space"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "periodic gc run failed"),
        }
    }
}

/// Hourly cleanup of expired proof snapshots.
async fn run_proof_cleanup(state: SharedState) {
    loop {
        tokio::time::sleep(PROOF_CLEANUP_INTERVAL).await;
        match state.proofs.cleanup_old_proofs(DEFAULT_PROOF_RETENTION_HOURS) {
            Ok(removed) if removed > 0 => {
                tracing::debug!(removed, "removed expired proof snapshots");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "proof cleanup failed"),
        }
    }
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
