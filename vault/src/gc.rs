//! Garbage collector.
//!
//! Space is reclaimed in four steps: enumerate unpinned blobs, score them
//! (higher = more deletable), verify that enough *active* replicas exist
//! elsewhere, then delete in score order until the retention targets are
//! met. A replica counts as active only when the peer is online and
//! returns a valid possession proof, so the collector can never be the
//! one that destroys the last good copy.
//!
//! Pinned blobs are not candidates under any mode or pressure. At most
//! one run executes at a time; re-entry fails with `GcAlreadyRunning`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::config::{GcConfig, GcMode};
use crate::crypto;
use crate::error::{VaultError, VaultResult};
use crate::metrics::MetricsRegistry;
use crate::peer::PeerDirectory;
use crate::reputation::{ReputationEventType, ReputationTracker};
use crate::store::BlobStore;
use crate::types::{BlobMetadata, Cid, NodeUrl, unix_millis, unix_secs};

/// Outcome of a GC run.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    pub deleted: u64,
    pub skipped_pinned: u64,
    /// Candidates kept because replica verification failed.
    pub skipped_unsafe: u64,
    pub bytes_reclaimed: u64,
    pub deleted_cids: Vec<Cid>,
    pub simulate: bool,
}

/// Point-in-time GC status for the status endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStatus {
    pub enabled: bool,
    pub running: bool,
    pub retention_mode: GcMode,
    pub used_bytes: u64,
    pub max_storage_bytes: u64,
    pub interval_minutes: u64,
}

/// Garbage-collection engine over the blob store and the peer set.
pub struct GcEngine {
    store: Arc<BlobStore>,
    peers: Arc<PeerDirectory>,
    reputation: Arc<ReputationTracker>,
    metrics: Arc<MetricsRegistry>,
    cfg: GcConfig,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, even on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GcEngine {
    pub fn new(
        store: Arc<BlobStore>,
        peers: Arc<PeerDirectory>,
        reputation: Arc<ReputationTracker>,
        metrics: Arc<MetricsRegistry>,
        cfg: GcConfig,
    ) -> Self {
        Self {
            store,
            peers,
            reputation,
            metrics,
            cfg,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a run is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Status summary for operators.
    pub fn status(&self) -> GcStatus {
        GcStatus {
            enabled: self.cfg.enabled,
            running: self.is_running(),
            retention_mode: self.cfg.retention_mode,
            used_bytes: self.store.used_bytes(),
            max_storage_bytes: self.cfg.max_storage_bytes,
            interval_minutes: self.cfg.interval_minutes,
        }
    }

    /// Runs the full pipeline. With `simulate`, scoring and replica
    /// verification happen but nothing is deleted.
    pub async fn run(&self, simulate: bool) -> VaultResult<GcReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VaultError::GcAlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let now = unix_millis();
        let mut report = GcReport {
            simulate,
            ..GcReport::default()
        };

        // Step 1: enumerate candidates. Pinned blobs are never candidates;
        // blobs with unverifiable metadata are never deletable.
        let mut candidates: Vec<(BlobMetadata, f64)> = Vec::new();
        let mut pinned_bytes = 0u64;
        for (cid, result) in self.store.list_metadata() {
            match result {
                Ok(meta) if meta.pinned => {
                    report.skipped_pinned += 1;
                    pinned_bytes += meta.size;
                }
                Ok(meta) => {
                    let score = self.score_candidate(&meta, now);
                    candidates.push((meta, score));
                }
                Err(e) => {
                    tracing::error!(%cid, error = %e, "metadata failed verification, blob kept");
                    report.skipped_unsafe += 1;
                }
            }
        }

        // Step 2: rank, most deletable first.
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Size pressure: unpinned content must fit in the cap minus the
        // pinned reserve, and the cap itself leaves the free-disk headroom.
        let used = self.store.used_bytes();
        let unpinned_used = used.saturating_sub(pinned_bytes);
        let unpinned_budget = self
            .cfg
            .max_storage_bytes
            .saturating_sub(self.cfg.reserved_for_pinned_bytes);
        let headroom_budget = self
            .cfg
            .max_storage_bytes
            .saturating_sub(self.cfg.min_free_disk_bytes);
        let mut reclaim_target = unpinned_used
            .saturating_sub(unpinned_budget)
            .max(used.saturating_sub(headroom_budget));

        // Steps 3 and 4: verify replicas and delete until targets are met.
        for (meta, score) in candidates {
            let age_ms = now.saturating_sub(meta.created_at);
            let age_due = self.cfg.max_blob_age_ms > 0 && age_ms > self.cfg.max_blob_age_ms;
            let size_due = reclaim_target > 0;
            let due = match self.cfg.retention_mode {
                GcMode::Time => age_due,
                GcMode::Size => size_due,
                GcMode::Hybrid => age_due || size_due,
            };
            if !due {
                continue;
            }

            let active = self
                .verify_replication(
                    &meta.cid,
                    &meta.replication.replicated_to,
                    self.cfg.required_replicas,
                    true,
                )
                .await;
            if active < self.cfg.required_replicas {
                tracing::debug!(
                    cid = %meta.cid,
                    active,
                    required = self.cfg.required_replicas,
                    "candidate kept: not enough active replicas"
                );
                report.skipped_unsafe += 1;
                continue;
            }

            tracing::debug!(cid = %meta.cid, score, age_ms, "candidate eligible for deletion");
            if !simulate {
                if let Err(e) = self.store.delete_blob(&meta.cid) {
                    tracing::warn!(cid = %meta.cid, error = %e, "gc delete failed");
                    continue;
                }
            }
            report.deleted += 1;
            report.bytes_reclaimed += meta.size;
            report.deleted_cids.push(meta.cid);
            reclaim_target = reclaim_target.saturating_sub(meta.size);
        }

        self.metrics.vault.gc_runs_total.inc();
        if !simulate {
            self.metrics.vault.gc_deleted_total.inc_by(report.deleted);
            self.metrics
                .vault
                .gc_bytes_reclaimed_total
                .inc_by(report.bytes_reclaimed);
            self.metrics
                .vault
                .storage_used_bytes
                .set(self.store.used_bytes() as f64);
        }
        tracing::info!(
            deleted = report.deleted,
            skipped_pinned = report.skipped_pinned,
            skipped_unsafe = report.skipped_unsafe,
            bytes = report.bytes_reclaimed,
            simulate,
            "gc run finished"
        );
        Ok(report)
    }

    /// Counts replicas that are online AND answer with a valid proof.
    ///
    /// Stops early once `required` active replicas are confirmed.
    pub async fn verify_replication(
        &self,
        cid: &Cid,
        replicas: &std::collections::BTreeSet<NodeUrl>,
        required: usize,
        verify_proofs: bool,
    ) -> usize {
        let mut active = 0usize;
        let now_secs = unix_secs();
        let challenge = crypto::derive_challenge(cid, now_secs);

        for url in replicas {
            if active >= required {
                break;
            }
            let peer = self.peers.get_or_connect(url);

            if peer.health().await.is_err() {
                tracing::debug!(%cid, peer = %url, "replica offline");
                continue;
            }
            if !verify_proofs {
                active += 1;
                continue;
            }

            match peer.fetch_proof(cid, &challenge).await {
                Ok(proof) => {
                    let matches = proof.cid == *cid && proof.challenge == challenge;
                    if matches && crypto::verify_proof(&proof, None, now_secs).is_ok() {
                        active += 1;
                        self.reputation.apply_reward(
                            &proof.node_id,
                            ReputationEventType::ProofSuccess,
                            Some(*cid),
                        );
                    } else {
                        self.reputation.apply_penalty(
                            &proof.node_id,
                            ReputationEventType::InvalidSignature,
                            Some(*cid),
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(%cid, peer = %url, error = %e, "replica has no proof");
                    self.reputation.apply_penalty(
                        url,
                        ReputationEventType::BlobMissing,
                        Some(*cid),
                    );
                }
            }
        }
        active
    }

    /// Deletes one blob. Pins are respected always; replica verification
    /// is skipped only with `force`.
    pub async fn delete_single_blob(&self, cid: &Cid, force: bool) -> VaultResult<()> {
        let meta = self.store.get_metadata(cid)?;
        if meta.pinned {
            return Err(VaultError::Forbidden("blob is pinned".into()));
        }

        if !force {
            let active = self
                .verify_replication(
                    cid,
                    &meta.replication.replicated_to,
                    self.cfg.required_replicas,
                    true,
                )
                .await;
            if active < self.cfg.required_replicas {
                return Err(VaultError::Forbidden(format!(
                    "only {active} active replicas, {} required (use force to override)",
                    self.cfg.required_replicas
                )));
            }
        }

        self.store.delete_blob(cid)
    }

    /// Deletes everything, pins and replica counts ignored. Dev only.
    pub fn force_purge_all(&self) -> VaultResult<GcReport> {
        tracing::warn!("force purge: deleting all blobs regardless of pins or replicas");
        let mut report = GcReport::default();
        for (cid, result) in self.store.list_metadata() {
            let size = result.map(|m| m.size).unwrap_or(0);
            match self.store.delete_blob(&cid) {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_reclaimed += size;
                    report.deleted_cids.push(cid);
                }
                Err(e) => tracing::warn!(%cid, error = %e, "purge delete failed"),
            }
        }
        Ok(report)
    }

    /// Deletability score: older, larger, colder blobs rank higher.
    fn score_candidate(&self, meta: &BlobMetadata, now: u64) -> f64 {
        const DAY_MS: f64 = 24.0 * 3600.0 * 1000.0;

        let age_days = now.saturating_sub(meta.created_at) as f64 / DAY_MS;
        let last_touch = if meta.metrics.last_accessed > 0 {
            meta.metrics.last_accessed
        } else {
            meta.created_at
        };
        let idle_days = now.saturating_sub(last_touch) as f64 / DAY_MS;
        let size_mb = meta.size as f64 / (1024.0 * 1024.0);
        // Retrievals per day since creation; hot blobs score low.
        let retrieval_rate = meta.metrics.retrieval_count as f64 / age_days.max(1.0);

        let age_component = age_days + 2.0 * idle_days;
        let size_component = size_mb;
        let heat_penalty = 10.0 * retrieval_rate;

        match self.cfg.retention_mode {
            GcMode::Time => age_component - heat_penalty,
            GcMode::Size => size_component + idle_days - heat_penalty,
            GcMode::Hybrid => age_component + size_component - heat_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StorageConfig};
    use crate::crypto::NodeKeypair;
    use crate::error::VaultResult;
    use crate::peer::{Peer, PeerHealth, PeerNodeInfo, ReplicateAck, ReplicateRequest};
    use crate::store::StoreOptions;
    use crate::types::StorageProof;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    /// Peer double that holds a set of blobs and signs honest proofs.
    struct ReplicaPeer {
        url: String,
        keypair: NodeKeypair,
        held: BTreeSet<Cid>,
        online: bool,
    }

    impl ReplicaPeer {
        fn new(url: &str, secret: u8, held: &[Cid], online: bool) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                keypair: NodeKeypair::from_secret_bytes([secret; 32]),
                held: held.iter().copied().collect(),
                online,
            })
        }
    }

    #[async_trait]
    impl Peer for ReplicaPeer {
        fn url(&self) -> &str {
            &self.url
        }

        async fn replicate(&self, req: &ReplicateRequest) -> VaultResult<ReplicateAck> {
            Ok(ReplicateAck {
                success: true,
                cid: req.cid,
                already_stored: false,
            })
        }

        async fn fetch_blob(&self, cid: &Cid) -> VaultResult<Vec<u8>> {
            Err(VaultError::BlobNotFound(cid.to_hex()))
        }

        async fn has_blob(&self, cid: &Cid) -> VaultResult<bool> {
            Ok(self.held.contains(cid))
        }

        async fn health(&self) -> VaultResult<PeerHealth> {
            if !self.online {
                return Err(VaultError::Internal("connection refused".into()));
            }
            Ok(PeerHealth {
                status: "ok".into(),
                node_id: Some(self.url.clone()),
            })
        }

        async fn info(&self) -> VaultResult<PeerNodeInfo> {
            Ok(PeerNodeInfo::default())
        }

        async fn fetch_proof(&self, cid: &Cid, challenge: &str) -> VaultResult<StorageProof> {
            if !self.online {
                return Err(VaultError::Internal("connection refused".into()));
            }
            if !self.held.contains(cid) {
                return Err(VaultError::BlobNotFound(cid.to_hex()));
            }
            Ok(crypto::sign_proof(
                &self.keypair,
                cid,
                &self.url,
                challenge,
                unix_secs(),
            ))
        }
    }

    struct Harness {
        engine: GcEngine,
        store: Arc<BlobStore>,
        peers: Arc<PeerDirectory>,
        _tmp: TempDir,
    }

    fn harness(cfg: GcConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let storage = StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            compression_enabled: false,
            ..StorageConfig::default()
        };
        let store = Arc::new(
            BlobStore::open(&storage, &CacheConfig::default(), None).expect("open store"),
        );
        let peers = Arc::new(PeerDirectory::new());
        let engine = GcEngine::new(
            Arc::clone(&store),
            Arc::clone(&peers),
            Arc::new(ReputationTracker::new()),
            Arc::new(MetricsRegistry::new().expect("metrics")),
            cfg,
        );
        Harness {
            engine,
            store,
            peers,
            _tmp: tmp,
        }
    }

    fn time_mode_cfg() -> GcConfig {
        GcConfig {
            retention_mode: GcMode::Time,
            max_blob_age_ms: 1, // everything qualifies as old
            required_replicas: 1,
            ..GcConfig::default()
        }
    }

    /// Stores a blob and backdates it a day so time-mode retention sees
    /// it as expired.
    fn store_aged(store: &BlobStore, data: &[u8]) -> Cid {
        let cid = store
            .store_blob(data, "application/octet-stream", StoreOptions::default())
            .unwrap()
            .cid;
        store
            .update_metadata(&cid, |meta| {
                meta.created_at = unix_millis().saturating_sub(24 * 3600 * 1000);
            })
            .unwrap();
        cid
    }

    fn attach_replica(h: &Harness, cid: &Cid, url: &str, online: bool) {
        let peer = ReplicaPeer::new(url, 9, &[*cid], online);
        h.peers.register(peer as Arc<dyn Peer>);
        h.store
            .update_metadata(cid, |meta| {
                meta.replication.replicated_to.insert(url.to_string());
            })
            .unwrap();
    }

    #[tokio::test]
    async fn pinned_blobs_are_immune() {
        // A year-old, never-replicated, pinned blob survives a real run.
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, &vec![0u8; 1024]);
        h.store.pin_blob(&cid).unwrap();

        // Backdate creation far into the past.
        h.store
            .update_metadata(&cid, |meta| {
                meta.created_at = unix_millis() - 365 * 24 * 3600 * 1000;
            })
            .unwrap();

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.skipped_pinned, 1);
        assert_eq!(report.deleted, 0);
        assert!(h.store.has_blob(&cid), "pinned blob must still exist");
    }

    #[tokio::test]
    async fn unreplicated_blob_is_kept() {
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"lonely");

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped_unsafe, 1);
        assert!(h.store.has_blob(&cid));
    }

    #[tokio::test]
    async fn blob_with_active_replica_is_deleted() {
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"safely replicated");
        attach_replica(&h, &cid, "http://replica-1", true);

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.deleted_cids, vec![cid]);
        assert!(!h.store.has_blob(&cid));
    }

    #[tokio::test]
    async fn offline_replica_does_not_count() {
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"replica is down");
        attach_replica(&h, &cid, "http://replica-down", false);

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(h.store.has_blob(&cid));
    }

    #[tokio::test]
    async fn replica_without_the_blob_does_not_count() {
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"replica lost it");

        // Online peer that does not actually hold the blob.
        let peer = ReplicaPeer::new("http://empty-replica", 9, &[], true);
        h.peers.register(peer as Arc<dyn Peer>);
        h.store
            .update_metadata(&cid, |meta| {
                meta.replication
                    .replicated_to
                    .insert("http://empty-replica".to_string());
            })
            .unwrap();

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(h.store.has_blob(&cid));
    }

    #[tokio::test]
    async fn simulate_reports_without_deleting() {
        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"dry run");
        attach_replica(&h, &cid, "http://replica-1", true);

        let report = h.engine.run(true).await.unwrap();
        assert!(report.simulate);
        assert_eq!(report.deleted, 1);
        assert!(h.store.has_blob(&cid), "simulate must not delete");
    }

    #[tokio::test]
    async fn fresh_blobs_survive_time_mode() {
        let cfg = GcConfig {
            retention_mode: GcMode::Time,
            max_blob_age_ms: 365 * 24 * 3600 * 1000,
            required_replicas: 1,
            ..GcConfig::default()
        };
        let h = harness(cfg);
        let cid = store_aged(&h.store, b"brand new");
        attach_replica(&h, &cid, "http://replica-1", true);

        let report = h.engine.run(false).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(h.store.has_blob(&cid));
    }

    #[tokio::test]
    async fn size_mode_reclaims_down_to_the_cap() {
        let cfg = GcConfig {
            retention_mode: GcMode::Size,
            max_storage_bytes: 1024,
            reserved_for_pinned_bytes: 0,
            min_free_disk_bytes: 0,
            max_blob_age_ms: 0,
            required_replicas: 1,
            ..GcConfig::default()
        };
        let h = harness(cfg);

        let big = store_aged(&h.store, &vec![7u8; 2048]);
        let small = store_aged(&h.store, b"tiny");
        attach_replica(&h, &big, "http://replica-big", true);
        attach_replica(&h, &small, "http://replica-small", true);

        let report = h.engine.run(false).await.unwrap();
        // Deleting the big blob already satisfies the cap.
        assert_eq!(report.deleted, 1);
        assert!(!h.store.has_blob(&big));
        assert!(h.store.has_blob(&small));
    }

    #[tokio::test]
    async fn delete_single_blob_respects_pins_and_force() {
        let h = harness(time_mode_cfg());
        let pinned = store_aged(&h.store, b"pinned blob");
        h.store.pin_blob(&pinned).unwrap();

        let err = h.engine.delete_single_blob(&pinned, true).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert!(h.store.has_blob(&pinned));

        let lonely = store_aged(&h.store, b"no replicas");
        let err = h.engine.delete_single_blob(&lonely, false).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        h.engine.delete_single_blob(&lonely, true).await.unwrap();
        assert!(!h.store.has_blob(&lonely));
    }

    #[tokio::test]
    async fn force_purge_ignores_everything() {
        let h = harness(time_mode_cfg());
        let pinned = store_aged(&h.store, b"pinned");
        h.store.pin_blob(&pinned).unwrap();
        store_aged(&h.store, b"plain");

        let report = h.engine.force_purge_all().unwrap();
        assert_eq!(report.deleted, 2);
        assert!(!h.store.has_blob(&pinned));
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_run_at_a_time() {
        /// Peer whose health check stalls, keeping the first run inside
        /// the gate while the second tries to enter.
        struct StalledPeer;

        #[async_trait]
        impl Peer for StalledPeer {
            fn url(&self) -> &str {
                "http://stalled"
            }
            async fn replicate(&self, req: &ReplicateRequest) -> VaultResult<ReplicateAck> {
                Ok(ReplicateAck {
                    success: true,
                    cid: req.cid,
                    already_stored: false,
                })
            }
            async fn fetch_blob(&self, cid: &Cid) -> VaultResult<Vec<u8>> {
                Err(VaultError::BlobNotFound(cid.to_hex()))
            }
            async fn has_blob(&self, _cid: &Cid) -> VaultResult<bool> {
                Ok(false)
            }
            async fn health(&self) -> VaultResult<PeerHealth> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(VaultError::Internal("never healthy".into()))
            }
            async fn info(&self) -> VaultResult<PeerNodeInfo> {
                Ok(PeerNodeInfo::default())
            }
            async fn fetch_proof(&self, cid: &Cid, _c: &str) -> VaultResult<StorageProof> {
                Err(VaultError::BlobNotFound(cid.to_hex()))
            }
        }

        let h = harness(time_mode_cfg());
        let cid = store_aged(&h.store, b"contended");
        h.peers.register(Arc::new(StalledPeer) as Arc<dyn Peer>);
        h.store
            .update_metadata(&cid, |meta| {
                meta.replication
                    .replicated_to
                    .insert("http://stalled".to_string());
            })
            .unwrap();

        let first = h.engine.run(false);
        tokio::pin!(first);
        // Drive the first run to its await point inside the stalled
        // health check, then try to enter again.
        assert!(
            futures_poll_once(first.as_mut()).await.is_none(),
            "first run should be parked on the stalled peer"
        );
        let err = h.engine.run(false).await.unwrap_err();
        assert_eq!(err, VaultError::GcAlreadyRunning);
        assert!(h.engine.is_running());
    }

    /// Polls a future exactly once; returns its output if ready.
    async fn futures_poll_once<F: std::future::Future>(
        fut: std::pin::Pin<&mut F>,
    ) -> Option<F::Output> {
        struct PollOnce<'a, F>(Option<std::pin::Pin<&'a mut F>>);
        impl<F: std::future::Future> std::future::Future for PollOnce<'_, F> {
            type Output = Option<F::Output>;
            fn poll(
                mut self: std::pin::Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<Self::Output> {
                let inner = self.0.take().expect("polled after completion");
                match inner.poll(cx) {
                    std::task::Poll::Ready(out) => std::task::Poll::Ready(Some(out)),
                    std::task::Poll::Pending => std::task::Poll::Ready(None),
                }
            }
        }
        PollOnce(Some(fut)).await
    }
}
