//! Replication coordinator.
//!
//! After a successful store the coordinator picks `replicationFactor`
//! peers through the deterministic selector, pushes the blob to each, and
//! tracks confirmations in both the blob metadata (`replication.replicatedTo`)
//! and an HMAC-backed in-memory [`ReplicationState`]. Failed peers are
//! retried with exponential backoff (1 s, 2 s, 4 s, 8 s); peers that
//! exhaust the budget are penalized in reputation and replaced through a
//! fresh selection round.
//!
//! The store path only waits a short wall-clock deadline for the first
//! confirmations; the coordinator keeps working in the background. A
//! periodic sweep re-runs the same pipeline for anything that slipped
//! under its factor. Inbound pushes verify the declared CID against the
//! bytes and the sending peer against the registry before anything is
//! stored.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinSet;

use crate::codec;
use crate::config::ReplicationConfig;
use crate::error::{VaultError, VaultResult};
use crate::metrics::MetricsRegistry;
use crate::peer::{self, Peer, PeerDirectory, ReplicateAck, ReplicateRequest};
use crate::registry::RegistryAdapter;
use crate::reputation::{ReputationEventType, ReputationTracker};
use crate::selector::{self, CandidateNode};
use crate::store::{BlobStore, StoreOptions};
use crate::types::{Cid, NodeId, NodeUrl, ReplicationState, unix_millis};

/// Attempts per peer before giving up on it (initial try included).
const MAX_ATTEMPTS_PER_PEER: usize = 4;

/// Base of the exponential backoff between attempts, in seconds.
const BACKOFF_BASE_SECS: u64 = 1;

/// Default wall-clock cap on the foreground replication phase.
pub const FOREGROUND_DEADLINE: Duration = Duration::from_secs(2);

/// A peer this node knows about, fed into selection.
#[derive(Clone, Debug)]
pub struct KnownPeer {
    pub node_id: NodeId,
    pub url: NodeUrl,
    pub shards: Option<crate::types::ShardAssignment>,
}

/// Outcome of handling an inbound replicate request.
pub type InboundAck = ReplicateAck;

/// Coordinates outbound replication and tracks per-CID progress.
pub struct ReplicationCoordinator {
    store: Arc<BlobStore>,
    peers: Arc<PeerDirectory>,
    reputation: Arc<ReputationTracker>,
    registry: Arc<dyn RegistryAdapter>,
    metrics: Arc<MetricsRegistry>,
    cfg: ReplicationConfig,
    /// This node's advertised URL, sent as `fromPeer`.
    local_url: NodeUrl,
    shard_count: u32,
    known_peers: RwLock<Vec<KnownPeer>>,
    states: Mutex<HashMap<Cid, ReplicationState>>,
}

impl ReplicationCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<BlobStore>,
        peers: Arc<PeerDirectory>,
        reputation: Arc<ReputationTracker>,
        registry: Arc<dyn RegistryAdapter>,
        metrics: Arc<MetricsRegistry>,
        cfg: ReplicationConfig,
        local_url: NodeUrl,
        shard_count: u32,
    ) -> Self {
        Self {
            store,
            peers,
            reputation,
            registry,
            metrics,
            cfg,
            local_url,
            shard_count,
            known_peers: RwLock::new(Vec::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the membership view used for selection.
    pub fn set_known_peers(&self, peers: Vec<KnownPeer>) {
        *self.known_peers.write().expect("peer view lock poisoned") = peers;
    }

    /// Adds one peer to the membership view.
    pub fn add_known_peer(&self, peer: KnownPeer) {
        let mut view = self.known_peers.write().expect("peer view lock poisoned");
        if !view.iter().any(|p| p.url == peer.url) {
            view.push(peer);
        }
    }

    /// Current per-CID replication state, if tracked.
    pub fn state(&self, cid: &Cid) -> Option<ReplicationState> {
        self.states
            .lock()
            .expect("state map poisoned")
            .get(cid)
            .cloned()
    }

    /// Like [`state`](Self::state), but re-checks the state's HMAC first.
    ///
    /// A state whose hash no longer matches its member set is surfaced as
    /// `ReplicationStateTampered`, never silently returned.
    pub fn verified_state(&self, cid: &Cid) -> VaultResult<Option<ReplicationState>> {
        match self.state(cid) {
            None => Ok(None),
            Some(state) => {
                if codec::verify_replication_state(&state) {
                    Ok(Some(state))
                } else {
                    Err(VaultError::ReplicationStateTampered(cid.to_hex()))
                }
            }
        }
    }

    /// Peer URLs the selector would pick for this CID right now.
    pub fn suggest_replicas(&self, cid: &Cid) -> Vec<NodeUrl> {
        self.select(cid, self.cfg.factor, &HashSet::new())
            .selected
            .into_iter()
            .map(|n| n.url)
            .collect()
    }

    fn candidates(&self) -> Vec<CandidateNode> {
        self.known_peers
            .read()
            .expect("peer view lock poisoned")
            .iter()
            .map(|p| CandidateNode {
                node_id: p.node_id.clone(),
                url: p.url.clone(),
                score: Some(self.reputation.score(&p.node_id)),
                shards: p.shards.clone(),
            })
            .collect()
    }

    fn select(&self, cid: &Cid, k: usize, excluded: &HashSet<NodeId>) -> selector::Selection {
        selector::select_nodes(
            &cid.to_hex(),
            &self.candidates(),
            k,
            excluded,
            Some(self.shard_count),
        )
    }

    /// Full outbound replication pipeline for one blob.
    ///
    /// Returns the resulting state; errors only on local failures (blob
    /// missing, tampered metadata). Peer failures are absorbed into the
    /// state and reputation.
    pub async fn replicate_blob(self: Arc<Self>, cid: Cid) -> VaultResult<ReplicationState> {
        if !self.cfg.enabled || self.cfg.factor == 0 {
            return Ok(self.refresh_state(&cid)?);
        }

        let (bytes, metadata) = self.store.get_blob(&cid)?;
        let payload = ReplicateRequest {
            cid,
            ciphertext: peer::encode_ciphertext(&bytes),
            mime_type: metadata.mime_type.clone(),
            from_peer: self.local_url.clone(),
            content_type: metadata.content_type.clone(),
            guild_id: None,
        };

        // Nodes already holding the blob never get re-selected.
        let confirmed_urls: HashSet<NodeUrl> =
            metadata.replication.replicated_to.iter().cloned().collect();
        let mut excluded: HashSet<NodeId> = self.node_ids_for_urls(&confirmed_urls);
        let mut failed: HashSet<NodeId> = HashSet::new();

        let mut needed = self
            .cfg
            .factor
            .saturating_sub(confirmed_urls.len());

        while needed > 0 {
            let selection = selector::select_replacements(
                &cid.to_hex(),
                &self.candidates(),
                needed,
                &excluded,
                &failed,
                Some(self.shard_count),
            );
            if selection.selected.is_empty() {
                tracing::warn!(%cid, needed, "no further replication candidates");
                break;
            }

            let mut attempts: JoinSet<(NodeId, NodeUrl, VaultResult<ReplicateAck>)> =
                JoinSet::new();
            for target in &selection.selected {
                let peer = self.peers.get_or_connect(&target.url);
                let payload = payload.clone();
                let node_id = target.node_id.clone();
                let url = target.url.clone();
                let timeout = Duration::from_millis(self.cfg.attempt_timeout_ms);
                attempts.spawn(async move {
                    let result = attempt_with_retry(peer, &payload, timeout).await;
                    (node_id, url, result)
                });
            }

            while let Some(joined) = attempts.join_next().await {
                let Ok((node_id, url, result)) = joined else {
                    continue;
                };
                self.metrics.vault.replication_attempts_total.inc();
                match result {
                    Ok(_ack) => {
                        self.record_confirmation(&cid, &url)?;
                        self.reputation.apply_reward(
                            &node_id,
                            ReputationEventType::BlobAvailable,
                            Some(cid),
                        );
                        excluded.insert(node_id);
                        needed = needed.saturating_sub(1);
                    }
                    Err(e) => {
                        tracing::warn!(%cid, peer = %url, error = %e, "replication to peer failed");
                        self.metrics.vault.replication_failures_total.inc();
                        self.reputation.apply_penalty(
                            &node_id,
                            ReputationEventType::BlobMissing,
                            Some(cid),
                        );
                        failed.insert(node_id);
                    }
                }
            }
        }

        let state = self.refresh_state(&cid)?;
        if state.complete {
            self.metrics.vault.replication_complete_total.inc();
        }
        Ok(state)
    }

    /// Spawns replication and waits at most `deadline` for the foreground
    /// phase; the task keeps running after the deadline passes.
    pub async fn replicate_with_deadline(
        self: &Arc<Self>,
        cid: Cid,
        deadline: Duration,
    ) -> Option<ReplicationState> {
        let coordinator = Arc::clone(self);
        let mut handle = tokio::spawn(async move {
            if let Err(e) = coordinator.replicate_blob(cid).await {
                tracing::warn!(%cid, error = %e, "background replication failed");
            }
        });

        if tokio::time::timeout(deadline, &mut handle).await.is_err() {
            tracing::debug!(%cid, "replication continues in background");
        }
        self.state(&cid)
    }

    /// Accepts a peer-initiated replica push.
    ///
    /// The sending peer must be a registered active node; this check is
    /// unconditional, matching the admission gate on local stores.
    pub async fn handle_inbound(&self, req: ReplicateRequest) -> VaultResult<InboundAck> {
        let ciphertext = peer::decode_ciphertext(&req.ciphertext)?;

        let computed = codec::cid(&ciphertext);
        if computed != req.cid {
            return Err(VaultError::CidMismatch {
                declared: req.cid.to_hex(),
                computed: computed.to_hex(),
            });
        }

        let active = self
            .registry
            .is_node_active(&req.from_peer)
            .await
            .map_err(|e| match e {
                VaultError::RegistrationCheckFailed(_) => e,
                other => VaultError::RegistrationCheckFailed(other.to_string()),
            })?;
        if !active {
            return Err(VaultError::NodeNotRegistered);
        }

        let outcome = self.store.store_blob(
            &ciphertext,
            &req.mime_type,
            StoreOptions {
                content_type: req.content_type.clone(),
                from_peer: Some(req.from_peer.clone()),
                ..StoreOptions::default()
            },
        )?;

        Ok(ReplicateAck {
            success: true,
            cid: outcome.cid,
            already_stored: outcome.already_stored,
        })
    }

    /// Re-runs the pipeline for every blob below its replication factor.
    ///
    /// Returns how many blobs were swept.
    pub async fn sweep_under_replicated(self: &Arc<Self>) -> usize {
        if !self.cfg.enabled {
            return 0;
        }

        let mut swept = 0usize;
        for (cid, result) in self.store.list_metadata() {
            let meta = match result {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::error!(%cid, error = %e, "skipping unreadable metadata in sweep");
                    continue;
                }
            };
            if meta.replication.replicated_to.len() >= self.cfg.factor {
                continue;
            }
            swept += 1;
            if let Err(e) = Arc::clone(self).replicate_blob(cid).await {
                tracing::warn!(%cid, error = %e, "sweep replication failed");
            }
        }
        if swept > 0 {
            tracing::info!(swept, "under-replication sweep finished");
        }
        swept
    }

    fn node_ids_for_urls(&self, urls: &HashSet<NodeUrl>) -> HashSet<NodeId> {
        self.known_peers
            .read()
            .expect("peer view lock poisoned")
            .iter()
            .filter(|p| urls.contains(&p.url))
            .map(|p| p.node_id.clone())
            .collect()
    }

    /// Writes a confirmation into the metadata and the state map; the two
    /// updates happen back-to-back under the store's per-CID lock and the
    /// state mutex so the HMAC always matches the member set.
    fn record_confirmation(&self, cid: &Cid, url: &NodeUrl) -> VaultResult<()> {
        let now = unix_millis();
        self.store.update_metadata(cid, |meta| {
            meta.replication.replicated_to.insert(url.clone());
            meta.replication.replicated_at = Some(now);
        })?;
        self.refresh_state(cid)?;
        Ok(())
    }

    /// Rebuilds the HMAC-backed state from the current metadata.
    fn refresh_state(&self, cid: &Cid) -> VaultResult<ReplicationState> {
        let meta = self.store.get_metadata(cid)?;
        let confirmed = meta.replication.replicated_to.clone();
        let complete = confirmed.len() >= self.cfg.factor;
        let state = ReplicationState {
            cid: *cid,
            replication_factor: self.cfg.factor,
            integrity_hash: codec::replication_state_hash(
                cid,
                self.cfg.factor,
                &confirmed,
                complete,
            ),
            confirmed_nodes: confirmed,
            complete,
        };
        self.states
            .lock()
            .expect("state map poisoned")
            .insert(*cid, state.clone());
        Ok(state)
    }
}

async fn attempt_with_retry(
    peer: Arc<dyn Peer>,
    payload: &ReplicateRequest,
    attempt_timeout: Duration,
) -> VaultResult<ReplicateAck> {
    let mut last_err =
        VaultError::Internal("replication attempted zero times".into());

    for attempt in 0..MAX_ATTEMPTS_PER_PEER {
        let result =
            tokio::time::timeout(attempt_timeout, peer.replicate(payload)).await;
        match result {
            Ok(Ok(ack)) => return Ok(ack),
            Ok(Err(e)) => last_err = e,
            Err(_) => {
                last_err = VaultError::Internal(format!(
                    "replication attempt to {} timed out",
                    peer.url()
                ));
            }
        }
        if attempt + 1 < MAX_ATTEMPTS_PER_PEER {
            let backoff = Duration::from_secs(BACKOFF_BASE_SECS << attempt);
            tokio::time::sleep(backoff).await;
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StorageConfig};
    use crate::peer::{PeerHealth, PeerNodeInfo};
    use crate::registry::StaticRegistry;
    use crate::types::StorageProof;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Peer double that succeeds after a programmable number of failures.
    struct FlakyPeer {
        url: String,
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    impl FlakyPeer {
        fn new(url: &str, failures_before_success: usize) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                failures_before_success,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Peer for FlakyPeer {
        fn url(&self) -> &str {
            &self.url
        }

        async fn replicate(&self, req: &ReplicateRequest) -> VaultResult<ReplicateAck> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(VaultError::Internal("induced failure".into()));
            }
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
            Ok(true)
        }

        async fn health(&self) -> VaultResult<PeerHealth> {
            Ok(PeerHealth {
                status: "ok".into(),
                node_id: None,
            })
        }

        async fn info(&self) -> VaultResult<PeerNodeInfo> {
            Ok(PeerNodeInfo::default())
        }

        async fn fetch_proof(&self, cid: &Cid, _challenge: &str) -> VaultResult<StorageProof> {
            Err(VaultError::BlobNotFound(cid.to_hex()))
        }
    }

    struct Harness {
        coordinator: Arc<ReplicationCoordinator>,
        store: Arc<BlobStore>,
        _tmp: TempDir,
    }

    fn harness(factor: usize, peers: &[Arc<FlakyPeer>]) -> Harness {
        harness_with_registry(factor, peers, Arc::new(StaticRegistry::allow_all()))
    }

    fn harness_with_registry(
        factor: usize,
        peers: &[Arc<FlakyPeer>],
        registry: Arc<dyn crate::registry::RegistryAdapter>,
    ) -> Harness {
        let tmp = TempDir::new().unwrap();
        let storage = StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let store = Arc::new(
            BlobStore::open(&storage, &CacheConfig::default(), None).expect("open store"),
        );

        let directory = Arc::new(PeerDirectory::new());
        let mut known = Vec::new();
        for peer in peers {
            directory.register(Arc::clone(peer) as Arc<dyn Peer>);
            known.push(KnownPeer {
                node_id: peer.url.clone(),
                url: peer.url.clone(),
                shards: None,
            });
        }

        let cfg = ReplicationConfig {
            factor,
            enabled: true,
            attempt_timeout_ms: 500,
            ..ReplicationConfig::default()
        };
        let coordinator = Arc::new(ReplicationCoordinator::new(
            Arc::clone(&store),
            directory,
            Arc::new(ReputationTracker::new()),
            registry,
            Arc::new(MetricsRegistry::new().expect("metrics")),
            cfg,
            "http://local.vault".into(),
            16,
        ));
        coordinator.set_known_peers(known);

        Harness {
            coordinator,
            store,
            _tmp: tmp,
        }
    }

    fn store_blob(store: &BlobStore, data: &[u8]) -> Cid {
        store
            .store_blob(data, "application/octet-stream", StoreOptions::default())
            .unwrap()
            .cid
    }

    #[tokio::test(start_paused = true)]
    async fn replication_confirms_and_completes() {
        let peers = vec![
            FlakyPeer::new("http://n1", 0),
            FlakyPeer::new("http://n2", 0),
            FlakyPeer::new("http://n3", 0),
        ];
        let h = harness(2, &peers);
        let cid = store_blob(&h.store, b"replicate me");

        let state = Arc::clone(&h.coordinator)
            .replicate_blob(cid)
            .await
            .expect("pipeline runs");

        assert!(state.complete);
        assert_eq!(state.confirmed_nodes.len(), 2);
        assert!(codec::verify_replication_state(&state));

        let meta = h.store.get_metadata(&cid).unwrap();
        assert_eq!(meta.replication.replicated_to.len(), 2);
        assert!(meta.replication.replicated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        // Fails twice, succeeds on the third attempt.
        let peers = vec![FlakyPeer::new("http://flaky", 2)];
        let h = harness(1, &peers);
        let cid = store_blob(&h.store, b"retry me");

        let state = Arc::clone(&h.coordinator)
            .replicate_blob(cid)
            .await
            .unwrap();

        assert!(state.complete);
        assert_eq!(peers[0].calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_peer_is_replaced_by_another_candidate() {
        let dead = FlakyPeer::new("http://dead", usize::MAX);
        let alive = FlakyPeer::new("http://alive", 0);
        let h = harness(1, &[Arc::clone(&dead), Arc::clone(&alive)]);
        let cid = store_blob(&h.store, b"failover");

        let state = Arc::clone(&h.coordinator)
            .replicate_blob(cid)
            .await
            .unwrap();

        assert!(state.complete);
        // Whichever of the two the selector ranked first, the confirmed
        // node must be the live one.
        assert!(state.confirmed_nodes.contains("http://alive"));
        assert!(!state.confirmed_nodes.contains("http://dead"));
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_stops_when_candidates_run_out() {
        let dead = FlakyPeer::new("http://dead", usize::MAX);
        let h = harness(2, &[dead]);
        let cid = store_blob(&h.store, b"stranded");

        let state = Arc::clone(&h.coordinator)
            .replicate_blob(cid)
            .await
            .unwrap();

        assert!(!state.complete);
        assert!(state.confirmed_nodes.is_empty());
    }

    #[tokio::test]
    async fn inbound_replication_verifies_cid() {
        let h = harness(1, &[]);

        let good = ReplicateRequest {
            cid: codec::cid(b"inbound payload"),
            ciphertext: peer::encode_ciphertext(b"inbound payload"),
            mime_type: "application/octet-stream".into(),
            from_peer: "http://origin".into(),
            content_type: None,
            guild_id: None,
        };
        let ack = h.coordinator.handle_inbound(good.clone()).await.unwrap();
        assert!(ack.success);
        assert!(!ack.already_stored);

        // Second push of the same blob is acknowledged idempotently.
        let again = h.coordinator.handle_inbound(good.clone()).await.unwrap();
        assert!(again.already_stored);

        // Declared CID that does not match the bytes is refused.
        let mut bad = good;
        bad.cid = codec::cid(b"something else");
        let err = h.coordinator.handle_inbound(bad).await.unwrap_err();
        assert_eq!(err.code(), "CID_MISMATCH");
    }

    #[tokio::test]
    async fn inbound_from_unregistered_peer_is_refused() {
        // Registry with nobody registered: every push is turned away,
        // regardless of any app-registry setting.
        let registry = Arc::new(StaticRegistry::new());
        registry.add_active_node("http://member.vault");
        let h = harness_with_registry(1, &[], registry);

        let push = |from_peer: &str| ReplicateRequest {
            cid: codec::cid(b"gated payload"),
            ciphertext: peer::encode_ciphertext(b"gated payload"),
            mime_type: "application/octet-stream".into(),
            from_peer: from_peer.into(),
            content_type: None,
            guild_id: None,
        };

        let err = h
            .coordinator
            .handle_inbound(push("http://stranger.vault"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NODE_NOT_REGISTERED");
        assert!(!h.store.has_blob(&codec::cid(b"gated payload")));

        let ack = h
            .coordinator
            .handle_inbound(push("http://member.vault"))
            .await
            .unwrap();
        assert!(ack.success);
    }

    #[tokio::test]
    async fn inbound_registry_outage_fails_closed() {
        let h = harness_with_registry(1, &[], Arc::new(crate::registry::FailingRegistry));
        let req = ReplicateRequest {
            cid: codec::cid(b"outage payload"),
            ciphertext: peer::encode_ciphertext(b"outage payload"),
            mime_type: "application/octet-stream".into(),
            from_peer: "http://origin".into(),
            content_type: None,
            guild_id: None,
        };
        let err = h.coordinator.handle_inbound(req).await.unwrap_err();
        assert_eq!(err.code(), "REGISTRATION_CHECK_FAILED");
    }

    #[tokio::test]
    async fn inbound_records_origin_peer() {
        let h = harness(1, &[]);
        let req = ReplicateRequest {
            cid: codec::cid(b"origin tracking"),
            ciphertext: peer::encode_ciphertext(b"origin tracking"),
            mime_type: "application/octet-stream".into(),
            from_peer: "http://origin.vault".into(),
            content_type: None,
            guild_id: None,
        };
        let ack = h.coordinator.handle_inbound(req).await.unwrap();
        let meta = h.store.get_metadata(&ack.cid).unwrap();
        assert_eq!(
            meta.replication.from_peer.as_deref(),
            Some("http://origin.vault")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tampered_state_is_surfaced_not_returned() {
        let peers = vec![FlakyPeer::new("http://n1", 0)];
        let h = harness(1, &peers);
        let cid = store_blob(&h.store, b"state integrity");

        Arc::clone(&h.coordinator).replicate_blob(cid).await.unwrap();
        let good = h.coordinator.verified_state(&cid).unwrap().unwrap();
        assert!(good.complete);

        // Corrupt the tracked member set behind the HMAC's back.
        {
            let mut states = h.coordinator.states.lock().unwrap();
            states
                .get_mut(&cid)
                .unwrap()
                .confirmed_nodes
                .insert("http://forged".into());
        }
        let err = h.coordinator.verified_state(&cid).unwrap_err();
        assert_eq!(err.code(), "REPLICATION_STATE_TAMPERED");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rediscovers_under_replicated_blobs() {
        let peers = vec![FlakyPeer::new("http://n1", 0)];
        let h = harness(1, &peers);

        // Stored but never replicated (as if the node crashed mid-flight).
        let _cid = store_blob(&h.store, b"forgotten");

        let swept = h.coordinator.sweep_under_replicated().await;
        assert_eq!(swept, 1);

        // Now satisfied: a second sweep has nothing to do.
        let swept = h.coordinator.sweep_under_replicated().await;
        assert_eq!(swept, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_deadline_returns_promptly() {
        // A peer that fails forever would block the pipeline on backoff;
        // the deadline variant must come back anyway.
        let dead = FlakyPeer::new("http://dead", usize::MAX);
        let h = harness(1, &[dead]);
        let cid = store_blob(&h.store, b"deadline");

        let state = h
            .coordinator
            .replicate_with_deadline(cid, Duration::from_secs(2))
            .await;
        // Whatever the background task has achieved so far, the call
        // itself returned; state may be absent or incomplete.
        if let Some(state) = state {
            assert!(!state.complete);
        }
    }
}
