//! Vault engine library crate.
//!
//! This crate provides the core building blocks of a content-addressed
//! encrypted-blob vault node:
//!
//! - strongly-typed domain types (`types`),
//! - the CID and integrity codec (`codec`),
//! - Ed25519 identity and proof primitives (`crypto`),
//! - deterministic sharding and replica selection (`shard`, `selector`),
//! - the on-disk blob store with LRU caching (`store`, `cache`),
//! - the replication coordinator and peer abstraction (`replication`, `peer`),
//! - the storage-proof service (`proof_service`),
//! - the append-only signed feed log (`feed`),
//! - node reputation (`reputation`),
//! - the garbage collector (`gc`),
//! - content indexes (`index`),
//! - admission policy and the registry seam (`admission`, `registry`),
//! - Prometheus-based metrics (`metrics`),
//! - and top-level node configuration (`config`).
//!
//! Higher-level binaries (the HTTP gateway) compose these pieces into a
//! full vault node.

pub mod admission;
pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod feed;
pub mod gc;
pub mod index;
pub mod metrics;
pub mod peer;
pub mod proof_service;
pub mod registry;
pub mod replication;
pub mod reputation;
pub mod selector;
pub mod shard;
pub mod store;
pub mod types;

// Re-export the error pair everything returns.
pub use error::{VaultError, VaultResult};

// Re-export top-level configuration types.
pub use config::{
    AdmissionConfig, CacheConfig, ContentFilter, GcConfig, GcMode, IdentityConfig,
    NetworkConfig, ObservabilityConfig, ReplicationConfig, ShardConfig, StorageConfig,
    VaultConfig,
};

// Re-export the "core" engine types and traits.
pub use admission::{AdmissionPolicy, BanList, StoreContext};
pub use feed::{FeedLog, FeedPage, FeedValidation, ForkResolution};
pub use gc::{GcEngine, GcReport, GcStatus};
pub use index::{IndexPage, Indexer, ThreadDelta};
pub use peer::{
    HttpPeer, Peer, PeerDirectory, PeerHealth, PeerNodeInfo, ProofRequest, ProofResponse,
    ReplicateAck, ReplicateRequest, RetrieveResponse,
};
pub use proof_service::ProofService;
pub use registry::{RegistryAdapter, StaticRegistry};
pub use replication::{KnownPeer, ReplicationCoordinator};
pub use reputation::{ReputationEventType, ReputationSnapshot, ReputationTracker};
pub use selector::{CandidateNode, Selection};
pub use store::{BlobStore, StoreOptions, StoreOutcome, StoreStats};

// Re-export metrics registry and exporter.
pub use metrics::{MetricsRegistry, VaultMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;
