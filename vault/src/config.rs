//! Typed node configuration.
//!
//! This module aggregates configuration for identity, networking, sharding,
//! replication, storage, garbage collection, caching, admission, and
//! observability into a single [`VaultConfig`] that binaries construct from
//! defaults or from a persisted `config.json`.
//!
//! The persisted file is a flat JSON object with camelCase keys (see
//! [`ConfigFile`]); unknown keys are ignored with a warning rather than
//! rejected, so configs survive version skew in both directions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::ShardAssignment;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Node identity as configured (the keypair itself lives in `node-key.json`).
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    pub node_id: Option<String>,
    /// Registered public key; unset means the node is not yet configured
    /// and every store is refused with `NODE_NOT_CONFIGURED`.
    pub public_key: Option<String>,
    pub owner_address: Option<String>,
}

/// HTTP endpoint configuration.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub port: u16,
    /// Externally reachable URL of this node, advertised to peers.
    pub node_url: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            node_url: None,
        }
    }
}

/// Sharding of the CID space.
#[derive(Clone, Debug)]
pub struct ShardConfig {
    pub shard_count: u32,
    /// This node's slice; `None` stores everything.
    pub assignment: Option<ShardAssignment>,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            assignment: None,
        }
    }
}

/// Replication policy.
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    pub factor: usize,
    pub enabled: bool,
    /// Per-attempt timeout for outbound replication RPCs.
    pub attempt_timeout_ms: u64,
    pub bootstrap_peers: Vec<String>,
    pub relay_peers: Vec<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            factor: 3,
            enabled: true,
            attempt_timeout_ms: 10_000,
            bootstrap_peers: Vec::new(),
            relay_peers: Vec::new(),
        }
    }
}

/// On-disk storage limits and behavior.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub max_storage_bytes: u64,
    pub max_blob_size_bytes: u64,
    pub compression_enabled: bool,
    /// Deployment environment recorded in the `.vault-environment` marker.
    pub environment: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/vault"),
            max_storage_bytes: 10 * GIB,
            max_blob_size_bytes: 100 * MIB,
            compression_enabled: true,
            environment: "development".to_string(),
        }
    }
}

/// Retention strategy for the garbage collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcMode {
    Size,
    Time,
    Hybrid,
}

/// Garbage-collection policy.
#[derive(Clone, Debug)]
pub struct GcConfig {
    pub enabled: bool,
    pub retention_mode: GcMode,
    /// Target cap on blob bytes; GC reclaims toward it.
    pub max_storage_bytes: u64,
    pub max_blob_age_ms: u64,
    pub min_free_disk_bytes: u64,
    pub reserved_for_pinned_bytes: u64,
    pub interval_minutes: u64,
    /// Active replicas required before an unpinned blob may be deleted.
    pub required_replicas: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_mode: GcMode::Hybrid,
            max_storage_bytes: 8 * GIB,
            max_blob_age_ms: 30 * 24 * 3600 * 1000,
            min_free_disk_bytes: GIB,
            reserved_for_pinned_bytes: 2 * GIB,
            interval_minutes: 60,
            required_replicas: 2,
        }
    }
}

/// Blob cache sizing.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_bytes: 100 * MIB,
        }
    }
}

/// Store-admission policy knobs.
#[derive(Clone, Debug, Default)]
pub struct AdmissionConfig {
    /// App ids allowed to store; empty means no app filter.
    pub allowed_apps: Vec<String>,
    /// Consult the registry's sender authorization on every store.
    pub require_app_registry: bool,
    /// Enable the local ban list on retrieval.
    pub enable_blocked_content: bool,
}

/// Content filtering applied at admission.
#[derive(Clone, Debug, Default)]
pub struct ContentFilter {
    /// Accepted content types; `None` accepts everything.
    pub types: Option<Vec<String>>,
    /// When set, only these guilds may store.
    pub allowed_guilds: Option<Vec<String>>,
    pub blocked_guilds: Vec<String>,
}

/// Logging and metrics.
#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Top-level configuration for a vault node.
#[derive(Clone, Debug, Default)]
pub struct VaultConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub shard: ShardConfig,
    pub replication: ReplicationConfig,
    pub storage: StorageConfig,
    pub gc: GcConfig,
    pub cache: CacheConfig,
    pub admission: AdmissionConfig,
    pub content_filter: ContentFilter,
    pub observability: ObservabilityConfig,
}

/// Nested `contentFilter` object in `config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentFilterFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_guilds: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_guilds: Option<Vec<String>>,
}

/// Flat persisted form of the config (`config.json`).
///
/// All keys are optional except the peer lists. Unknown keys land in
/// `unknown` and are warned about on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_shards: Option<ShardAssignment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_timeout_ms: Option<u64>,

    pub p2p_bootstrap_peers: Vec<String>,
    pub p2p_relay_peers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_storage_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_storage_gb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_blob_size_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_retention_mode: Option<GcMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_max_storage_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_max_blob_age_days: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_min_free_disk_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_reserved_for_pinned_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_interval_minutes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_apps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_app_registry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_blocked_content: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_filter: Option<ContentFilterFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_enabled: Option<bool>,

    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl VaultConfig {
    /// Loads configuration from `config.json` at `path`, falling back to
    /// defaults when the file does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|e| {
            VaultError::InvalidRequest(format!("config file {} is invalid: {e}", path.display()))
        })?;
        for key in file.unknown.keys() {
            tracing::warn!(key, "ignoring unrecognized config key");
        }
        Ok(Self::from_file(file))
    }

    /// Applies a parsed [`ConfigFile`] over the defaults.
    pub fn from_file(file: ConfigFile) -> Self {
        let mut cfg = Self::default();

        cfg.identity.node_id = file.node_id;
        cfg.identity.public_key = file.public_key;
        cfg.identity.owner_address = file.owner_address;

        if let Some(port) = file.port {
            cfg.network.port = port;
        }
        cfg.network.node_url = file.node_url;

        if let Some(n) = file.shard_count {
            cfg.shard.shard_count = n.max(1);
        }
        cfg.shard.assignment = file.node_shards;

        if let Some(factor) = file.replication_factor {
            cfg.replication.factor = factor;
        }
        if let Some(enabled) = file.replication_enabled {
            cfg.replication.enabled = enabled;
        }
        if let Some(ms) = file.replication_timeout_ms {
            cfg.replication.attempt_timeout_ms = ms;
        }
        cfg.replication.bootstrap_peers = file.p2p_bootstrap_peers;
        cfg.replication.relay_peers = file.p2p_relay_peers;

        // GB wins over MB when both are present.
        if let Some(gb) = file.max_storage_gb {
            cfg.storage.max_storage_bytes = gb * GIB;
        } else if let Some(mb) = file.max_storage_mb {
            cfg.storage.max_storage_bytes = mb * MIB;
        }
        if let Some(mb) = file.max_blob_size_mb {
            cfg.storage.max_blob_size_bytes = mb * MIB;
        }
        if let Some(dir) = file.data_dir {
            cfg.storage.data_dir = dir;
        }
        if let Some(enabled) = file.compression_enabled {
            cfg.storage.compression_enabled = enabled;
        }

        if let Some(enabled) = file.gc_enabled {
            cfg.gc.enabled = enabled;
        }
        if let Some(mode) = file.gc_retention_mode {
            cfg.gc.retention_mode = mode;
        }
        if let Some(mb) = file.gc_max_storage_mb {
            cfg.gc.max_storage_bytes = mb * MIB;
        }
        if let Some(days) = file.gc_max_blob_age_days {
            cfg.gc.max_blob_age_ms = days * 24 * 3600 * 1000;
        }
        if let Some(mb) = file.gc_min_free_disk_mb {
            cfg.gc.min_free_disk_bytes = mb * MIB;
        }
        if let Some(mb) = file.gc_reserved_for_pinned_mb {
            cfg.gc.reserved_for_pinned_bytes = mb * MIB;
        }
        if let Some(minutes) = file.gc_interval_minutes {
            cfg.gc.interval_minutes = minutes;
        }
        cfg.gc.required_replicas = cfg.replication.factor.saturating_sub(1).max(1);

        if let Some(mb) = file.cache_size_mb {
            cfg.cache.size_bytes = mb * MIB;
        }

        if let Some(apps) = file.allowed_apps {
            cfg.admission.allowed_apps = apps;
        }
        if let Some(required) = file.require_app_registry {
            cfg.admission.require_app_registry = required;
        }
        if let Some(enabled) = file.enable_blocked_content {
            cfg.admission.enable_blocked_content = enabled;
        }

        if let Some(filter) = file.content_filter {
            cfg.content_filter.types = filter.types;
            cfg.content_filter.allowed_guilds = filter.allowed_guilds;
            cfg.content_filter.blocked_guilds = filter.blocked_guilds.unwrap_or_default();
        }

        if let Some(level) = file.log_level {
            cfg.observability.log_level = level;
        }
        if let Some(enabled) = file.metrics_enabled {
            cfg.observability.metrics_enabled = enabled;
        }

        cfg
    }

    /// Writes the current configuration back out as `config.json`.
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let file = self.to_file();
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| VaultError::Internal(format!("serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    fn to_file(&self) -> ConfigFile {
        ConfigFile {
            node_id: self.identity.node_id.clone(),
            public_key: self.identity.public_key.clone(),
            owner_address: self.identity.owner_address.clone(),
            port: Some(self.network.port),
            node_url: self.network.node_url.clone(),
            shard_count: Some(self.shard.shard_count),
            node_shards: self.shard.assignment.clone(),
            replication_factor: Some(self.replication.factor),
            replication_enabled: Some(self.replication.enabled),
            replication_timeout_ms: Some(self.replication.attempt_timeout_ms),
            p2p_bootstrap_peers: self.replication.bootstrap_peers.clone(),
            p2p_relay_peers: self.replication.relay_peers.clone(),
            max_storage_mb: Some(self.storage.max_storage_bytes / MIB),
            max_storage_gb: None,
            max_blob_size_mb: Some(self.storage.max_blob_size_bytes / MIB),
            data_dir: Some(self.storage.data_dir.clone()),
            gc_enabled: Some(self.gc.enabled),
            gc_retention_mode: Some(self.gc.retention_mode),
            gc_max_storage_mb: Some(self.gc.max_storage_bytes / MIB),
            gc_max_blob_age_days: Some(self.gc.max_blob_age_ms / (24 * 3600 * 1000)),
            gc_min_free_disk_mb: Some(self.gc.min_free_disk_bytes / MIB),
            gc_reserved_for_pinned_mb: Some(self.gc.reserved_for_pinned_bytes / MIB),
            gc_interval_minutes: Some(self.gc.interval_minutes),
            cache_size_mb: Some(self.cache.size_bytes / MIB),
            compression_enabled: Some(self.storage.compression_enabled),
            allowed_apps: if self.admission.allowed_apps.is_empty() {
                None
            } else {
                Some(self.admission.allowed_apps.clone())
            },
            require_app_registry: Some(self.admission.require_app_registry),
            enable_blocked_content: Some(self.admission.enable_blocked_content),
            content_filter: Some(ContentFilterFile {
                types: self.content_filter.types.clone(),
                allowed_guilds: self.content_filter.allowed_guilds.clone(),
                blocked_guilds: if self.content_filter.blocked_guilds.is_empty() {
                    None
                } else {
                    Some(self.content_filter.blocked_guilds.clone())
                },
            }),
            log_level: Some(self.observability.log_level.clone()),
            metrics_enabled: Some(self.observability.metrics_enabled),
            unknown: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let cfg = VaultConfig::default();
        assert_eq!(cfg.replication.factor, 3);
        assert_eq!(cfg.shard.shard_count, 16);
        assert!(cfg.storage.compression_enabled);
        assert_eq!(cfg.gc.retention_mode, GcMode::Hybrid);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = VaultConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(cfg.network.port, 8081);
    }

    #[test]
    fn parses_recognized_keys() {
        let json = r#"{
            "nodeId": "node-7",
            "publicKey": "aa",
            "port": 9000,
            "shardCount": 32,
            "nodeShards": [{"start": 0, "end": 7}],
            "replicationFactor": 5,
            "p2pBootstrapPeers": ["http://peer1"],
            "p2pRelayPeers": [],
            "maxStorageGB": 2,
            "gcRetentionMode": "time",
            "cacheSizeMB": 10,
            "contentFilter": {"types": ["message"], "blockedGuilds": ["g1"]}
        }"#;
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        let cfg = VaultConfig::from_file(file);

        assert_eq!(cfg.identity.node_id.as_deref(), Some("node-7"));
        assert_eq!(cfg.network.port, 9000);
        assert_eq!(cfg.shard.shard_count, 32);
        assert!(cfg.shard.assignment.expect("assignment").contains(5));
        assert_eq!(cfg.replication.factor, 5);
        assert_eq!(cfg.replication.bootstrap_peers, vec!["http://peer1"]);
        assert_eq!(cfg.storage.max_storage_bytes, 2 * GIB);
        assert_eq!(cfg.gc.retention_mode, GcMode::Time);
        assert_eq!(cfg.cache.size_bytes, 10 * MIB);
        assert_eq!(cfg.content_filter.types, Some(vec!["message".to_string()]));
        assert_eq!(cfg.content_filter.blocked_guilds, vec!["g1"]);
    }

    #[test]
    fn unknown_keys_survive_parsing() {
        let json = r#"{
            "p2pBootstrapPeers": [],
            "p2pRelayPeers": [],
            "somethingNew": 42
        }"#;
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        assert!(file.unknown.contains_key("somethingNew"));
        // Still applies cleanly over defaults.
        let _ = VaultConfig::from_file(file);
    }

    #[test]
    fn peer_lists_are_required() {
        let err = serde_json::from_str::<ConfigFile>("{}");
        assert!(err.is_err(), "peer lists must be present");
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");

        let mut cfg = VaultConfig::default();
        cfg.identity.node_id = Some("node-42".into());
        cfg.replication.factor = 4;
        cfg.save(&path).unwrap();

        let loaded = VaultConfig::load(&path).unwrap();
        assert_eq!(loaded.identity.node_id.as_deref(), Some("node-42"));
        assert_eq!(loaded.replication.factor, 4);
    }
}
