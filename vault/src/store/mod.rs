//! On-disk content-addressed blob store.
//!
//! Layout under the data dir:
//!
//! ```text
//! dataDir/
//!   blobs/<cid>.enc       ciphertext, gzip-framed iff metadata.compressed
//!   meta/<cid>.json       BlobMetadata with integrity HMAC
//!   .vault-environment    environment marker
//! ```
//!
//! Writes are atomic: content goes to `<cid>.enc.tmp` first and is renamed
//! into place, metadata likewise. A failed store unlinks both files. Every
//! metadata read re-verifies the HMAC and fails with `MetadataTampered`
//! rather than returning a record that cannot be trusted.
//!
//! Mutating operations on one CID are serialized through a per-CID lock;
//! operations on distinct CIDs proceed concurrently.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, LruByteCache};
use crate::codec::{self, MetaVerdict};
use crate::config::{CacheConfig, StorageConfig};
use crate::error::{VaultError, VaultResult};
use crate::types::{
    BlobMetadata, BlobMetrics, Cid, METADATA_VERSION, ReplicationInfo, unix_millis,
};

const BLOB_SUFFIX: &str = ".enc";
const TMP_SUFFIX: &str = ".enc.tmp";
const ENV_MARKER_FILE: &str = ".vault-environment";

/// Environments that must never open a production data dir.
const NON_PRODUCTION: &[&str] = &["development", "test"];

/// Persisted `.vault-environment` marker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentMarker {
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    created_at: u64,
    last_started: u64,
    version: String,
}

/// Optional attributes attached to a blob at store time.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    pub sender: Option<String>,
    pub timestamp: Option<u64>,
    /// Set when the blob arrived via inbound replication.
    pub from_peer: Option<String>,
}

/// Result of a store call.
#[derive(Clone, Debug)]
pub struct StoreOutcome {
    pub cid: Cid,
    pub metadata: BlobMetadata,
    /// True when the blob was already present and the call was a no-op.
    pub already_stored: bool,
}

/// Aggregate usage numbers from walking the store.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub blob_count: u64,
    pub total_bytes: u64,
    pub pinned_count: u64,
    pub pinned_bytes: u64,
    pub max_storage_bytes: u64,
    pub cache: CacheStats,
}

/// Content-addressed blob store rooted at a data directory.
#[derive(Debug)]
pub struct BlobStore {
    data_dir: PathBuf,
    blobs_dir: PathBuf,
    meta_dir: PathBuf,
    compression_enabled: bool,
    max_blob_size_bytes: u64,
    max_storage_bytes: u64,
    /// Bytes currently on disk under `blobs/`, maintained incrementally.
    used_bytes: AtomicU64,
    cache: Mutex<LruByteCache>,
    cid_locks: Mutex<HashMap<Cid, Arc<Mutex<()>>>>,
}

impl BlobStore {
    /// Opens (or initializes) a store at the configured data dir.
    ///
    /// Fails with `EnvironmentMismatch` when a production data dir is
    /// opened by a development or test process.
    pub fn open(
        storage: &StorageConfig,
        cache: &CacheConfig,
        node_id: Option<&str>,
    ) -> VaultResult<Self> {
        let data_dir = storage.data_dir.clone();
        let blobs_dir = data_dir.join("blobs");
        let meta_dir = data_dir.join("meta");
        fs::create_dir_all(&blobs_dir)?;
        fs::create_dir_all(&meta_dir)?;

        check_environment_marker(&data_dir, &storage.environment, node_id)?;

        let used = walk_dir_bytes(&blobs_dir)?;
        tracing::info!(
            data_dir = %data_dir.display(),
            used_bytes = used,
            "blob store opened"
        );

        Ok(Self {
            data_dir,
            blobs_dir,
            meta_dir,
            compression_enabled: storage.compression_enabled,
            max_blob_size_bytes: storage.max_blob_size_bytes,
            max_storage_bytes: storage.max_storage_bytes,
            used_bytes: AtomicU64::new(used),
            cache: Mutex::new(LruByteCache::new(cache.size_bytes)),
            cid_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root data directory (shared with the proof service and config).
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether both the blob file and its metadata exist.
    pub fn has_blob(&self, cid: &Cid) -> bool {
        self.blob_path(cid).exists() && self.meta_path(cid).exists()
    }

    /// Stores a ciphertext, computing its CID. Idempotent: a second store
    /// of the same content short-circuits without touching disk.
    pub fn store_blob(
        &self,
        ciphertext: &[u8],
        mime_type: &str,
        opts: StoreOptions,
    ) -> VaultResult<StoreOutcome> {
        let size = ciphertext.len() as u64;
        if size > self.max_blob_size_bytes {
            return Err(VaultError::PayloadTooLarge(format!(
                "{size} bytes exceeds max blob size {}",
                self.max_blob_size_bytes
            )));
        }

        let cid = codec::cid(ciphertext);
        let lock = self.cid_lock(&cid);
        let _guard = lock.lock().expect("cid lock poisoned");

        if self.has_blob(&cid) {
            let metadata = self.read_meta_verified(&cid)?;
            return Ok(StoreOutcome {
                cid,
                metadata,
                already_stored: true,
            });
        }

        let used = self.used_bytes.load(Ordering::Acquire);
        if used + size > self.max_storage_bytes {
            return Err(VaultError::CapacityExceeded(format!(
                "{used} bytes used + {size} incoming exceeds cap {}",
                self.max_storage_bytes
            )));
        }

        // Gzip only pays off when the frame is actually smaller.
        let (on_disk, compressed): (std::borrow::Cow<'_, [u8]>, bool) =
            if self.compression_enabled {
                match gzip(ciphertext) {
                    Ok(packed) if (packed.len() as u64) < size => (packed.into(), true),
                    _ => (ciphertext.into(), false),
                }
            } else {
                (ciphertext.into(), false)
            };

        let created_at = unix_millis();
        let metadata = BlobMetadata {
            cid,
            size,
            mime_type: mime_type.to_string(),
            created_at,
            version: METADATA_VERSION,
            compressed,
            pinned: false,
            app_id: opts.app_id,
            content_type: opts.content_type,
            sender: opts.sender,
            timestamp: opts.timestamp,
            replication: ReplicationInfo {
                from_peer: opts.from_peer,
                ..ReplicationInfo::default()
            },
            metrics: BlobMetrics::default(),
            integrity_hash: Some(codec::meta_hash(
                &cid,
                size,
                mime_type,
                created_at,
                false,
            )),
        };

        if let Err(e) = self.write_blob_and_meta(&cid, &on_disk, &metadata) {
            // Leave no partial state behind.
            let _ = fs::remove_file(self.tmp_path(&cid));
            let _ = fs::remove_file(self.blob_path(&cid));
            let _ = fs::remove_file(self.meta_path(&cid));
            return Err(e);
        }

        self.used_bytes
            .fetch_add(on_disk.len() as u64, Ordering::AcqRel);
        self.cache_insert(cid, ciphertext.to_vec());

        tracing::debug!(%cid, size, compressed, "stored blob");
        Ok(StoreOutcome {
            cid,
            metadata,
            already_stored: false,
        })
    }

    /// Reads a blob and its verified metadata.
    pub fn get_blob(&self, cid: &Cid) -> VaultResult<(Arc<Vec<u8>>, BlobMetadata)> {
        if let Some(bytes) = self.cache.lock().expect("cache mutex poisoned").get(cid) {
            let metadata = self.read_meta_verified(cid)?;
            return Ok((bytes, metadata));
        }

        let metadata = self.read_meta_verified(cid)?;
        let raw = fs::read(self.blob_path(cid)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::BlobNotFound(cid.to_hex())
            } else {
                VaultError::from(e)
            }
        })?;

        let bytes = if metadata.compressed {
            gunzip(&raw)?
        } else {
            raw
        };

        let shared = Arc::new(bytes);
        self.cache_insert_shared(*cid, Arc::clone(&shared));
        Ok((shared, metadata))
    }

    /// Reads and verifies a metadata record without touching the blob.
    pub fn get_metadata(&self, cid: &Cid) -> VaultResult<BlobMetadata> {
        self.read_meta_verified(cid)
    }

    /// Applies a mutation to the metadata record under the per-CID lock.
    ///
    /// The integrity hash is regenerated only when a field it covers
    /// (`pinned`, `size`, `mimeType`, `createdAt`) actually changed.
    pub fn update_metadata(
        &self,
        cid: &Cid,
        mutate: impl FnOnce(&mut BlobMetadata),
    ) -> VaultResult<BlobMetadata> {
        let lock = self.cid_lock(cid);
        let _guard = lock.lock().expect("cid lock poisoned");

        let mut meta = self.read_meta_verified(cid)?;
        let before = (meta.pinned, meta.size, meta.mime_type.clone(), meta.created_at);
        mutate(&mut meta);
        // The record's identity never changes through this path.
        meta.cid = *cid;

        if (meta.pinned, meta.size, meta.mime_type.clone(), meta.created_at) != before {
            meta.integrity_hash = Some(codec::meta_hash(
                cid,
                meta.size,
                &meta.mime_type,
                meta.created_at,
                meta.pinned,
            ));
        }

        self.write_meta(cid, &meta)?;
        Ok(meta)
    }

    /// Marks a blob GC-ineligible. Idempotent.
    pub fn pin_blob(&self, cid: &Cid) -> VaultResult<BlobMetadata> {
        self.update_metadata(cid, |meta| meta.pinned = true)
    }

    /// Clears the pin flag. Idempotent.
    pub fn unpin_blob(&self, cid: &Cid) -> VaultResult<BlobMetadata> {
        self.update_metadata(cid, |meta| meta.pinned = false)
    }

    /// Best-effort retrieval-metrics bump; callers may run it off the
    /// response path.
    pub fn record_retrieval(&self, cid: &Cid, latency_ms: f64) {
        let result = self.update_metadata(cid, |meta| {
            let n = meta.metrics.retrieval_count as f64;
            meta.metrics.avg_latency = (meta.metrics.avg_latency * n + latency_ms) / (n + 1.0);
            meta.metrics.retrieval_count += 1;
            meta.metrics.last_accessed = unix_millis();
        });
        if let Err(e) = result {
            tracing::warn!(%cid, error = %e, "failed to record retrieval metrics");
        }
    }

    /// Deletes a blob and its metadata.
    pub fn delete_blob(&self, cid: &Cid) -> VaultResult<()> {
        let lock = self.cid_lock(cid);
        let _guard = lock.lock().expect("cid lock poisoned");

        let blob_path = self.blob_path(cid);
        if !blob_path.exists() {
            return Err(VaultError::BlobNotFound(cid.to_hex()));
        }

        let reclaimed = fs::metadata(&blob_path).map(|m| m.len()).unwrap_or(0);
        fs::remove_file(&blob_path)?;
        if let Err(e) = fs::remove_file(self.meta_path(cid)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        self.used_bytes.fetch_sub(
            reclaimed.min(self.used_bytes.load(Ordering::Acquire)),
            Ordering::AcqRel,
        );
        self.cache.lock().expect("cache mutex poisoned").delete(cid);
        tracing::debug!(%cid, reclaimed, "deleted blob");
        Ok(())
    }

    /// Every metadata record on disk, each independently verified.
    ///
    /// Failed entries are returned as errors so callers can decide; GC for
    /// instance refuses to touch a blob whose record will not verify.
    pub fn list_metadata(&self) -> Vec<(Cid, VaultResult<BlobMetadata>)> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.meta_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "cannot read metadata dir");
                return out;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(cid) = Cid::parse(stem) else {
                continue;
            };
            out.push((cid, self.read_meta_verified(&cid)));
        }
        out
    }

    /// All pinned blobs.
    pub fn list_pinned_blobs(&self) -> Vec<BlobMetadata> {
        self.list_metadata()
            .into_iter()
            .filter_map(|(cid, result)| match result {
                Ok(meta) if meta.pinned => Some(meta),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(%cid, error = %e, "unreadable metadata while listing pins");
                    None
                }
            })
            .collect()
    }

    /// Walks the store and summarizes usage.
    pub fn stats(&self) -> VaultResult<StoreStats> {
        let total_bytes = walk_dir_bytes(&self.blobs_dir)?;
        let mut blob_count = 0u64;
        let mut pinned_count = 0u64;
        let mut pinned_bytes = 0u64;

        for (_, result) in self.list_metadata() {
            blob_count += 1;
            if let Ok(meta) = result {
                if meta.pinned {
                    pinned_count += 1;
                    pinned_bytes += meta.size;
                }
            }
        }

        let cache = self.cache.lock().expect("cache mutex poisoned").stats();
        Ok(StoreStats {
            blob_count,
            total_bytes,
            pinned_count,
            pinned_bytes,
            max_storage_bytes: self.max_storage_bytes,
            cache,
        })
    }

    /// Bytes currently used under `blobs/` per the incremental counter.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Configured storage cap.
    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_bytes
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().expect("cache mutex poisoned").stats()
    }

    // ---- internals ------------------------------------------------------

    fn blob_path(&self, cid: &Cid) -> PathBuf {
        self.blobs_dir.join(format!("{cid}{BLOB_SUFFIX}"))
    }

    fn tmp_path(&self, cid: &Cid) -> PathBuf {
        self.blobs_dir.join(format!("{cid}{TMP_SUFFIX}"))
    }

    fn meta_path(&self, cid: &Cid) -> PathBuf {
        self.meta_dir.join(format!("{cid}.json"))
    }

    fn cid_lock(&self, cid: &Cid) -> Arc<Mutex<()>> {
        let mut locks = self.cid_locks.lock().expect("lock map poisoned");
        Arc::clone(locks.entry(*cid).or_default())
    }

    fn cache_insert(&self, cid: Cid, bytes: Vec<u8>) {
        self.cache_insert_shared(cid, Arc::new(bytes));
    }

    fn cache_insert_shared(&self, cid: Cid, bytes: Arc<Vec<u8>>) {
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .set(cid, bytes);
    }

    fn write_blob_and_meta(
        &self,
        cid: &Cid,
        on_disk: &[u8],
        metadata: &BlobMetadata,
    ) -> VaultResult<()> {
        let tmp = self.tmp_path(cid);
        fs::write(&tmp, on_disk)?;
        fs::rename(&tmp, self.blob_path(cid))?;
        self.write_meta(cid, metadata)
    }

    fn write_meta(&self, cid: &Cid, metadata: &BlobMetadata) -> VaultResult<()> {
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| VaultError::Internal(format!("serialize metadata: {e}")))?;
        let tmp = self.meta_dir.join(format!("{cid}.json.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.meta_path(cid))?;
        Ok(())
    }

    fn read_meta_verified(&self, cid: &Cid) -> VaultResult<BlobMetadata> {
        let raw = fs::read_to_string(self.meta_path(cid)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::BlobNotFound(cid.to_hex())
            } else {
                VaultError::from(e)
            }
        })?;
        let meta: BlobMetadata = serde_json::from_str(&raw)
            .map_err(|e| VaultError::MetadataTampered(format!("{cid}: unparseable record: {e}")))?;

        if meta.cid != *cid {
            return Err(VaultError::MetadataTampered(format!(
                "{cid}: record claims cid {}",
                meta.cid
            )));
        }
        match codec::verify_meta(&meta) {
            MetaVerdict::Ok => Ok(meta),
            MetaVerdict::LegacyNoHash => {
                tracing::warn!(%cid, "metadata predates integrity hashing");
                Ok(meta)
            }
            MetaVerdict::HashMismatch => Err(VaultError::MetadataTampered(format!(
                "{cid}: integrity hash mismatch"
            ))),
        }
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> VaultResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| VaultError::Internal(format!("gunzip failed: {e}")))?;
    Ok(out)
}

fn walk_dir_bytes(dir: &Path) -> VaultResult<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)?.flatten() {
        if let Ok(meta) = entry.metadata() {
            if meta.is_file() {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

fn check_environment_marker(
    data_dir: &Path,
    current_env: &str,
    node_id: Option<&str>,
) -> VaultResult<()> {
    let path = data_dir.join(ENV_MARKER_FILE);
    let now = unix_millis();

    if path.exists() {
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str::<EnvironmentMarker>(&raw) {
            Ok(mut marker) => {
                if marker.environment == "production"
                    && NON_PRODUCTION.contains(&current_env)
                {
                    return Err(VaultError::EnvironmentMismatch {
                        on_disk: marker.environment,
                        current: current_env.to_string(),
                    });
                }
                if marker.environment != current_env {
                    tracing::warn!(
                        on_disk = %marker.environment,
                        current = %current_env,
                        "environment transition on existing data dir"
                    );
                }
                marker.environment = current_env.to_string();
                marker.last_started = now;
                marker.version = env!("CARGO_PKG_VERSION").to_string();
                if let Some(id) = node_id {
                    marker.node_id = Some(id.to_string());
                }
                let json = serde_json::to_string_pretty(&marker)
                    .map_err(|e| VaultError::Internal(format!("serialize env marker: {e}")))?;
                fs::write(&path, json)?;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable environment marker, rewriting");
            }
        }
    }

    let marker = EnvironmentMarker {
        environment: current_env.to_string(),
        node_id: node_id.map(str::to_string),
        created_at: now,
        last_started: now,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let json = serde_json::to_string_pretty(&marker)
        .map_err(|e| VaultError::Internal(format!("serialize env marker: {e}")))?;
    fs::write(&path, json)?;
    Ok(())
}
