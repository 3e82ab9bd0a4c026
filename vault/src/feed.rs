//! Append-only signed multi-writer feed log.
//!
//! A feed is a DAG of signed entries, each referencing a locally stored
//! blob and linking to its parent entry by CID. Entries are kept in an
//! arena keyed by `(feedId, cid)` with the parent as a key, not a pointer;
//! fork resolution is a graph walk over that arena.
//!
//! Acceptance rules for an entry:
//! - the referenced blob must already exist locally,
//! - the author key must be in the feed's writer set,
//! - the Ed25519 signature must verify over the canonical entry JSON
//!   (`{feedId, cid, parentCid, timestamp, authorKey}` in that order),
//! - the first accepted entry fixes `rootCid` forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::crypto;
use crate::error::{VaultError, VaultResult};
use crate::store::BlobStore;
use crate::types::{Cid, FeedEntry, FeedMetadata, FeedType, unix_millis};

/// Default page size for feed event queries.
pub const DEFAULT_EVENT_LIMIT: usize = 50;

/// Canonical signing payload; field order is the wire contract.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalEntry<'a> {
    feed_id: &'a str,
    cid: &'a Cid,
    parent_cid: &'a Option<Cid>,
    timestamp: u64,
    author_key: &'a str,
}

/// Bytes a feed entry signature covers.
pub fn entry_signing_bytes(
    feed_id: &str,
    cid: &Cid,
    parent_cid: &Option<Cid>,
    timestamp: u64,
    author_key: &str,
) -> Vec<u8> {
    let canonical = CanonicalEntry {
        feed_id,
        cid,
        parent_cid,
        timestamp,
        author_key,
    };
    serde_json::to_vec(&canonical).expect("canonical entry is always serializable")
}

struct FeedState {
    meta: FeedMetadata,
    /// Entries in acceptance order.
    entries: Vec<FeedEntry>,
    by_cid: HashMap<Cid, usize>,
}

/// One page of feed events, newest first.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub events: Vec<FeedEntry>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of a full feed re-validation.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Result of fork resolution.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkResolution {
    /// Root-to-tip CIDs of the winning branch.
    pub winning_chain: Vec<Cid>,
    pub reason: String,
}

/// In-memory multi-feed log backed by the blob store for existence checks.
pub struct FeedLog {
    store: Arc<BlobStore>,
    feeds: Mutex<HashMap<String, FeedState>>,
}

impl FeedLog {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an empty feed with a fixed writer set.
    pub fn create_feed(
        &self,
        feed_id: &str,
        feed_type: FeedType,
        writers: Vec<String>,
    ) -> VaultResult<FeedMetadata> {
        if writers.is_empty() {
            return Err(VaultError::InvalidRequest(
                "feed requires at least one writer".into(),
            ));
        }

        let mut feeds = self.feeds.lock().expect("feed log mutex poisoned");
        if feeds.contains_key(feed_id) {
            return Err(VaultError::FeedExists(feed_id.to_string()));
        }

        let now = unix_millis();
        let meta = FeedMetadata {
            feed_id: feed_id.to_string(),
            feed_type,
            writers,
            root_cid: None,
            entry_count: 0,
            created_at: now,
            last_updated_at: now,
        };
        feeds.insert(
            feed_id.to_string(),
            FeedState {
                meta: meta.clone(),
                entries: Vec::new(),
                by_cid: HashMap::new(),
            },
        );
        tracing::debug!(feed_id, "created feed");
        Ok(meta)
    }

    /// Validates and appends an entry.
    pub fn add_entry(&self, entry: FeedEntry) -> VaultResult<FeedMetadata> {
        // Existence check happens outside the feed lock; the blob store
        // has its own synchronization.
        if !self.store.has_blob(&entry.cid) {
            return Err(VaultError::BlobNotFound(entry.cid.to_hex()));
        }

        let mut feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let state = feeds
            .get_mut(&entry.feed_id)
            .ok_or_else(|| VaultError::FeedNotFound(entry.feed_id.clone()))?;

        if !state.meta.writers.iter().any(|w| w == &entry.author_key) {
            return Err(VaultError::FeedUnauthorized(format!(
                "author {} is not a writer of feed {}",
                entry.author_key, entry.feed_id
            )));
        }

        let message = entry_signing_bytes(
            &entry.feed_id,
            &entry.cid,
            &entry.parent_cid,
            entry.timestamp,
            &entry.author_key,
        );
        crypto::verify_detached(&message, &entry.signature, &entry.author_key)?;

        if state.by_cid.contains_key(&entry.cid) {
            return Err(VaultError::InvalidRequest(format!(
                "entry {} already present in feed {}",
                entry.cid, entry.feed_id
            )));
        }

        if state.meta.root_cid.is_none() {
            state.meta.root_cid = Some(entry.cid);
        }
        state.by_cid.insert(entry.cid, state.entries.len());
        state.entries.push(entry);
        state.meta.entry_count += 1;
        state.meta.last_updated_at = unix_millis();

        Ok(state.meta.clone())
    }

    /// Feed header, if the feed exists.
    pub fn get_feed(&self, feed_id: &str) -> VaultResult<FeedMetadata> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        feeds
            .get(feed_id)
            .map(|s| s.meta.clone())
            .ok_or_else(|| VaultError::FeedNotFound(feed_id.to_string()))
    }

    /// Newest-first page of events.
    ///
    /// The cursor is opaque; pass the one returned by the previous page to
    /// continue. `has_more` is true iff at least one entry lies strictly
    /// beyond the returned page.
    pub fn get_feed_events(
        &self,
        feed_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> VaultResult<FeedPage> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let state = feeds
            .get(feed_id)
            .ok_or_else(|| VaultError::FeedNotFound(feed_id.to_string()))?;

        let limit = if limit == 0 { DEFAULT_EVENT_LIMIT } else { limit };

        // Acceptance order is append order; newest-first walks from the
        // tail. The cursor is the sequence number of the last entry served.
        let start_seq = match cursor {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                VaultError::InvalidRequest(format!("malformed feed cursor: {raw}"))
            })?,
            None => state.entries.len(),
        };
        let start_seq = start_seq.min(state.entries.len());

        let events: Vec<FeedEntry> = state.entries[..start_seq]
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect();
        let consumed = events.len();
        let next_seq = start_seq - consumed;
        let has_more = next_seq > 0;

        Ok(FeedPage {
            events,
            has_more,
            cursor: has_more.then(|| next_seq.to_string()),
        })
    }

    /// All CIDs referenced by a feed, in acceptance order.
    pub fn get_feed_blobs(&self, feed_id: &str) -> VaultResult<Vec<Cid>> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let state = feeds
            .get(feed_id)
            .ok_or_else(|| VaultError::FeedNotFound(feed_id.to_string()))?;
        Ok(state.entries.iter().map(|e| e.cid).collect())
    }

    /// Re-verifies every signature and the parent chain.
    pub fn validate_feed(&self, feed_id: &str) -> VaultResult<FeedValidation> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let state = feeds
            .get(feed_id)
            .ok_or_else(|| VaultError::FeedNotFound(feed_id.to_string()))?;

        let mut report = FeedValidation::default();

        for entry in &state.entries {
            let message = entry_signing_bytes(
                &entry.feed_id,
                &entry.cid,
                &entry.parent_cid,
                entry.timestamp,
                &entry.author_key,
            );
            if crypto::verify_detached(&message, &entry.signature, &entry.author_key).is_err() {
                report
                    .errors
                    .push(format!("entry {}: signature does not verify", entry.cid));
            }

            match entry.parent_cid {
                Some(parent) => match state.by_cid.get(&parent) {
                    Some(&idx) => {
                        let parent_entry = &state.entries[idx];
                        if entry.timestamp < parent_entry.timestamp {
                            report.warnings.push(format!(
                                "entry {} predates its parent {parent}",
                                entry.cid
                            ));
                        }
                    }
                    None => {
                        report
                            .warnings
                            .push(format!("entry {}: parent {parent} not in feed", entry.cid));
                    }
                },
                None => {
                    if state.meta.root_cid != Some(entry.cid) {
                        report.warnings.push(format!(
                            "entry {} has no parent but is not the root",
                            entry.cid
                        ));
                    }
                }
            }

            if !self.store.has_blob(&entry.cid) {
                report
                    .warnings
                    .push(format!("entry {}: referenced blob is gone", entry.cid));
            }
        }

        Ok(report)
    }

    /// Resolves branching: longest chain wins, ties broken by the oldest
    /// earliest-timestamp, then the lexicographically smallest tip CID.
    pub fn resolve_forks(&self, feed_id: &str) -> VaultResult<ForkResolution> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let state = feeds
            .get(feed_id)
            .ok_or_else(|| VaultError::FeedNotFound(feed_id.to_string()))?;

        if state.entries.is_empty() {
            return Ok(ForkResolution {
                winning_chain: Vec::new(),
                reason: "empty feed".into(),
            });
        }

        // Children map over the arena, then one chain per leaf.
        let mut has_children: HashMap<Cid, bool> = HashMap::new();
        for entry in &state.entries {
            has_children.entry(entry.cid).or_insert(false);
            if let Some(parent) = entry.parent_cid {
                has_children.insert(parent, true);
            }
        }

        let leaves: Vec<&FeedEntry> = state
            .entries
            .iter()
            .filter(|e| !has_children.get(&e.cid).copied().unwrap_or(false))
            .collect();

        struct Chain {
            cids: Vec<Cid>,
            earliest_ts: u64,
            tip: Cid,
        }

        let mut chains: Vec<Chain> = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            let mut cids = Vec::new();
            let mut earliest_ts = u64::MAX;
            let mut cursor = Some(leaf.cid);
            while let Some(cid) = cursor {
                let Some(&idx) = state.by_cid.get(&cid) else {
                    break; // dangling parent reference
                };
                let entry = &state.entries[idx];
                cids.push(cid);
                earliest_ts = earliest_ts.min(entry.timestamp);
                cursor = entry.parent_cid;
            }
            cids.reverse();
            chains.push(Chain {
                cids,
                earliest_ts,
                tip: leaf.cid,
            });
        }

        let single_branch = chains.len() == 1;
        let winner = chains
            .into_iter()
            .min_by(|a, b| {
                b.cids
                    .len()
                    .cmp(&a.cids.len())
                    .then(a.earliest_ts.cmp(&b.earliest_ts))
                    .then(a.tip.cmp(&b.tip))
            })
            .expect("at least one chain exists for a non-empty feed");

        let reason = if single_branch {
            "no fork detected".to_string()
        } else {
            format!(
                "selected longest branch ({} entries, tip {})",
                winner.cids.len(),
                winner.tip
            )
        };

        Ok(ForkResolution {
            winning_chain: winner.cids,
            reason,
        })
    }

    /// Ids of all known feeds.
    pub fn feed_ids(&self) -> Vec<String> {
        let feeds = self.feeds.lock().expect("feed log mutex poisoned");
        let mut ids: Vec<String> = feeds.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StorageConfig};
    use crate::crypto::NodeKeypair;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (FeedLog, Arc<BlobStore>) {
        let storage = StorageConfig {
            data_dir: tmp.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let store = Arc::new(
            BlobStore::open(&storage, &CacheConfig::default(), None).expect("open store"),
        );
        (FeedLog::new(Arc::clone(&store)), store)
    }

    fn store_blob(store: &BlobStore, data: &[u8]) -> Cid {
        store
            .store_blob(data, "application/octet-stream", StoreOptions::default())
            .unwrap()
            .cid
    }

    fn signed_entry(
        keypair: &NodeKeypair,
        feed_id: &str,
        cid: Cid,
        parent: Option<Cid>,
        timestamp: u64,
    ) -> FeedEntry {
        let author_key = keypair.public_key_hex().to_string();
        let message = entry_signing_bytes(feed_id, &cid, &parent, timestamp, &author_key);
        FeedEntry {
            feed_id: feed_id.to_string(),
            cid,
            parent_cid: parent,
            author_key,
            timestamp,
            signature: keypair.sign_hex(&message),
            event_type: None,
        }
    }

    fn alice() -> NodeKeypair {
        NodeKeypair::from_secret_bytes([1u8; 32])
    }

    fn bob() -> NodeKeypair {
        NodeKeypair::from_secret_bytes([2u8; 32])
    }

    fn carol() -> NodeKeypair {
        NodeKeypair::from_secret_bytes([3u8; 32])
    }

    fn dm_feed(log: &FeedLog, feed_id: &str) {
        log.create_feed(
            feed_id,
            FeedType::Dm,
            vec![
                alice().public_key_hex().to_string(),
                bob().public_key_hex().to_string(),
            ],
        )
        .expect("create feed");
    }

    #[test]
    fn create_feed_requires_writers_and_unique_id() {
        let tmp = TempDir::new().unwrap();
        let (log, _) = setup(&tmp);

        assert_eq!(
            log.create_feed("empty", FeedType::Post, vec![])
                .unwrap_err()
                .code(),
            "INVALID_REQUEST"
        );

        dm_feed(&log, "dm-1");
        assert_eq!(
            log.create_feed("dm-1", FeedType::Dm, vec!["w".into()])
                .unwrap_err()
                .code(),
            "FEED_EXISTS"
        );
    }

    #[test]
    fn feed_chain_with_two_writers() {
        // Alice appends the root, Bob chains onto it, Carol is refused.
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let a = store_blob(&store, b"message a");
        let b = store_blob(&store, b"message b");

        let meta = log
            .add_entry(signed_entry(&alice(), "dm-1", a, None, 1_000))
            .expect("alice appends root");
        assert_eq!(meta.root_cid, Some(a));
        assert_eq!(meta.entry_count, 1);

        let meta = log
            .add_entry(signed_entry(&bob(), "dm-1", b, Some(a), 2_000))
            .expect("bob chains");
        assert_eq!(meta.root_cid, Some(a), "root never changes");
        assert_eq!(meta.entry_count, 2);

        let c = store_blob(&store, b"message c");
        let err = log
            .add_entry(signed_entry(&carol(), "dm-1", c, Some(b), 3_000))
            .unwrap_err();
        assert_eq!(err.code(), "FEED_UNAUTHORIZED");
        assert_eq!(log.get_feed("dm-1").unwrap().entry_count, 2);
    }

    #[test]
    fn entry_requires_local_blob() {
        let tmp = TempDir::new().unwrap();
        let (log, _) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let ghost = crate::codec::cid(b"never stored");
        let err = log
            .add_entry(signed_entry(&alice(), "dm-1", ghost, None, 1_000))
            .unwrap_err();
        assert_eq!(err.code(), "BLOB_NOT_FOUND");
        assert_eq!(log.get_feed("dm-1").unwrap().entry_count, 0);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let a = store_blob(&store, b"payload");
        let mut entry = signed_entry(&alice(), "dm-1", a, None, 1_000);
        // Signed by Alice but claims a different timestamp.
        entry.timestamp += 1;

        let err = log.add_entry(entry).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
        assert_eq!(log.get_feed("dm-1").unwrap().entry_count, 0);
    }

    #[test]
    fn events_page_newest_first_with_cursor() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let mut parent = None;
        let mut cids = Vec::new();
        for i in 0..5u64 {
            let cid = store_blob(&store, format!("entry {i}").as_bytes());
            log.add_entry(signed_entry(&alice(), "dm-1", cid, parent, 1_000 + i))
                .unwrap();
            parent = Some(cid);
            cids.push(cid);
        }

        let first = log.get_feed_events("dm-1", 2, None).unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.events[0].cid, cids[4], "newest first");
        assert_eq!(first.events[1].cid, cids[3]);
        assert!(first.has_more);

        let second = log
            .get_feed_events("dm-1", 2, first.cursor.as_deref())
            .unwrap();
        assert_eq!(second.events[0].cid, cids[2]);
        assert!(second.has_more);

        let third = log
            .get_feed_events("dm-1", 2, second.cursor.as_deref())
            .unwrap();
        assert_eq!(third.events.len(), 1);
        assert!(!third.has_more);
        assert!(third.cursor.is_none());
    }

    #[test]
    fn feed_blobs_lists_all_references() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let a = store_blob(&store, b"one");
        let b = store_blob(&store, b"two");
        log.add_entry(signed_entry(&alice(), "dm-1", a, None, 1)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", b, Some(a), 2)).unwrap();

        assert_eq!(log.get_feed_blobs("dm-1").unwrap(), vec![a, b]);
    }

    #[test]
    fn validate_feed_reports_clean_chain() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let a = store_blob(&store, b"one");
        let b = store_blob(&store, b"two");
        log.add_entry(signed_entry(&alice(), "dm-1", a, None, 1)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", b, Some(a), 2)).unwrap();

        let report = log.validate_feed("dm-1").unwrap();
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn resolve_forks_prefers_longest_branch() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        // root -> x -> y  (length 3) versus root -> z (length 2)
        let root = store_blob(&store, b"root");
        let x = store_blob(&store, b"x");
        let y = store_blob(&store, b"y");
        let z = store_blob(&store, b"z");

        log.add_entry(signed_entry(&alice(), "dm-1", root, None, 10)).unwrap();
        log.add_entry(signed_entry(&alice(), "dm-1", x, Some(root), 20)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", z, Some(root), 21)).unwrap();
        log.add_entry(signed_entry(&alice(), "dm-1", y, Some(x), 30)).unwrap();

        let resolution = log.resolve_forks("dm-1").unwrap();
        assert_eq!(resolution.winning_chain, vec![root, x, y]);
        assert!(resolution.reason.contains("longest"));
    }

    #[test]
    fn resolve_forks_tie_breaks_by_earliest_timestamp() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        // Two disjoint chains of equal length; the one whose earliest
        // entry is older wins.
        let old_root = store_blob(&store, b"old root");
        let old_tip = store_blob(&store, b"old tip");
        let new_root = store_blob(&store, b"new root");
        let new_tip = store_blob(&store, b"new tip");

        log.add_entry(signed_entry(&alice(), "dm-1", old_root, None, 5)).unwrap();
        log.add_entry(signed_entry(&alice(), "dm-1", old_tip, Some(old_root), 50)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", new_root, None, 10)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", new_tip, Some(new_root), 40)).unwrap();

        let resolution = log.resolve_forks("dm-1").unwrap();
        assert_eq!(resolution.winning_chain, vec![old_root, old_tip]);
    }

    #[test]
    fn resolve_forks_final_tie_break_is_smallest_tip_cid() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        // Equal length, shared root so equal earliest timestamp: the
        // lexicographically smaller tip CID decides.
        let root = store_blob(&store, b"root");
        let tip_a = store_blob(&store, b"tip a");
        let tip_b = store_blob(&store, b"tip b");

        log.add_entry(signed_entry(&alice(), "dm-1", root, None, 10)).unwrap();
        log.add_entry(signed_entry(&alice(), "dm-1", tip_a, Some(root), 20)).unwrap();
        log.add_entry(signed_entry(&bob(), "dm-1", tip_b, Some(root), 20)).unwrap();

        let resolution = log.resolve_forks("dm-1").unwrap();
        let expected_tip = tip_a.min(tip_b);
        assert_eq!(resolution.winning_chain.last(), Some(&expected_tip));
    }

    #[test]
    fn resolve_forks_on_empty_and_linear_feeds() {
        let tmp = TempDir::new().unwrap();
        let (log, store) = setup(&tmp);
        dm_feed(&log, "dm-1");

        let empty = log.resolve_forks("dm-1").unwrap();
        assert!(empty.winning_chain.is_empty());
        assert_eq!(empty.reason, "empty feed");

        let a = store_blob(&store, b"only");
        log.add_entry(signed_entry(&alice(), "dm-1", a, None, 1)).unwrap();
        let linear = log.resolve_forks("dm-1").unwrap();
        assert_eq!(linear.winning_chain, vec![a]);
        assert_eq!(linear.reason, "no fork detected");
    }
}
