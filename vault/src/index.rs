//! In-memory content indexes: by type, thread, guild, and parent.
//!
//! The indexer is updated synchronously with store/delete and holds only
//! opaque identifiers — CIDs, caller-supplied thread hashes, guild ids —
//! never plaintext. Each view is a time-sorted list; queries page newest
//! first behind an opaque `(timestamp, cid)` cursor. `has_more` is true
//! iff at least one entry lies strictly beyond the returned page.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

use crate::error::{VaultError, VaultResult};
use crate::types::{Cid, IndexEntry, IndexEntryType, unix_millis};

/// Default page size for index queries.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Sort key inside a view: ascending `(timestamp, cid)`.
type ViewKey = (u64, Cid);

#[derive(Default)]
struct IndexState {
    entries: HashMap<Cid, IndexEntry>,
    all: Vec<ViewKey>,
    by_type: HashMap<IndexEntryType, Vec<ViewKey>>,
    by_thread: HashMap<String, Vec<ViewKey>>,
    by_guild: HashMap<String, Vec<ViewKey>>,
    by_parent: HashMap<Cid, Vec<ViewKey>>,
}

/// One page of index entries, newest first.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPage {
    pub entries: Vec<IndexEntry>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Everything newer than a client's last sync point.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDelta {
    pub new_entries: Vec<IndexEntry>,
    pub count: usize,
    pub since_timestamp: u64,
    pub current_timestamp: u64,
}

/// Thread/guild/type indexes behind a read/write lock.
#[derive(Default)]
pub struct Indexer {
    state: RwLock<IndexState>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an entry in every applicable view.
    pub fn insert(&self, entry: IndexEntry) {
        let mut state = self.state.write().expect("indexer lock poisoned");

        if state.entries.contains_key(&entry.cid) {
            Self::remove_locked(&mut state, &entry.cid);
        }

        let key = (entry.timestamp, entry.cid);
        sorted_insert(&mut state.all, key);
        sorted_insert(state.by_type.entry(entry.entry_type).or_default(), key);
        sorted_insert(
            state.by_thread.entry(entry.thread_id.clone()).or_default(),
            key,
        );
        if let Some(guild) = entry.guild_id.clone() {
            sorted_insert(state.by_guild.entry(guild).or_default(), key);
        }
        if let Some(parent) = entry.parent_cid {
            sorted_insert(state.by_parent.entry(parent).or_default(), key);
        }
        state.entries.insert(entry.cid, entry);
    }

    /// Removes an entry from every view; no-op when absent.
    pub fn remove(&self, cid: &Cid) {
        let mut state = self.state.write().expect("indexer lock poisoned");
        Self::remove_locked(&mut state, cid);
    }

    fn remove_locked(state: &mut IndexState, cid: &Cid) {
        let Some(entry) = state.entries.remove(cid) else {
            return;
        };
        let key = (entry.timestamp, entry.cid);
        sorted_remove(&mut state.all, key);
        if let Some(view) = state.by_type.get_mut(&entry.entry_type) {
            sorted_remove(view, key);
        }
        if let Some(view) = state.by_thread.get_mut(&entry.thread_id) {
            sorted_remove(view, key);
        }
        if let Some(guild) = entry.guild_id.as_ref() {
            if let Some(view) = state.by_guild.get_mut(guild) {
                sorted_remove(view, key);
            }
        }
        if let Some(parent) = entry.parent_cid.as_ref() {
            if let Some(view) = state.by_parent.get_mut(parent) {
                sorted_remove(view, key);
            }
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.state.read().expect("indexer lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest entries, optionally restricted to one type.
    pub fn query_latest(
        &self,
        entry_type: Option<IndexEntryType>,
        limit: usize,
        cursor: Option<&str>,
    ) -> VaultResult<IndexPage> {
        let state = self.state.read().expect("indexer lock poisoned");
        let view: &[ViewKey] = match entry_type {
            Some(t) => state.by_type.get(&t).map(Vec::as_slice).unwrap_or(&[]),
            None => &state.all,
        };
        paginate(&state.entries, view, limit, cursor)
    }

    /// Newest entries in a thread.
    pub fn query_thread(
        &self,
        thread_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> VaultResult<IndexPage> {
        let state = self.state.read().expect("indexer lock poisoned");
        let view = state
            .by_thread
            .get(thread_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        paginate(&state.entries, view, limit, cursor)
    }

    /// Newest entries in a guild.
    pub fn query_guild(
        &self,
        guild_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> VaultResult<IndexPage> {
        let state = self.state.read().expect("indexer lock poisoned");
        let view = state
            .by_guild
            .get(guild_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        paginate(&state.entries, view, limit, cursor)
    }

    /// Newest posts in a guild.
    pub fn query_guild_posts(
        &self,
        guild_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> VaultResult<IndexPage> {
        let state = self.state.read().expect("indexer lock poisoned");
        let view = state
            .by_guild
            .get(guild_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        paginate_filtered(&state.entries, view, limit, cursor, |entry| {
            entry.entry_type == IndexEntryType::Post
        })
    }

    /// Comments under a parent within a guild, oldest first.
    pub fn query_comments(&self, guild_id: &str, parent_cid: &Cid) -> Vec<IndexEntry> {
        let state = self.state.read().expect("indexer lock poisoned");
        let Some(view) = state.by_parent.get(parent_cid) else {
            return Vec::new();
        };
        view.iter()
            .filter_map(|(_, cid)| state.entries.get(cid))
            .filter(|entry| {
                entry.entry_type == IndexEntryType::Comment
                    && entry.guild_id.as_deref() == Some(guild_id)
            })
            .cloned()
            .collect()
    }

    /// Everything in a thread strictly newer than `since_timestamp`,
    /// oldest first so clients can apply in order.
    pub fn query_thread_delta(&self, thread_id: &str, since_timestamp: u64) -> ThreadDelta {
        let state = self.state.read().expect("indexer lock poisoned");
        let new_entries: Vec<IndexEntry> = state
            .by_thread
            .get(thread_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .skip_while(|(ts, _)| *ts <= since_timestamp)
            .filter_map(|(_, cid)| state.entries.get(cid))
            .cloned()
            .collect();

        ThreadDelta {
            count: new_entries.len(),
            new_entries,
            since_timestamp,
            current_timestamp: unix_millis(),
        }
    }
}

fn sorted_insert(view: &mut Vec<ViewKey>, key: ViewKey) {
    let pos = view.partition_point(|k| *k < key);
    view.insert(pos, key);
}

fn sorted_remove(view: &mut Vec<ViewKey>, key: ViewKey) {
    if let Ok(pos) = view.binary_search(&key) {
        view.remove(pos);
    }
}

fn encode_cursor(key: &ViewKey) -> String {
    format!("{}:{}", key.0, key.1)
}

fn decode_cursor(raw: &str) -> VaultResult<ViewKey> {
    let (ts, cid) = raw
        .split_once(':')
        .ok_or_else(|| VaultError::InvalidRequest(format!("malformed cursor: {raw}")))?;
    let ts: u64 = ts
        .parse()
        .map_err(|_| VaultError::InvalidRequest(format!("malformed cursor: {raw}")))?;
    let cid = Cid::parse(cid)?;
    Ok((ts, cid))
}

fn paginate(
    entries: &HashMap<Cid, IndexEntry>,
    view: &[ViewKey],
    limit: usize,
    cursor: Option<&str>,
) -> VaultResult<IndexPage> {
    paginate_filtered(entries, view, limit, cursor, |_| true)
}

fn paginate_filtered(
    entries: &HashMap<Cid, IndexEntry>,
    view: &[ViewKey],
    limit: usize,
    cursor: Option<&str>,
    accept: impl Fn(&IndexEntry) -> bool,
) -> VaultResult<IndexPage> {
    let limit = if limit == 0 { DEFAULT_QUERY_LIMIT } else { limit };
    let after = cursor.map(decode_cursor).transpose()?;

    let mut page: Vec<IndexEntry> = Vec::with_capacity(limit);
    let mut last_key: Option<ViewKey> = None;
    let mut has_more = false;

    // Views are ascending; walk backwards for newest-first, resuming
    // strictly past the cursor position.
    for key in view.iter().rev() {
        if let Some(after_key) = after {
            if *key >= after_key {
                continue;
            }
        }
        let Some(entry) = entries.get(&key.1) else {
            continue;
        };
        if !accept(entry) {
            continue;
        }
        if page.len() == limit {
            has_more = true;
            break;
        }
        page.push(entry.clone());
        last_key = Some(*key);
    }

    let cursor = if has_more {
        last_key.as_ref().map(encode_cursor)
    } else {
        None
    };

    Ok(IndexPage {
        entries: page,
        has_more,
        cursor,
    })
}
