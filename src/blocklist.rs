// src/blocklist.rs
// Timed source blocks. A confirmed short/medium/long Block puts its
// source address here for the severity's configured duration; expired
// entries are pruned on sight. An index key keeps listing cheap.

use serde::{Deserialize, Serialize};

use crate::store::{now_ts, KeyValueStore};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockEntry {
    pub code: u32,
    pub reason: String,
    pub expires: u64,
    #[serde(default = "now_ts")]
    pub created: u64,
}

fn entry_key(site_id: &str, ip: &str) -> String {
    format!("block:{}:{}", site_id, ip)
}

fn index_key(site_id: &str) -> String {
    format!("block_index:{}", site_id)
}

fn load_index(store: &impl KeyValueStore, site_id: &str) -> Vec<String> {
    store
        .get(&index_key(site_id))
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_slice::<Vec<String>>(&raw).ok())
        .unwrap_or_default()
}

fn save_index(store: &impl KeyValueStore, site_id: &str, index: &[String]) {
    if let Ok(raw) = serde_json::to_vec(index) {
        let _ = store.set(&index_key(site_id), &raw);
    }
}

/// The source's unexpired block entry, if any. Expired or undecodable
/// entries are cleaned up as a side effect.
pub fn active_block(store: &impl KeyValueStore, site_id: &str, ip: &str) -> Option<BlockEntry> {
    let key = entry_key(site_id, ip);
    if let Ok(Some(raw)) = store.get(&key) {
        if let Ok(entry) = serde_json::from_slice::<BlockEntry>(&raw) {
            if entry.expires > now_ts() {
                return Some(entry);
            }
        }
        let _ = store.delete(&key);
        let mut index = load_index(store, site_id);
        let before = index.len();
        index.retain(|v| v != ip);
        if index.len() != before {
            save_index(store, site_id, &index);
        }
    }
    None
}

pub fn is_blocked(store: &impl KeyValueStore, site_id: &str, ip: &str) -> bool {
    active_block(store, site_id, ip).is_some()
}

/// Block a source for `duration` seconds. A zero duration is a no-op:
/// warn and immediate severities never outlive their request.
pub fn block_source(
    store: &impl KeyValueStore,
    site_id: &str,
    ip: &str,
    code: u32,
    reason: &str,
    duration: u64,
) {
    if duration == 0 {
        return;
    }
    let ts = now_ts();
    let entry = BlockEntry { code, reason: reason.to_string(), expires: ts + duration, created: ts };
    if let Ok(raw) = serde_json::to_vec(&entry) {
        let _ = store.set(&entry_key(site_id, ip), &raw);
        let mut index = load_index(store, site_id);
        if !index.iter().any(|v| v == ip) {
            index.push(ip.to_string());
            save_index(store, site_id, &index);
        }
    }
}

pub fn unblock_source(store: &impl KeyValueStore, site_id: &str, ip: &str) {
    let _ = store.delete(&entry_key(site_id, ip));
    let mut index = load_index(store, site_id);
    let before = index.len();
    index.retain(|v| v != ip);
    if index.len() != before {
        save_index(store, site_id, &index);
    }
}

/// All active blocks; prunes expired and dangling index entries.
pub fn list_active_blocks(
    store: &impl KeyValueStore,
    site_id: &str,
) -> Vec<(String, BlockEntry)> {
    let index = load_index(store, site_id);
    let original_len = index.len();
    let now = now_ts();
    let mut active = Vec::new();
    let mut kept = Vec::new();

    for ip in index {
        match store.get(&entry_key(site_id, &ip)) {
            Ok(Some(raw)) => match serde_json::from_slice::<BlockEntry>(&raw) {
                Ok(entry) if entry.expires > now => {
                    kept.push(ip.clone());
                    active.push((ip, entry));
                }
                _ => {
                    let _ = store.delete(&entry_key(site_id, &ip));
                }
            },
            _ => {}
        }
    }

    if kept.len() != original_len {
        save_index(store, site_id, &kept);
    }
    active
}
