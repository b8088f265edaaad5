// src/store.rs
// Key-value store seam. Production uses the Spin key-value store; tests
// use the in-memory store from test_support. Spin KV has no native TTL,
// so records that must age out are wrapped in an Expiring envelope and
// treated as absent once past their expiry.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DAY: u64 = 86400;
pub const HOUR: u64 = 3600;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()>;
    fn delete(&self, key: &str) -> Result<(), ()>;
    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Ok(Vec::new())
    }
}

impl KeyValueStore for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        spin_sdk::key_value::Store::get(self, key).map_err(|_| ())
    }
    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        spin_sdk::key_value::Store::set(self, key, value).map_err(|_| ())
    }
    fn delete(&self, key: &str) -> Result<(), ()> {
        spin_sdk::key_value::Store::delete(self, key).map_err(|_| ())
    }
    fn get_keys(&self) -> Result<Vec<String>, ()> {
        spin_sdk::key_value::Store::get_keys(self).map_err(|_| ())
    }
}

pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Envelope giving TTL semantics to a stored record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Expiring<T> {
    pub value: T,
    pub expires: u64,
}

/// Load a record, treating expired or undecodable payloads as absent.
/// Expired records are deleted on sight so unused keys age out.
pub fn load_expiring<T: DeserializeOwned>(store: &impl KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key).ok().flatten()?;
    match serde_json::from_slice::<Expiring<T>>(&raw) {
        Ok(rec) if rec.expires > now_ts() => Some(rec.value),
        _ => {
            let _ = store.delete(key);
            None
        }
    }
}

pub fn save_expiring<T: Serialize>(
    store: &impl KeyValueStore,
    key: &str,
    value: &T,
    ttl: u64,
) -> Result<(), ()> {
    let rec = Expiring { value, expires: now_ts() + ttl };
    let raw = serde_json::to_vec(&rec).map_err(|_| ())?;
    store.set(key, &raw)
}

/// Atomic read-modify-or-initialize-then-store. Absent or expired records
/// start from `init`; the updated record is written back with `ttl`.
pub fn update_data(
    store: &impl KeyValueStore,
    key: &str,
    ttl: u64,
    init: serde_json::Value,
    update: impl FnOnce(&mut serde_json::Value),
) -> Result<(), ()> {
    let mut value = load_expiring::<serde_json::Value>(store, key).unwrap_or(init);
    update(&mut value);
    save_expiring(store, key, &value, ttl)
}
