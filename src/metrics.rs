// src/metrics.rs
// Rolling 25-slot hourly histogram in the KV store, keys metrics-0..24.
// Slot records are plain JSON objects mapping a classification key to a
// count, wrapped in the one-day expiry envelope so idle slots age out
// before the slot index wraps around.

use std::net::Ipv4Addr;

use crate::store::{self, KeyValueStore, DAY, HOUR};

pub const SLOTS: u64 = 25;
/// Keys at or above this value encode an IPv4 source address.
pub const ADDRESS_OFFSET: u64 = 100_000;

/// One countable classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKey {
    /// Block/report classification code, always below ADDRESS_OFFSET.
    Code(u32),
    /// Source address of a blocked request.
    Address(Ipv4Addr),
    /// An allowed request.
    Valid,
    /// A challenged request.
    Challenge,
}

impl MetricKey {
    fn as_map_key(&self) -> String {
        match self {
            MetricKey::Code(code) => code.to_string(),
            MetricKey::Address(addr) => (u64::from(u32::from(*addr)) + ADDRESS_OFFSET).to_string(),
            MetricKey::Valid => "valid".to_string(),
            MetricKey::Challenge => "challenge".to_string(),
        }
    }
}

fn slot_key(now: u64) -> String {
    format!("metrics-{}", (now / HOUR) % SLOTS)
}

/// Increment the counter for `key` in the current rolling slot, creating
/// the slot record with the standing one-day expiry when absent.
pub fn record_event(store: &impl KeyValueStore, key: &MetricKey) {
    let map_key = key.as_map_key();
    let slot = slot_key(store::now_ts());
    let result = store::update_data(store, &slot, DAY, serde_json::json!({}), |value| {
        if !value.is_object() {
            *value = serde_json::json!({});
        }
        let count = value[&map_key].as_u64().unwrap_or(0);
        value[&map_key] = serde_json::json!(count + 1);
    });
    if result.is_err() {
        eprintln!("[metrics] failed to persist counter {} in {}", map_key, slot);
    }
}

/// Counts grouped by classification key, in first-seen order, plus the
/// grand total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metric {
    pub data: Vec<(String, u64)>,
    pub total: u64,
}

impl Metric {
    fn add(&mut self, key: &str, count: u64) {
        match self.data.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing += count,
            None => self.data.push((key.to_string(), count)),
        }
        self.total += count;
    }

    /// Percentage of the grand total per entry, integer-truncated to one
    /// decimal place; all zeros when the total is zero.
    pub fn percentages(&self) -> Vec<(String, f64)> {
        self.data
            .iter()
            .map(|(key, count)| {
                let percent = if self.total > 0 {
                    (count * 1000 / self.total) as f64 / 10.0
                } else {
                    0.0
                };
                (key.clone(), percent)
            })
            .collect()
    }
}

fn load_slot(store: &impl KeyValueStore, slot: u64) -> Option<serde_json::Map<String, serde_json::Value>> {
    let value: serde_json::Value = store::load_expiring(store, &format!("metrics-{}", slot))?;
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Per-code block/report totals across the last day.
pub fn block_groups_24h(store: &impl KeyValueStore) -> Metric {
    let mut metric = Metric::default();
    for slot in 0..SLOTS {
        let Some(data) = load_slot(store, slot) else { continue };
        for (key, value) in &data {
            if key == "valid" || key == "challenge" {
                continue;
            }
            let count = value.as_u64().unwrap_or(0);
            if count > 0 && key.parse::<u64>().map(|c| c < ADDRESS_OFFSET).unwrap_or(false) {
                metric.add(key, count);
            }
        }
    }
    metric
}

/// Per-address totals across the last day, reduced to the ten largest
/// contributors plus an "other" remainder entry.
pub fn address_groups_24h(store: &impl KeyValueStore) -> Metric {
    let mut summary = Metric::default();
    for slot in 0..SLOTS {
        let Some(data) = load_slot(store, slot) else { continue };
        for (key, value) in &data {
            if key == "valid" || key == "challenge" {
                continue;
            }
            let count = value.as_u64().unwrap_or(0);
            let Some(encoded) = key.parse::<u64>().ok().filter(|c| *c >= ADDRESS_OFFSET) else {
                continue;
            };
            if count > 0 && encoded - ADDRESS_OFFSET <= u64::from(u32::MAX) {
                let addr = Ipv4Addr::from((encoded - ADDRESS_OFFSET) as u32);
                summary.add(&addr.to_string(), count);
            }
        }
    }
    top_n_groups(summary, 10)
}

/// Largest `n` contributors in descending count order (ties keep
/// first-seen order), remainder folded into "other".
fn top_n_groups(mut summary: Metric, n: usize) -> Metric {
    summary.data.sort_by(|a, b| b.1.cmp(&a.1));
    if summary.data.len() > n {
        let rest: u64 = summary.data.split_off(n).iter().map(|(_, c)| c).sum();
        summary.data.push(("other".to_string(), rest));
    }
    summary
}

/// Per-slot block/report sums, the dashboard's hourly sparkline.
pub fn hourly_block_sums_24h(store: &impl KeyValueStore) -> Vec<u64> {
    let mut sums = Vec::new();
    for slot in 0..SLOTS {
        let Some(data) = load_slot(store, slot) else { continue };
        let sum = data
            .iter()
            .filter(|(key, _)| {
                key.parse::<u64>().map(|c| c < ADDRESS_OFFSET).unwrap_or(false)
            })
            .map(|(_, value)| value.as_u64().unwrap_or(0))
            .sum();
        sums.push(sum);
    }
    sums
}

/// Summed allowed/challenged counters. Absent slots are seeded with a
/// zeroed record so the day's key range exists in the store.
pub fn valid_challenge_24h(store: &impl KeyValueStore) -> (u64, u64) {
    let mut valid = 0;
    let mut challenge = 0;
    for slot in 0..SLOTS {
        match load_slot(store, slot) {
            Some(data) => {
                valid += data.get("valid").and_then(|v| v.as_u64()).unwrap_or(0);
                challenge += data.get("challenge").and_then(|v| v.as_u64()).unwrap_or(0);
            }
            None => {
                let seed = serde_json::json!({"valid": 0, "challenge": 0});
                let _ = store::save_expiring(store, &format!("metrics-{}", slot), &seed, DAY);
            }
        }
    }
    (valid, challenge)
}
