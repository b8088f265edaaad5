// src/events.rs
// KV-backed event log for the dashboard. Bounded: only the most recent
// entries are kept.

use serde::{Deserialize, Serialize};

use crate::store::{now_ts, KeyValueStore};

const MAX_EVENTS: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Block,
    Report,
    Exception,
    CacheRefresh,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventLogEntry {
    pub ts: u64,
    pub event: EventType,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl EventLogEntry {
    pub fn new(event: EventType, ip: &str, reason: &str, outcome: &str) -> EventLogEntry {
        EventLogEntry {
            ts: now_ts(),
            event,
            ip: Some(ip.to_string()),
            reason: Some(reason.to_string()),
            outcome: Some(outcome.to_string()),
        }
    }
}

fn events_key(site_id: &str) -> String {
    format!("events:{}", site_id)
}

pub fn log_event(store: &impl KeyValueStore, site_id: &str, entry: &EventLogEntry) {
    let mut events = recent_events(store, site_id);
    events.push(entry.clone());
    if events.len() > MAX_EVENTS {
        let drop = events.len() - MAX_EVENTS;
        events.drain(..drop);
    }
    match serde_json::to_vec(&events) {
        Ok(raw) => {
            if store.set(&events_key(site_id), &raw).is_err() {
                eprintln!("[events] failed to persist event log for {}", site_id);
            }
        }
        Err(_) => eprintln!("[events] failed to encode event log for {}", site_id),
    }
}

pub fn recent_events(store: &impl KeyValueStore, site_id: &str) -> Vec<EventLogEntry> {
    store
        .get(&events_key(site_id))
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or_default()
}
