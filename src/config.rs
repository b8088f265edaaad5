// src/config.rs
// Typed configuration accessor. Defaults ship in config/defaults.env;
// the KV record config:<site> (a JSON object) and GW_* environment
// variables override them by name. Consumers read plain key/value
// lookups with defaults, never the raw map.

use std::collections::HashMap;
use std::env;

use once_cell::sync::Lazy;

use crate::store::KeyValueStore;

const DEFAULTS_ENV_TEXT: &str = include_str!("../config/defaults.env");

static DEFAULTS: Lazy<HashMap<String, serde_json::Value>> = Lazy::new(|| {
    let mut options = HashMap::new();
    for line in DEFAULTS_ENV_TEXT.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            options.insert(
                key.trim().to_string(),
                serde_json::Value::String(value.trim().to_string()),
            );
        }
    }
    options
});

/// Enforcement policy of one rule class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Block,
    Report,
    Off,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    options: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Defaults only, no store or environment. Used by tests.
    pub fn from_defaults() -> Config {
        Config { options: DEFAULTS.clone() }
    }

    /// Defaults, overridden by the KV config record, overridden by env.
    pub fn load(store: &impl KeyValueStore, site_id: &str) -> Config {
        let mut cfg = Config::from_defaults();

        let key = format!("config:{}", site_id);
        if let Ok(Some(raw)) = store.get(&key) {
            match serde_json::from_slice::<serde_json::Value>(&raw) {
                Ok(serde_json::Value::Object(map)) => {
                    for (name, value) in map {
                        cfg.options.insert(name, value);
                    }
                }
                _ => eprintln!("[config] ignoring undecodable record {}", key),
            }
        }

        let names: Vec<String> = cfg.options.keys().cloned().collect();
        for name in names {
            if let Ok(value) = env::var(format!("GW_{}", name.to_uppercase())) {
                cfg.options.insert(name, serde_json::Value::String(value));
            }
        }
        cfg
    }

    pub fn set(&mut self, name: &str, value: serde_json::Value) {
        self.options.insert(name.to_string(), value);
    }

    pub fn str(&self, name: &str, default: &str) -> String {
        match self.options.get(name) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::String(_)) | None => default.to_string(),
            Some(v) => v.to_string(),
        }
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        match self.options.get(name) {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// True for boolean true, "true", "1", and the policy strings
    /// "block" and "report" (a configured policy means the class is on).
    pub fn enabled(&self, name: &str, default: bool) -> bool {
        match self.options.get(name) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => {
                matches!(s.as_str(), "true" | "1" | "block" | "report")
            }
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            _ => default,
        }
    }

    /// Comma-separated string or JSON array; empty entries dropped.
    pub fn list(&self, name: &str) -> Vec<String> {
        match self.options.get(name) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn policy(&self, class: &str) -> Policy {
        match self.options.get(class) {
            Some(serde_json::Value::String(s)) => match s.as_str() {
                "block" | "true" | "1" => Policy::Block,
                "report" => Policy::Report,
                _ => Policy::Off,
            },
            Some(serde_json::Value::Bool(true)) => Policy::Block,
            _ => Policy::Off,
        }
    }
}
