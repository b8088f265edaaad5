// src/decision.rs
// Block/exception resolution. A rule hit becomes a Block candidate; the
// resolver downgrades it to a report, suppresses it through a standing
// exception, or confirms it as the request's Decision. Decisions are
// constructed fresh per call and never shared.

use serde::{Deserialize, Serialize};

use crate::config::{Config, Policy};
use crate::effects::{Effect, FileMod};
use crate::metrics::{self, MetricKey};
use crate::request::Request;
use crate::store::{self, KeyValueStore};

/// Classification code meaning "not a failure"; never materialized as a
/// Block.
pub const FAIL_NOT: u32 = 0;

/// Enforcement tier of a confirmed Block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Diagnostic only, no enforcement.
    Warn,
    /// Block this request only.
    Immediate,
    Short,
    Medium,
    Long,
}

impl Severity {
    pub fn from_level(level: i8) -> Option<Severity> {
        match level {
            -1 => Some(Severity::Warn),
            0 => Some(Severity::Immediate),
            1 => Some(Severity::Short),
            2 => Some(Severity::Medium),
            3 => Some(Severity::Long),
            _ => None,
        }
    }

    pub fn level(self) -> i8 {
        match self {
            Severity::Warn => -1,
            Severity::Immediate => 0,
            Severity::Short => 1,
            Severity::Medium => 2,
            Severity::Long => 3,
        }
    }

    /// How long the source stays blocked. Zero for warn and immediate:
    /// neither outlives the current request.
    pub fn duration(self, cfg: &Config) -> u64 {
        match self {
            Severity::Warn | Severity::Immediate => 0,
            Severity::Short => cfg.int("block_short", 600).max(0) as u64,
            Severity::Medium => cfg.int("block_medium", 3600).max(0) as u64,
            Severity::Long => cfg.int("block_long", 86400).max(0) as u64,
        }
    }
}

/// A candidate enforcement action.
#[derive(Serialize, Debug, Clone)]
pub struct Block {
    pub code: u32,
    pub parameter: String,
    pub value: String,
    pub pattern: String,
    pub severity: Severity,
}

/// A standing allowlist entry. Never expires; removed only by explicit
/// deletion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub code: u32,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub id: String,
}

impl Exception {
    /// Absent parameter/host/url fields are wildcards.
    fn matches(&self, block: &Block, request: &Request) -> bool {
        if self.code != block.code {
            return false;
        }
        if let Some(parameter) = &self.parameter {
            if *parameter != block.parameter {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if *host != request.host {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if url.trim_matches('/') != request.path.trim_matches('/') {
                return false;
            }
        }
        true
    }
}

/// The resolved outcome of inspecting one request: empty (allow) or a
/// confirmed Block.
#[derive(Debug, Clone, Default)]
pub struct Decision(Option<Block>);

impl Decision {
    pub fn empty() -> Decision {
        Decision(None)
    }

    pub fn of(block: Block) -> Decision {
        Decision(Some(block))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn block(&self) -> Option<&Block> {
        self.0.as_ref()
    }
}

/// Rule-class name a classification code belongs to; keys the policy
/// lookup in the configuration.
pub fn feature_class(code: u32) -> &'static str {
    match code {
        10000..=19999 => "web_block",
        20000..=24999 => "bot_block",
        25000..=25999 => "rate_limit",
        _ => "generic_block",
    }
}

/// Build and resolve a block candidate.
///
/// Returns the empty Decision when the code signals no failure, when the
/// rule class is report-only or warn severity (logged, never enforced),
/// when the class is off, or when a standing exception matches. The
/// first matching exception wins; exception order is insertion order.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    store: &impl KeyValueStore,
    code: u32,
    parameter: &str,
    value: &str,
    pattern: &str,
    severity: Severity,
    request: &Request,
    exceptions: &[Exception],
    cfg: &Config,
    effect: Effect,
) -> (Decision, Effect) {
    if code == FAIL_NOT {
        return (Decision::empty(), effect);
    }

    let block = Block {
        code,
        parameter: parameter.to_string(),
        value: value.to_string(),
        pattern: pattern.to_string(),
        severity,
    };

    match cfg.policy(feature_class(code)) {
        Policy::Off => return (Decision::empty(), effect),
        Policy::Report => {
            metrics::record_event(store, &MetricKey::Code(code));
            return (Decision::empty(), report(&block, request, cfg, effect));
        }
        Policy::Block => {}
    }

    if severity == Severity::Warn {
        metrics::record_event(store, &MetricKey::Code(code));
        return (Decision::empty(), report(&block, request, cfg, effect));
    }

    if exceptions.iter().any(|ex| ex.matches(&block, request)) {
        return (Decision::empty(), effect);
    }

    (Decision::of(block), effect)
}

/// Append a JSON report line for a logged-but-not-enforced block.
fn report(block: &Block, request: &Request, cfg: &Config, effect: Effect) -> Effect {
    let record = serde_json::json!({
        "time": store::now_ts(),
        "block": block,
        "request": {
            "host": request.host,
            "path": request.path,
            "method": request.method,
            "ip": request.ip,
            "agent": request.agent,
        },
    });
    let report_file = cfg.str("report_file", "cache/report.json");
    effect.file(FileMod::new(&report_file, format!("{}\n", record)).append())
}

const EXCEPTIONS_KEY_PREFIX: &str = "exceptions:";

/// Ordered exception list from the backing store; order is preserved
/// verbatim.
pub fn load_exceptions(store: &impl KeyValueStore, site_id: &str) -> Vec<Exception> {
    store
        .get(&format!("{}{}", EXCEPTIONS_KEY_PREFIX, site_id))
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or_default()
}

pub fn save_exceptions(
    store: &impl KeyValueStore,
    site_id: &str,
    exceptions: &[Exception],
) -> Result<(), ()> {
    let raw = serde_json::to_vec(exceptions).map_err(|_| ())?;
    store.set(&format!("{}{}", EXCEPTIONS_KEY_PREFIX, site_id), &raw)
}

/// Append a new exception, keeping insertion order; exact duplicates are
/// dropped.
pub fn add_exception(
    store: &impl KeyValueStore,
    site_id: &str,
    exception: Exception,
) -> Result<(), ()> {
    let mut exceptions = load_exceptions(store, site_id);
    if !exceptions.contains(&exception) {
        exceptions.push(exception);
        save_exceptions(store, site_id, &exceptions)?;
    }
    Ok(())
}

/// Remove exceptions by id; explicit deletion is the only removal path.
pub fn delete_exception(
    store: &impl KeyValueStore,
    site_id: &str,
    id: &str,
) -> Result<(), ()> {
    let mut exceptions = load_exceptions(store, site_id);
    let before = exceptions.len();
    exceptions.retain(|ex| ex.id != id);
    if exceptions.len() != before {
        save_exceptions(store, site_id, &exceptions)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryStore;

    fn req() -> Request {
        Request {
            host: "example.com".to_string(),
            path: "/wp-login.php".to_string(),
            method: "POST".to_string(),
            ip: "1.2.3.4".to_string(),
            ..Request::default()
        }
    }

    fn resolve_simple(
        store: &InMemoryStore,
        code: u32,
        severity: Severity,
        exceptions: &[Exception],
        cfg: &Config,
    ) -> Decision {
        let (decision, _effect) = resolve(
            store,
            code,
            "page",
            "wp-login",
            "login-probe",
            severity,
            &req(),
            exceptions,
            cfg,
            Effect::new(),
        );
        decision
    }

    #[test]
    fn fail_not_is_always_allowed() {
        let store = InMemoryStore::default();
        let cfg = Config::from_defaults();
        let d = resolve_simple(&store, FAIL_NOT, Severity::Long, &[], &cfg);
        assert!(d.is_empty());
    }

    #[test]
    fn warn_severity_never_blocks() {
        let store = InMemoryStore::default();
        let cfg = Config::from_defaults();
        let d = resolve_simple(&store, 10020, Severity::Warn, &[], &cfg);
        assert!(d.is_empty());
        // still counted for the dashboard
        assert_eq!(crate::metrics::block_groups_24h(&store).total, 1);
    }

    #[test]
    fn enforced_severities_carry_through() {
        let store = InMemoryStore::default();
        let cfg = Config::from_defaults();
        for severity in [Severity::Immediate, Severity::Short, Severity::Medium, Severity::Long] {
            let d = resolve_simple(&store, 10020, severity, &[], &cfg);
            assert_eq!(d.block().map(|b| b.severity), Some(severity));
        }
    }

    #[test]
    fn matching_exception_suppresses_idempotently() {
        let store = InMemoryStore::default();
        let cfg = Config::from_defaults();
        let exceptions = vec![Exception {
            code: 10020,
            parameter: Some("page".to_string()),
            url: Some("/wp-login.php".to_string()),
            host: Some("example.com".to_string()),
            id: "ex-1".to_string(),
        }];
        for _ in 0..3 {
            let d = resolve_simple(&store, 10020, Severity::Long, &exceptions, &cfg);
            assert!(d.is_empty());
        }
    }

    #[test]
    fn exception_must_match_code_parameter_and_location() {
        let store = InMemoryStore::default();
        let cfg = Config::from_defaults();
        let mismatched = vec![Exception {
            code: 10020,
            parameter: Some("other".to_string()),
            url: None,
            host: None,
            id: String::new(),
        }];
        let d = resolve_simple(&store, 10020, Severity::Long, &mismatched, &cfg);
        assert!(!d.is_empty());
        // absent fields are wildcards
        let wildcard = vec![Exception {
            code: 10020,
            parameter: None,
            url: None,
            host: None,
            id: String::new(),
        }];
        let d = resolve_simple(&store, 10020, Severity::Long, &wildcard, &cfg);
        assert!(d.is_empty());
    }

    #[test]
    fn report_policy_logs_without_blocking() {
        let store = InMemoryStore::default();
        let mut cfg = Config::from_defaults();
        cfg.set("web_block", serde_json::json!("report"));
        let (decision, effect) = resolve(
            &store,
            10020,
            "page",
            "wp-login",
            "login-probe",
            Severity::Long,
            &req(),
            &[],
            &cfg,
            Effect::new(),
        );
        assert!(decision.is_empty());
        assert_eq!(effect.read_files().len(), 1);
        assert!(effect.read_files()[0].append);
        assert_eq!(crate::metrics::block_groups_24h(&store).total, 1);
    }

    #[test]
    fn severity_durations_follow_configuration() {
        let cfg = Config::from_defaults();
        assert_eq!(Severity::Warn.duration(&cfg), 0);
        assert_eq!(Severity::Immediate.duration(&cfg), 0);
        assert_eq!(Severity::Short.duration(&cfg), 600);
        assert_eq!(Severity::Medium.duration(&cfg), 3600);
        assert_eq!(Severity::Long.duration(&cfg), 86400);
    }

    #[test]
    fn exception_store_round_trip_preserves_order() {
        let store = InMemoryStore::default();
        for i in 0..3u32 {
            add_exception(
                &store,
                "default",
                Exception {
                    code: 10020 + i,
                    parameter: None,
                    url: None,
                    host: None,
                    id: format!("ex-{}", i),
                },
            )
            .unwrap();
        }
        let loaded = load_exceptions(&store, "default");
        assert_eq!(loaded.iter().map(|e| e.code).collect::<Vec<_>>(), vec![10020, 10021, 10022]);
        delete_exception(&store, "default", "ex-1").unwrap();
        let loaded = load_exceptions(&store, "default");
        assert_eq!(loaded.iter().map(|e| e.code).collect::<Vec<_>>(), vec![10020, 10022]);
    }
}
