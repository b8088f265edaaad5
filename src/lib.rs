// src/lib.rs
// Entry point for the Gatewarden firewall Spin component.

use std::env;
use std::net::Ipv4Addr;

#[cfg(target_arch = "wasm32")]
use spin_sdk::http::IntoResponse;
use spin_sdk::http::Response;
#[cfg(target_arch = "wasm32")]
use spin_sdk::http_component;
use spin_sdk::key_value::Store;

pub mod block_page; // HTML page for denied requests
pub mod blocklist; // Timed source blocks
pub mod cache_behind; // Stale page cache for the site root
pub mod config; // Config loading and defaults
pub mod crypto; // Cookie sealing and tracking cookies
pub mod decision; // Block/exception resolution
pub mod effects; // Deferred side effects
pub mod events; // Dashboard event log
pub mod maybe; // Loose-emptiness result chaining
pub mod metrics; // Rolling 24h counters
pub mod request; // Normalized request
pub mod rules; // Declarative request matching
pub mod security_headers; // Hardening response headers
pub mod store; // Key-value store seam
#[cfg(test)]
pub mod test_support;

use crate::config::{Config, Policy};
use crate::decision::{feature_class, Block, Decision, Exception, Severity};
use crate::effects::{Effect, ResponseSink};
use crate::events::{EventLogEntry, EventType};
use crate::metrics::MetricKey;
use crate::request::Request;
use crate::rules::{MatchKind, MatchRule};
use crate::store::{KeyValueStore, DAY};

// Classification codes of the built-in rule set.
pub const CODE_METHOD_NOT_ALLOWED: u32 = 10010;
pub const CODE_PATH_PATTERN: u32 = 10020;
pub const CODE_BLOCKED_IP: u32 = 10030;
pub const CODE_BLOCKED_AGENT: u32 = 20010;

/// True if forwarded IP headers should be trusted for this request.
/// If GW_FORWARDED_IP_SECRET is set, require a matching
/// x-gw-forwarded-secret header.
fn forwarded_ip_trusted(req: &spin_sdk::http::Request) -> bool {
    match env::var("GW_FORWARDED_IP_SECRET") {
        Ok(secret) => req
            .header("x-gw-forwarded-secret")
            .and_then(|v| v.as_str())
            .map(|v| v == secret)
            .unwrap_or(false),
        Err(_) => true,
    }
}

/// Extract the best available client IP from the request.
pub(crate) fn extract_client_ip(req: &spin_sdk::http::Request) -> String {
    if forwarded_ip_trusted(req) {
        if let Some(h) = req.header("x-forwarded-for") {
            let val = h.as_str().unwrap_or("");
            if let Some(ip) = val.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() && ip != "unknown" {
                    return ip.to_string();
                }
            }
        }
        if let Some(h) = req.header("x-real-ip") {
            let val = h.as_str().unwrap_or("");
            if !val.is_empty() && val != "unknown" {
                return val.to_string();
            }
        }
    }
    "unknown".to_string()
}

/// Configured fail mode when the KV store is unreachable: "open"
/// (default, let traffic through) or "closed".
fn fail_mode() -> String {
    env::var("GW_FAIL_MODE").unwrap_or_else(|_| "open".to_string()).to_lowercase()
}

/// One entry of the built-in rule table.
struct FirewallRule {
    code: u32,
    severity: Severity,
    rule: MatchRule,
}

/// Per-request inspection context. Built once per request from config
/// and the stored exception list; holds no global state.
pub struct Firewall {
    pub cfg: Config,
    pub exceptions: Vec<Exception>,
    pub site_id: String,
}

impl Firewall {
    pub fn load(store: &impl KeyValueStore, site_id: &str) -> Firewall {
        Firewall {
            cfg: Config::load(store, site_id),
            exceptions: decision::load_exceptions(store, site_id),
            site_id: site_id.to_string(),
        }
    }

    /// Rule table from configuration, cheapest comparisons first.
    fn rule_table(&self) -> Vec<FirewallRule> {
        let mut table = Vec::new();

        let allowed_methods = self.cfg.list("allowed_methods");
        if !allowed_methods.is_empty() {
            table.push(FirewallRule {
                code: CODE_METHOD_NOT_ALLOWED,
                severity: Severity::Immediate,
                rule: MatchRule::new(MatchKind::NotIn(allowed_methods), "method"),
            });
        }

        let blocked_ips = self.cfg.list("blocked_ips");
        if !blocked_ips.is_empty() {
            table.push(FirewallRule {
                code: CODE_BLOCKED_IP,
                severity: Severity::Long,
                rule: MatchRule::new(MatchKind::In(blocked_ips), "ip"),
            });
        }

        let blocked_agents = self.cfg.list("blocked_agents");
        if !blocked_agents.is_empty() {
            table.push(FirewallRule {
                code: CODE_BLOCKED_AGENT,
                severity: Severity::Medium,
                rule: MatchRule::new(MatchKind::Contains(blocked_agents), "agent"),
            });
        }

        for pattern in self.cfg.list("blocked_path_patterns") {
            match regex::Regex::new(&pattern) {
                Ok(re) => table.push(FirewallRule {
                    code: CODE_PATH_PATTERN,
                    severity: Severity::Medium,
                    rule: MatchRule::new(MatchKind::Pattern(re), "path"),
                }),
                Err(_) => eprintln!("[rules] skipping unparsable pattern {:?}", pattern),
            }
        }

        table
    }

    /// Inspect one request. Returns the Decision, the accumulated Effect
    /// (applied exactly once by the caller), and a cache refresh to run
    /// after the response is out.
    pub fn inspect(
        &self,
        store: &impl KeyValueStore,
        request: &Request,
    ) -> (Decision, Effect, Option<cache_behind::RefreshJob>) {
        let mut effect = Effect::new();

        if !self.cfg.enabled("firewall_enabled", true) {
            return (Decision::empty(), effect, None);
        }

        effect = security_headers::apply(request, &self.cfg, effect);

        // standing block from an earlier request
        if let Some(entry) = blocklist::active_block(store, &self.site_id, &request.ip) {
            let block = Block {
                code: entry.code,
                parameter: "ip".to_string(),
                value: request.ip.clone(),
                pattern: entry.reason.clone(),
                severity: Severity::Immediate,
            };
            let effect = self.deny(store, request, &block, effect);
            return (Decision::of(block), effect, None);
        }

        for FirewallRule { code, severity, mut rule } in self.rule_table() {
            if !rule.evaluate(request) {
                continue;
            }
            let pattern = match &rule.kind {
                MatchKind::Pattern(re) => re.as_str().to_string(),
                _ => rule.field.clone(),
            };
            let (decision, resolved) = decision::resolve(
                store,
                code,
                &rule.field,
                &rule.matched,
                &pattern,
                severity,
                request,
                &self.exceptions,
                &self.cfg,
                effect,
            );
            effect = resolved;

            match decision.block().cloned() {
                Some(block) => {
                    blocklist::block_source(
                        store,
                        &self.site_id,
                        &request.ip,
                        block.code,
                        &block.pattern,
                        block.severity.duration(&self.cfg),
                    );
                    let effect = self.deny(store, request, &block, effect);
                    return (decision, effect, None);
                }
                // a suppressed or report-only class never disarms the
                // remaining rules
                None => {
                    self.log_suppressed(store, request, code, severity);
                    continue;
                }
            }
        }

        // allowed: count it and keep the tracking cookie alive
        effect = self.track_visitor(store, request, effect);
        let (effect, refresh) = cache_behind::serve(request, &self.cfg, effect);
        (Decision::empty(), effect, refresh)
    }

    /// Enforcement effects of a confirmed block: 403, block page,
    /// counters, event log entry, exit.
    fn deny(
        &self,
        store: &impl KeyValueStore,
        request: &Request,
        block: &Block,
        effect: Effect,
    ) -> Effect {
        metrics::record_event(store, &MetricKey::Code(block.code));
        if let Ok(addr) = request.ip.parse::<Ipv4Addr>() {
            metrics::record_event(store, &MetricKey::Address(addr));
        }
        events::log_event(
            store,
            &self.site_id,
            &EventLogEntry::new(EventType::Block, &request.ip, &block.pattern, "blocked"),
        );
        effect
            .response_code(403)
            .header("content-type", "text/html")
            .out(block_page::render_block_page(block))
            .status(block.code as i64)
            .exit(true)
    }

    /// A rule hit that resolved to allow was either report-only or
    /// suppressed by an exception; the event log records which.
    fn log_suppressed(
        &self,
        store: &impl KeyValueStore,
        request: &Request,
        code: u32,
        severity: Severity,
    ) {
        let event = match self.cfg.policy(feature_class(code)) {
            Policy::Report => EventType::Report,
            Policy::Block if severity != Severity::Warn => EventType::Exception,
            _ => return,
        };
        events::log_event(
            store,
            &self.site_id,
            &EventLogEntry::new(event, &request.ip, &code.to_string(), "allowed"),
        );
    }

    /// Count the allowed request as "valid" when it carries a live
    /// tracking cookie, else as "challenge" with a fresh cookie issued.
    fn track_visitor(
        &self,
        store: &impl KeyValueStore,
        request: &Request,
        effect: Effect,
    ) -> Effect {
        let key = self.cfg.str("encryption_key", "");
        if !self.cfg.enabled("cookies_enabled", true) || key.len() < crypto::MIN_KEY_LEN {
            metrics::record_event(store, &MetricKey::Valid);
            return effect;
        }
        let name = self.cfg.str("user_track_cookie", "_gwuid");
        let cookie = request.cookies.get(&name).cloned().unwrap_or_default();
        let live = !cookie.is_empty()
            && !crypto::decrypt_tracking_cookie(&cookie, &key, &request.ip, &request.agent)
                .is_empty();
        if live {
            metrics::record_event(store, &MetricKey::Valid);
            effect
        } else {
            metrics::record_event(store, &MetricKey::Challenge);
            effect.cookie(&crypto::make_tracking_cookie(&request.ip, &request.agent, DAY))
        }
    }
}

/// Response sink over the Spin response builder.
#[derive(Default)]
struct HttpResponseSink {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finished: bool,
}

impl ResponseSink for HttpResponseSink {
    fn response_code(&mut self, code: u16) {
        self.status = code;
    }

    fn cookie(&mut self, name: &str, value: &str, ttl: u64) {
        self.headers.push((
            "set-cookie".to_string(),
            format!("{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax", name, value, ttl),
        ));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

impl HttpResponseSink {
    /// The terminal response when an effect exited, else a pass-through
    /// marker carrying any accumulated headers.
    fn into_response(self) -> Response {
        let status = if self.status > 0 { self.status } else { 200 };
        let mut builder = Response::builder();
        builder.status(status);
        for (name, value) in &self.headers {
            builder.header(name.as_str(), value.as_str());
        }
        if self.finished {
            builder.body(self.body).build()
        } else {
            builder.header("x-gatewarden", "pass").body("OK").build()
        }
    }
}

/// Main handler logic, testable as a plain Rust function where the
/// store is injectable.
pub fn handle_request_impl(
    req: &spin_sdk::http::Request,
) -> (Response, Option<cache_behind::RefreshJob>) {
    let store = match Store::open_default() {
        Ok(s) => s,
        Err(_) => {
            let mode = fail_mode();
            println!("[KV OUTAGE] Key-value store unavailable; GW_FAIL_MODE={}", mode);
            let resp = if mode == "closed" {
                Response::new(503, "Service Unavailable")
            } else {
                Response::builder().status(200).header("x-gatewarden", "pass").body("OK").build()
            };
            return (resp, None);
        }
    };

    let ip = extract_client_ip(req);
    let request = Request::from_http(req, &ip);
    let site_id = env::var("GW_SITE_ID").unwrap_or_else(|_| "default".to_string());
    let firewall = Firewall::load(&store, &site_id);

    let (_decision, effect, refresh) = firewall.inspect(&store, &request);

    let mut sink = HttpResponseSink::default();
    let outcome = effect.apply(&mut sink, &store, &firewall.cfg);
    for err in &outcome.errors {
        eprintln!("[apply] {}", err);
    }
    (sink.into_response(), refresh)
}

#[cfg(target_arch = "wasm32")]
#[http_component]
pub fn spin_entrypoint(req: spin_sdk::http::Request) -> impl IntoResponse {
    let (response, refresh) = handle_request_impl(&req);
    // refresh runs after the response is fully built; its failures never
    // reach the client
    if let Some(job) = refresh {
        job.run(&cache_behind::SpinPageFetcher);
    }
    response
}
