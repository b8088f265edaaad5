// tests/inspection_order.rs
// End-to-end inspection tests: rule matching through decision resolution
// through effect application, against an in-memory store.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;

use gatewarden::config::Config;
use gatewarden::effects::ResponseSink;
use gatewarden::request::Request;
use gatewarden::store::KeyValueStore;
use gatewarden::{blocklist, decision, events, metrics, Firewall, CODE_BLOCKED_AGENT};

#[derive(Default)]
struct TestStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyValueStore for TestStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        self.data.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Ok(self.data.lock().unwrap().keys().cloned().collect())
    }
}

#[derive(Default)]
struct TestSink {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finished: bool,
}

impl ResponseSink for TestSink {
    fn response_code(&mut self, code: u16) {
        self.status = code;
    }

    fn cookie(&mut self, name: &str, value: &str, _ttl: u64) {
        self.headers.push(("set-cookie".to_string(), format!("{}={}", name, value)));
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

fn firewall() -> Firewall {
    let mut cfg = Config::from_defaults();
    cfg.set("blocked_agents", json!("curl,wget"));
    cfg.set("encryption_key", json!("a-sealing-key-of-decent-size"));
    Firewall { cfg, exceptions: Vec::new(), site_id: "default".to_string() }
}

fn request(agent: &str) -> Request {
    Request {
        host: "example.com".to_string(),
        path: "/".to_string(),
        method: "GET".to_string(),
        scheme: "https".to_string(),
        ip: "1.2.3.4".to_string(),
        agent: agent.to_string(),
        ..Request::default()
    }
}

#[test]
fn blocked_request_renders_a_403_page() {
    let store = TestStore::default();
    let fw = firewall();
    let (decision, effect, _) = fw.inspect(&store, &request("curl/8.0"));
    assert_eq!(decision.block().map(|b| b.code), Some(CODE_BLOCKED_AGENT));

    let mut sink = TestSink::default();
    let outcome = effect.apply(&mut sink, &store, &fw.cfg);
    assert!(outcome.errors.is_empty());
    assert_eq!(sink.status, 403);
    assert!(sink.finished);
    assert!(String::from_utf8_lossy(&sink.body).contains("Access Blocked"));
}

#[test]
fn second_request_hits_the_standing_block() {
    let store = TestStore::default();
    let fw = firewall();
    let (first, _, _) = fw.inspect(&store, &request("curl/8.0"));
    assert!(!first.is_empty());
    assert!(blocklist::is_blocked(&store, "default", "1.2.3.4"));

    // even a clean browser request from the same source is denied now
    let (second, effect, _) = fw.inspect(&store, &request("Mozilla/5.0"));
    assert!(!second.is_empty());
    assert_eq!(effect.read_code(), 403);
    assert_eq!(events::recent_events(&store, "default").len(), 2);
}

#[test]
fn allowed_request_sets_a_sealed_tracking_cookie() {
    let store = TestStore::default();
    let fw = firewall();
    let (decision, effect, _) = fw.inspect(&store, &request("Mozilla/5.0"));
    assert!(decision.is_empty());

    let mut sink = TestSink::default();
    effect.apply(&mut sink, &store, &fw.cfg);
    assert!(!sink.finished);
    let cookie = sink
        .headers
        .iter()
        .find(|(name, _)| name == "set-cookie")
        .map(|(_, value)| value.clone())
        .expect("tracking cookie issued");
    assert!(cookie.starts_with("_gwuid="));
    assert_eq!(metrics::valid_challenge_24h(&store), (0, 1));
}

#[test]
fn stored_exception_survives_reload_and_suppresses() {
    let store = TestStore::default();
    decision::add_exception(
        &store,
        "default",
        decision::Exception {
            code: CODE_BLOCKED_AGENT,
            parameter: None,
            url: None,
            host: Some("example.com".to_string()),
            id: "allow-curl".to_string(),
        },
    )
    .unwrap();

    let template = firewall();
    let mut fw = Firewall::load(&store, "default");
    fw.cfg = template.cfg;
    let (decision, effect, _) = fw.inspect(&store, &request("curl/8.0"));
    assert!(decision.is_empty());
    assert!(!effect.read_exit());
    assert!(!blocklist::is_blocked(&store, "default", "1.2.3.4"));
}
