// src/security_headers.rs
// Hardening headers contributed to every inspected request's Effect,
// gated by security_headers_enabled. HSTS additionally requires https
// and the enforce_ssl_1year flag.

use crate::config::Config;
use crate::effects::Effect;
use crate::request::Request;

pub fn apply(request: &Request, cfg: &Config, effect: Effect) -> Effect {
    if !cfg.enabled("security_headers_enabled", false) {
        return effect;
    }
    let mut effect = effect
        .header("x-frame-options", "deny")
        .header("x-content-type-options", "nosniff")
        .header("referrer-policy", "strict-origin-when-cross-origin");
    if request.scheme == "https" && cfg.enabled("enforce_ssl_1year", false) {
        effect = effect.header("strict-transport-security", "max-age=31536000; preload");
    }
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn https_request() -> Request {
        Request { scheme: "https".to_string(), ..Request::default() }
    }

    #[test]
    fn enabled_by_default_and_contributes_headers() {
        let effect = apply(&https_request(), &Config::from_defaults(), Effect::new());
        let names: Vec<&str> =
            effect.read_headers().iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"x-frame-options"));
        assert!(names.contains(&"x-content-type-options"));
        assert!(names.contains(&"referrer-policy"));
        // hsts needs the explicit opt-in
        assert!(!names.contains(&"strict-transport-security"));
    }

    #[test]
    fn disabled_contributes_nothing() {
        let mut cfg = Config::from_defaults();
        cfg.set("security_headers_enabled", json!("false"));
        let effect = apply(&https_request(), &cfg, Effect::new());
        assert!(effect.read_headers().is_empty());
    }

    #[test]
    fn hsts_requires_https_and_the_flag() {
        let mut cfg = Config::from_defaults();
        cfg.set("enforce_ssl_1year", json!("true"));

        let effect = apply(&https_request(), &cfg, Effect::new());
        assert!(effect
            .read_headers()
            .iter()
            .any(|(n, v)| n == "strict-transport-security" && v.contains("max-age=31536000")));

        let plain = Request { scheme: "http".to_string(), ..Request::default() };
        let effect = apply(&plain, &cfg, Effect::new());
        assert!(!effect.read_headers().iter().any(|(n, _)| n == "strict-transport-security"));
    }
}
