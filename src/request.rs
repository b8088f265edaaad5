// src/request.rs
// Normalized inbound request. Built once from the transport request and
// immutable for the duration of one inspection pass.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::Serialize;

/// One normalized HTTP request as the inspection pipeline sees it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Request {
    pub host: String,
    pub path: String,
    pub method: String,
    pub scheme: String,
    pub ip: String,
    pub headers: HashMap<String, String>,
    pub get: HashMap<String, String>,
    pub get_freq: HashMap<String, u32>,
    pub post: HashMap<String, String>,
    pub post_freq: HashMap<String, u32>,
    pub cookies: HashMap<String, String>,
    pub agent: String,
    pub referer: String,
    pub ajax: bool,
}

impl Request {
    /// Scalar field lookup by name, used by the rule matcher. Unknown
    /// fields yield the empty string.
    pub fn field(&self, name: &str) -> String {
        match name {
            "host" => self.host.clone(),
            "path" => self.path.clone(),
            "method" => self.method.clone(),
            "scheme" => self.scheme.clone(),
            "ip" => self.ip.clone(),
            "agent" => self.agent.clone(),
            "referer" => self.referer.clone(),
            "ajax" => if self.ajax { "1".to_string() } else { String::new() },
            _ => String::new(),
        }
    }

    pub fn host_path(&self) -> String {
        format!("{}:{}", self.host, self.path)
    }

    /// Build from the Spin HTTP request. Query and cookie pairs are
    /// percent-decoded; body parsing is limited to form pairs.
    pub fn from_http(req: &spin_sdk::http::Request, client_ip: &str) -> Request {
        let mut headers = HashMap::new();
        for (name, value) in req.headers() {
            headers.insert(name.to_ascii_lowercase(), value.as_str().unwrap_or("").to_string());
        }

        let (get, get_freq) = parse_pairs(req.query());
        let body = std::str::from_utf8(req.body()).unwrap_or("");
        let (post, post_freq) = parse_pairs(body);
        let cookies = parse_cookies(headers.get("cookie").map(String::as_str).unwrap_or(""));

        let agent = headers.get("user-agent").cloned().unwrap_or_default();
        let referer = headers.get("referer").cloned().unwrap_or_default();
        let ajax = headers
            .get("x-requested-with")
            .map(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
            .unwrap_or(false);

        let uri = req.uri();
        let scheme = if uri.starts_with("https") { "https" } else { "http" };

        use spin_sdk::http::Method;
        let method = match req.method() {
            Method::Get => "GET".to_string(),
            Method::Post => "POST".to_string(),
            Method::Put => "PUT".to_string(),
            Method::Delete => "DELETE".to_string(),
            Method::Patch => "PATCH".to_string(),
            Method::Head => "HEAD".to_string(),
            Method::Options => "OPTIONS".to_string(),
            other => format!("{:?}", other).to_uppercase(),
        };

        Request {
            host: headers.get("host").cloned().unwrap_or_default(),
            path: req.path().to_string(),
            method,
            scheme: scheme.to_string(),
            ip: client_ip.to_string(),
            headers,
            get,
            get_freq,
            post,
            post_freq,
            cookies,
            agent,
            referer,
            ajax,
        }
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Split `a=1&b=2` into a value map plus per-key occurrence counts.
/// The last value for a repeated key wins; the frequency map remembers
/// how often the key appeared.
fn parse_pairs(raw: &str) -> (HashMap<String, String>, HashMap<String, u32>) {
    let mut values = HashMap::new();
    let mut freq = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        *freq.entry(key.clone()).or_insert(0) += 1;
        values.insert(key, decode(value));
    }
    (values, freq)
}

fn parse_cookies(raw: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}
