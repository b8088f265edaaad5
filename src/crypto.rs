// src/crypto.rs
// Cookie sealing. Tokens are base64(nonce:payload) "." base64(hmac-sha256)
// over the noncer'd payload, so a token opens only under the key that
// sealed it. Opening never panics: wrong keys, truncated or malformed
// tokens collapse to an empty Maybe with a diagnostic trail.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::maybe::Maybe;
use crate::store::now_ts;

pub const MIN_KEY_LEN: usize = 12;
const NONCE_LEN: usize = 16;

fn tag(key: &str, payload: &[u8]) -> Vec<u8> {
    // Hmac accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("hmac key");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn tag_matches(key: &str, payload: &[u8], sig: &[u8]) -> bool {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("hmac key");
    mac.update(payload);
    mac.verify_slice(sig).is_ok()
}

/// Seal a value under the shared key. Returns "" when the key is too
/// short to be worth sealing with.
pub fn seal(key: &str, plaintext: &str) -> String {
    if key.len() < MIN_KEY_LEN {
        return String::new();
    }
    let nonce: String =
        rand::thread_rng().sample_iter(&Alphanumeric).take(NONCE_LEN).map(char::from).collect();
    let payload = format!("{}:{}", nonce, plaintext);
    let sig = tag(key, payload.as_bytes());
    format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    )
}

/// Open a sealed token. Empty Maybe with a trail entry on any failure.
pub fn unseal(key: &str, token: &str) -> Maybe<String> {
    let key = key.to_string();
    Maybe::of(token.to_string())
        .keep_if("key_length", |_| key.len() >= MIN_KEY_LEN)
        .then("split_token", |t| {
            let mut parts = t.splitn(2, '.');
            (
                parts.next().unwrap_or("").to_string(),
                parts.next().unwrap_or("").to_string(),
            )
        })
        .then("decode_token", |(payload_b64, sig_b64)| {
            let payload = general_purpose::STANDARD.decode(payload_b64.as_bytes()).unwrap_or_default();
            let sig = general_purpose::STANDARD.decode(sig_b64.as_bytes()).unwrap_or_default();
            (payload, sig)
        })
        .keep_if("verify_tag", |(payload, sig)| tag_matches(&key, payload, sig))
        .then("strip_nonce", |(payload, _sig)| {
            let text = String::from_utf8(payload).unwrap_or_default();
            match text.split_once(':') {
                Some((nonce, plain)) if nonce.len() == NONCE_LEN => plain.to_string(),
                _ => String::new(),
            }
        })
}

/// 32-bit digest of an IP address: the numeric value for IPv4, a sha256
/// prefix otherwise.
pub fn ip_to_int(ip: &str) -> u32 {
    match ip.parse::<std::net::Ipv4Addr>() {
        Ok(v4) => u32::from(v4),
        Err(_) => digest32(ip),
    }
}

/// 32-bit digest of the user agent, stored in the tracking cookie.
pub fn agent_digest(agent: &str) -> u32 {
    digest32(agent)
}

fn digest32(input: &str) -> u32 {
    let hash = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

/// Fresh tracking cookie payload for an allowed visitor.
pub fn make_tracking_cookie(ip: &str, agent: &str, ttl: u64) -> String {
    serde_json::json!({
        "ip": ip_to_int(ip),
        "ua": agent_digest(agent),
        "et": now_ts() + ttl,
    })
    .to_string()
}

/// Unseal and validate a tracking cookie against the live request: the
/// recorded ip and agent digests must match and the expiry must be in
/// the future. Empty Maybe otherwise, with the failing step on the trail.
pub fn decrypt_tracking_cookie(
    cookie_data: &str,
    key: &str,
    src_ip: &str,
    agent: &str,
) -> Maybe<serde_json::Value> {
    let ip_crc = ip_to_int(src_ip);
    let ua_crc = agent_digest(agent);
    unseal(key, cookie_data)
        .then("un_json", |plain| {
            serde_json::from_str::<serde_json::Value>(&plain).unwrap_or(serde_json::Value::Null)
        })
        .keep_if("cookie_ip", |c| c["ip"].as_u64() == Some(ip_crc as u64))
        .keep_if("cookie_expiry", |c| c["et"].as_u64().unwrap_or(0) > now_ts())
        .keep_if("cookie_agent", |c| c["ua"].as_u64() == Some(ua_crc as u64))
}
