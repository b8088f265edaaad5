// src/cache_behind.rs
// Cache-behind stale page serving. The site root is served from a cached
// artifact while it is fresh; every eligible request schedules an
// out-of-band refresh that re-fetches the page through the front door
// and rewrites the artifact. Refresh requests carry the internal secret
// parameter and are themselves never eligible, which breaks the
// self-fetch cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Config;
use crate::effects::Effect;
use crate::maybe::Maybe;
use crate::request::Request;

/// Outbound fetch seam for the deferred refresh.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Maybe<Vec<u8>>;
}

/// Production fetcher: Spin outbound HTTP, fire-and-forget.
pub struct SpinPageFetcher;

impl PageFetcher for SpinPageFetcher {
    fn fetch(&self, url: &str) -> Maybe<Vec<u8>> {
        let request = spin_sdk::http::Request::get(url).build();
        let response: Result<spin_sdk::http::Response, _> =
            spin_sdk::http::run(spin_sdk::http::send(request));
        match response {
            Ok(resp) => Maybe::of(resp.body().to_vec()),
            Err(err) => {
                eprintln!("[cache] refresh fetch failed for {}: {:?}", url, err);
                Maybe::none()
            }
        }
    }
}

/// A deferred, non-blocking refresh of the cached artifact. Runs after
/// the response is out; failures are logged and never propagate to the
/// request that scheduled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshJob {
    pub url: String,
    pub target: PathBuf,
}

impl RefreshJob {
    pub fn run(&self, fetcher: &impl PageFetcher) {
        let page = fetcher.fetch(&self.url).keep_if("page_bytes", |b| !b.is_empty());
        let Some(bytes) = page.into_value() else {
            eprintln!("[cache] refresh produced no page for {}", self.url);
            return;
        };
        if let Some(parent) = self.target.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if fs::write(&self.target, &bytes).is_err() {
            eprintln!("[cache] could not write {}", self.target.display());
        }
    }
}

/// A request may consult the cache only when it is the bare site root:
/// GET on "/", no query parameters, no cookies beyond the tracking
/// cookie, caching enabled, and not an internal refresh request.
pub fn eligible(request: &Request, cfg: &Config) -> bool {
    if cfg.int("max_cache_age", 0) <= 0 {
        return false;
    }
    if request.get.contains_key(&cfg.str("internal_param", "_gw")) {
        return false;
    }
    let tracking = cfg.str("user_track_cookie", "_gwuid");
    let foreign_cookies =
        request.cookies.keys().filter(|name| !name.contains(&tracking)).count();
    request.path == "/" && request.method == "GET" && request.get.is_empty() && foreign_cookies == 0
}

/// FRESH iff the artifact exists and its modification time plus the
/// configured max age is still in the future.
pub fn cached_page_is_valid(page: &Path, max_age: u64) -> bool {
    let Ok(meta) = fs::metadata(page) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now() < modified + std::time::Duration::from_secs(max_age)
}

fn cache_target(request: &Request, cfg: &Config) -> PathBuf {
    PathBuf::from(cfg.str("cache_dir", "cache")).join(format!("root:{}", request.host))
}

/// Consult the cache for an eligible request. FRESH serves the cached
/// bytes and exits; STALE/ABSENT leaves the request to render live. In
/// both cases a refresh of the artifact is scheduled.
pub fn serve(request: &Request, cfg: &Config, effect: Effect) -> (Effect, Option<RefreshJob>) {
    if !eligible(request, cfg) {
        return (effect, None);
    }

    let target = cache_target(request, cfg);
    let job = RefreshJob {
        url: format!(
            "{}://{}/?{}={}",
            request.scheme,
            request.host,
            cfg.str("internal_param", "_gw"),
            cfg.str("internal_secret", "gatewarden-internal"),
        ),
        target: target.clone(),
    };

    let max_age = cfg.int("max_cache_age", 0).max(0) as u64;
    if cached_page_is_valid(&target, max_age) {
        match fs::read(&target) {
            Ok(bytes) => {
                let effect = effect
                    .header("x-cache-valid", "true")
                    .header("x-cached", "1")
                    .out(bytes)
                    .out("<!-- cache -->\n")
                    .exit(true);
                return (effect, Some(job));
            }
            Err(_) => {
                eprintln!("[cache] could not read {}", target.display());
            }
        }
    }

    (effect.header("x-cache-valid", "false"), Some(job))
}
