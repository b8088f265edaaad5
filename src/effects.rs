// src/effects.rs
// Deferred side effects of one request. An Effect is pure data while the
// pipeline runs; apply() executes it exactly once, in a fixed order, at
// the end of request handling. Cache updates and file writes always
// complete before an exit is honored.

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::crypto;
use crate::store::{self, KeyValueStore, DAY};

/// One pending filesystem mutation.
pub struct FileMod {
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
    pub modtime: Option<u64>,
    pub append: bool,
}

impl FileMod {
    pub fn new(path: &str, content: impl Into<Vec<u8>>) -> FileMod {
        FileMod { path: path.to_string(), content: content.into(), mode: 0o664, modtime: None, append: false }
    }

    pub fn mode(mut self, mode: u32) -> FileMod {
        self.mode = mode;
        self
    }

    pub fn modtime(mut self, ts: u64) -> FileMod {
        self.modtime = Some(ts);
        self
    }

    pub fn append(mut self) -> FileMod {
        self.append = true;
        self
    }
}

/// One pending atomic cache update, applied read-modify-or-initialize.
pub struct CacheUpdate {
    pub key: String,
    pub ttl: u64,
    pub init: serde_json::Value,
    pub update: Box<dyn Fn(&mut serde_json::Value)>,
}

/// Transport seam the applier writes the response through. Production
/// wraps the Spin response builder; tests observe call order.
pub trait ResponseSink {
    fn response_code(&mut self, code: u16);
    fn cookie(&mut self, name: &str, value: &str, ttl: u64);
    fn header(&mut self, name: &str, value: &str);
    fn write(&mut self, bytes: &[u8]);
    /// True once headers are out of reach; cookie and header effects are
    /// skipped past this point.
    fn headers_sent(&self) -> bool {
        false
    }
    fn finish(&mut self);
    fn finished(&self) -> bool;
}

/// Failures observed while applying; never raised.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub errors: Vec<String>,
}

#[derive(Default)]
pub struct Effect {
    out: Vec<u8>,
    response: u16,
    exit: bool,
    headers: Vec<(String, String)>,
    cookie: String,
    cache: Vec<CacheUpdate>,
    files: Vec<FileMod>,
    status: i64,
}

impl Effect {
    pub fn new() -> Effect {
        Effect::default()
    }

    pub fn out(mut self, bytes: impl AsRef<[u8]>) -> Effect {
        self.out.extend_from_slice(bytes.as_ref());
        self
    }

    /// Last write for a given name wins; first-write order is kept.
    pub fn header(mut self, name: &str, value: &str) -> Effect {
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn cookie(mut self, value: &str) -> Effect {
        self.cookie = value.to_string();
        self
    }

    pub fn response_code(mut self, code: u16) -> Effect {
        self.response = code;
        self
    }

    /// Queue an atomic update for a cache key. A later update for the
    /// same key replaces the earlier one.
    pub fn cache_update(
        mut self,
        key: &str,
        ttl: u64,
        init: serde_json::Value,
        update: impl Fn(&mut serde_json::Value) + 'static,
    ) -> Effect {
        let item = CacheUpdate { key: key.to_string(), ttl, init, update: Box::new(update) };
        match self.cache.iter_mut().find(|c| c.key == item.key) {
            Some(existing) => *existing = item,
            None => self.cache.push(item),
        }
        self
    }

    pub fn file(mut self, file: FileMod) -> Effect {
        self.files.push(file);
        self
    }

    pub fn exit(mut self, should_exit: bool) -> Effect {
        self.exit = should_exit;
        self
    }

    pub fn status(mut self, status: i64) -> Effect {
        self.status = status;
        self
    }

    pub fn read_exit(&self) -> bool {
        self.exit
    }

    pub fn read_out(&self) -> &[u8] {
        &self.out
    }

    pub fn read_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn read_cookie(&self) -> &str {
        &self.cookie
    }

    pub fn read_code(&self) -> u16 {
        self.response
    }

    pub fn read_status(&self) -> i64 {
        self.status
    }

    pub fn read_files(&self) -> &[FileMod] {
        &self.files
    }

    /// Associative combine: concatenate output, union headers with the
    /// later value winning, append cache and file lists, later scalars
    /// win where set.
    pub fn absorb(mut self, other: Effect) -> Effect {
        self.out.extend_from_slice(&other.out);
        for (name, value) in other.headers {
            self = self.header(&name, &value);
        }
        if !other.cookie.is_empty() {
            self.cookie = other.cookie;
        }
        for item in other.cache {
            match self.cache.iter_mut().find(|c| c.key == item.key) {
                Some(existing) => *existing = item,
                None => self.cache.push(item),
            }
        }
        self.files.extend(other.files);
        if other.response != 0 {
            self.response = other.response;
        }
        if other.status != 0 {
            self.status = other.status;
        }
        if other.exit {
            self.exit = true;
        }
        self
    }

    /// Execute the accumulated effects in their fixed order:
    /// response code, cookie, headers, cache updates, file writes,
    /// output, exit. Cache and file work strictly precedes the exit so
    /// nothing queued is ever dropped by an exiting request. I/O
    /// failures are collected, never raised.
    pub fn apply(
        &self,
        sink: &mut dyn ResponseSink,
        store: &impl KeyValueStore,
        cfg: &Config,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        if self.response > 0 {
            sink.response_code(self.response);
        }

        if !self.cookie.is_empty() && cfg.enabled("cookies_enabled", true) && !sink.headers_sent() {
            let key = cfg.str("encryption_key", "");
            let sealed = crypto::seal(&key, &self.cookie);
            if sealed.is_empty() {
                outcome.errors.push("cookie not sealed: encryption_key unusable".to_string());
            } else {
                sink.cookie(&cfg.str("user_track_cookie", "_gwuid"), &sealed, DAY);
            }
        }

        if !sink.headers_sent() {
            for (name, value) in &self.headers {
                sink.header(name, value);
            }
        }

        for item in &self.cache {
            let result =
                store::update_data(store, &item.key, item.ttl, item.init.clone(), |value| {
                    (item.update)(value)
                });
            if result.is_err() {
                outcome.errors.push(format!("cache update failed for {}", item.key));
            }
        }

        for file in &self.files {
            if let Err(err) = write_file(file) {
                outcome.errors.push(format!("file write failed for {}: {}", file.path, err));
            }
        }

        if !self.out.is_empty() {
            sink.write(&self.out);
        }

        if self.exit {
            sink.finish();
        }

        outcome
    }
}

fn write_file(file: &FileMod) -> std::io::Result<()> {
    if let Some(parent) = Path::new(&file.path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if file.append {
        use std::io::Write;
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&file.path)?;
        f.write_all(&file.content)?;
    } else {
        fs::write(&file.path, &file.content)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&file.path, fs::Permissions::from_mode(file.mode))?;
    }
    if let Some(ts) = file.modtime {
        let f = fs::OpenOptions::new().write(true).open(&file.path)?;
        f.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(ts))?;
    }
    Ok(())
}
