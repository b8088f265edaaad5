// src/test_support.rs
// Shared test doubles: an in-memory key-value store and a response sink
// that records everything the applier does to it.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex;

use crate::effects::ResponseSink;
use crate::store::KeyValueStore;

/// HashMap-backed stand-in for the Spin key-value store.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn with_entries(entries: &[(&str, &[u8])]) -> InMemoryStore {
        let store = InMemoryStore::default();
        for (key, value) in entries {
            store.set(key, value).unwrap();
        }
        store
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}

impl KeyValueStore for InMemoryStore {
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

/// A store whose every operation fails, for fail-open tests.
pub struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, ()> {
        Err(())
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), ()> {
        Err(())
    }

    fn delete(&self, _key: &str) -> Result<(), ()> {
        Err(())
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Err(())
    }
}

/// Records the response the applier produced. `on_finish` is an optional
/// probe evaluated when finish() runs; its answer lands in
/// `file_existed_at_finish` so tests can assert ordering against
/// filesystem effects.
#[derive(Default)]
pub struct RecordingSink {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub headers_sent: bool,
    pub on_finish: Option<Box<dyn Fn() -> bool>>,
    pub file_existed_at_finish: Option<bool>,
    finished: bool,
}

impl ResponseSink for RecordingSink {
    fn response_code(&mut self, code: u16) {
        self.status = code;
    }

    fn cookie(&mut self, name: &str, value: &str, _ttl: u64) {
        self.cookies.push((name.to_string(), value.to_string()));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn finish(&mut self) {
        if let Some(probe) = &self.on_finish {
            self.file_existed_at_finish = Some(probe());
        }
        self.finished = true;
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
