//! In-process remote filesystem service for tests.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::transport::{BULK_LISTING_METHOD, EXISTS_METHOD, REQUIRED_METHODS, ServiceTransport};
use crate::vfs::error::VfsResult;
use crate::vfs::types::{normalize, split};

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<String, (Vec<u8>, u64)>,
    dirs: BTreeSet<String>,
}

impl MockState {
    fn is_child(path: &str, dir: &str) -> bool {
        split(path).is_some_and(|(parent, _)| parent == dir)
    }

    fn stat(&self, path: &str) -> Option<Value> {
        if self.dirs.contains(path) {
            return Some(json!({"size": 0, "mtime": 0, "isDirectory": true, "mode": 0o755}));
        }
        let (data, mtime) = self.files.get(path)?;
        Some(json!({"size": data.len(), "mtime": mtime, "isDirectory": false, "mode": 0o644}))
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let dirs = self.dirs.iter().filter(|d| !d.is_empty());
        dirs.chain(self.files.keys())
            .filter(|p| Self::is_child(p, dir))
            .cloned()
            .collect()
    }
}

/// Filesystem service held in memory.
///
/// Counts calls per method so tests can observe caching and bulk listing.
#[derive(Debug)]
pub struct MockService {
    state: Mutex<MockState>,
    calls: DashMap<String, usize>,
    methods: Vec<String>,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    /// Service advertising the required methods plus both optional ones.
    pub fn new() -> Self {
        let mut methods: Vec<String> = REQUIRED_METHODS.iter().map(|m| m.to_string()).collect();
        methods.push(BULK_LISTING_METHOD.to_string());
        methods.push(EXISTS_METHOD.to_string());
        Self::with_methods(methods)
    }

    /// Service advertising only the required methods.
    pub fn minimal() -> Self {
        Self::with_methods(REQUIRED_METHODS.iter().map(|m| m.to_string()).collect())
    }

    pub fn with_methods(methods: Vec<String>) -> Self {
        let mut state = MockState::default();
        state.dirs.insert(String::new());
        Self {
            state: Mutex::new(state),
            calls: DashMap::new(),
            methods,
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.get(method).map(|c| *c).unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `write` hang, for exercising timeouts.
    pub fn set_stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let key = normalize(path)?;
        self.state.lock().files.get(&key).map(|(d, _)| d.clone())
    }

    pub fn is_dir(&self, path: &str) -> bool {
        normalize(path).is_some_and(|key| self.state.lock().dirs.contains(&key))
    }

    /// Place a file directly, creating missing parents.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let Some(key) = normalize(path) else { return };
        let mut state = self.state.lock();
        let mut parent = split(&key).map(|(p, _)| p.to_string());
        while let Some(dir) = parent {
            parent = split(&dir).map(|(p, _)| p.to_string());
            state.dirs.insert(dir);
        }
        state.files.insert(key, (data.to_vec(), now_ms()));
    }

    fn handle(&self, method: &str, kwargs: &Value) -> Value {
        let arg = |name: &str| -> Option<String> {
            kwargs.get(name).and_then(Value::as_str).and_then(normalize)
        };
        let Some(path) = arg("p").or_else(|| arg("oldPath")) else {
            return json!({"error": "EINVAL: missing path"});
        };
        let mut state = self.state.lock();
        let parent_exists =
            |state: &MockState, p: &str| split(p).is_some_and(|(parent, _)| state.dirs.contains(parent));

        match method {
            "stat" => state
                .stat(&path)
                .unwrap_or_else(|| json!({"error": format!("ENOENT: {path}")})),
            "exists" => json!(state.stat(&path).is_some()),
            "readdir" | "readdirwithstats" => {
                if !state.dirs.contains(&path) {
                    return json!({"error": format!("ENOENT: {path}")});
                }
                let children = state.children(&path);
                let listing: Vec<Value> = children
                    .iter()
                    .filter_map(|child| {
                        let (_, name) = split(child)?;
                        if method == "readdir" {
                            return Some(json!(name));
                        }
                        let mut stat = state.stat(child)?;
                        stat["name"] = json!(name);
                        Some(stat)
                    })
                    .collect();
                Value::Array(listing)
            }
            "mkdir" => {
                if state.stat(&path).is_some() {
                    return json!({"error": format!("EEXIST: {path}")});
                }
                if !parent_exists(&*state, &path) {
                    return json!({"error": format!("ENOENT: {path}")});
                }
                state.dirs.insert(path);
                json!({"ok": true})
            }
            "unlink" => match state.files.remove(&path) {
                Some(_) => json!({"ok": true}),
                None => json!({"error": format!("ENOENT: {path}")}),
            },
            "rmdir" => {
                if path.is_empty() || !state.dirs.contains(&path) {
                    return json!({"error": format!("ENOENT: {path}")});
                }
                if !state.children(&path).is_empty() {
                    return json!({"error": format!("ENOTEMPTY: {path}")});
                }
                state.dirs.remove(&path);
                json!({"ok": true})
            }
            "rename" => {
                let Some(to) = arg("newPath") else {
                    return json!({"error": "EINVAL: missing newPath"});
                };
                if !parent_exists(&*state, &to) {
                    return json!({"error": format!("ENOENT: {to}")});
                }
                if let Some(file) = state.files.remove(&path) {
                    state.files.insert(to, file);
                    return json!({"ok": true});
                }
                if !state.dirs.remove(&path) {
                    return json!({"error": format!("ENOENT: {path}")});
                }
                let prefix = format!("{path}/");
                let moved = |p: &String| format!("{to}/{}", &p[prefix.len()..]);
                let dirs: Vec<String> = state.dirs.iter().filter(|d| d.starts_with(&prefix)).cloned().collect();
                for d in dirs {
                    state.dirs.remove(&d);
                    state.dirs.insert(moved(&d));
                }
                let files: Vec<String> = state.files.keys().filter(|f| f.starts_with(&prefix)).cloned().collect();
                for f in files {
                    if let Some(file) = state.files.remove(&f) {
                        state.files.insert(moved(&f), file);
                    }
                }
                state.dirs.insert(to);
                json!({"ok": true})
            }
            "read" => {
                let Some((data, _)) = state.files.get(&path) else {
                    return json!({"error": format!("ENOENT: {path}")});
                };
                let position = kwargs["position"].as_u64().unwrap_or(0) as usize;
                let length = kwargs["length"].as_u64().unwrap_or(0) as usize;
                let start = position.min(data.len());
                let end = start.saturating_add(length).min(data.len());
                json!({"data": STANDARD.encode(&data[start..end])})
            }
            "write" => {
                if self.fail_writes.load(Ordering::SeqCst) {
                    return json!({"error": format!("EIO: {path}")});
                }
                if !parent_exists(&*state, &path) || state.dirs.contains(&path) {
                    return json!({"error": format!("ENOENT: {path}")});
                }
                let Ok(bytes) = STANDARD.decode(kwargs["data"].as_str().unwrap_or("")) else {
                    return json!({"error": "EINVAL: bad data"});
                };
                let position = kwargs["position"].as_u64().unwrap_or(0) as usize;
                let truncate = kwargs["truncate"].as_bool().unwrap_or(false);
                let entry = state.files.entry(path).or_insert_with(|| (Vec::new(), 0));
                if truncate {
                    entry.0.clear();
                }
                let end = position + bytes.len();
                if entry.0.len() < end {
                    entry.0.resize(end, 0);
                }
                entry.0[position..end].copy_from_slice(&bytes);
                entry.1 = now_ms();
                json!({"written": bytes.len()})
            }
            other => json!({"error": format!("no such method: {other}")}),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl ServiceTransport for MockService {
    async fn describe(&self) -> VfsResult<Vec<String>> {
        Ok(self.methods.clone())
    }

    async fn call(&self, method: &str, kwargs: Value) -> VfsResult<Value> {
        *self.calls.entry(method.to_string()).or_insert(0) += 1;
        if method == "write" && self.stall_writes.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.handle(method, &kwargs))
    }
}
