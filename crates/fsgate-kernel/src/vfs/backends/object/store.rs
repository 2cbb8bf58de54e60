//! Flat object store boundary.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Common prefixes (with trailing delimiter) when listing with one.
    pub prefixes: Vec<String>,
    /// Token for the next page; `None` on the last page.
    pub continuation: Option<String>,
}

/// A part accepted by the store, needed to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Operations the object driver needs from a key/value object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Object metadata, or `None` if no object has this exact key.
    async fn head(&self, key: &str) -> VfsResult<Option<ObjectMeta>>;

    /// Up to `len` bytes from `start`. Past the end yields an empty vector.
    async fn get_range(&self, key: &str, start: u64, len: usize) -> VfsResult<Vec<u8>>;

    async fn put(&self, key: &str, data: &[u8]) -> VfsResult<()>;

    async fn delete(&self, key: &str) -> VfsResult<()>;

    /// List keys under `prefix` in lexical order.
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: usize,
    ) -> VfsResult<ListPage>;

    /// Server-side copy within the same store.
    async fn copy(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Start a multipart upload and return its id.
    async fn create_multipart(&self, key: &str) -> VfsResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> VfsResult<CompletedPart>;

    /// Assemble the parts in the given order into the object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> VfsResult<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> VfsResult<()>;
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, (Vec<u8>, SystemTime)>,
    uploads: HashMap<String, PendingUpload>,
}

/// Object store held in process memory.
///
/// Behaves like an S3 bucket for everything the driver relies on,
/// including paginated delimiter listings and multipart uploads. Counts
/// calls per operation so tests can assert on traffic.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryState>,
    calls: DashMap<&'static str, usize>,
    next_id: AtomicU64,
    fail_parts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    /// Make every part upload fail.
    pub fn set_fail_parts(&self, fail: bool) {
        self.fail_parts.store(fail, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).map(|(d, _)| d.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Multipart uploads started and neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, key: &str) -> VfsResult<Option<ObjectMeta>> {
        self.count("head");
        Ok(self
            .state
            .lock()
            .objects
            .get(key)
            .map(|(data, modified)| ObjectMeta {
                key: key.to_string(),
                size: data.len() as u64,
                last_modified: Some(*modified),
            }))
    }

    async fn get_range(&self, key: &str, start: u64, len: usize) -> VfsResult<Vec<u8>> {
        self.count("get");
        let state = self.state.lock();
        let (data, _) = state
            .objects
            .get(key)
            .ok_or_else(|| VfsError::not_found(key))?;
        let start = (start as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn put(&self, key: &str, data: &[u8]) -> VfsResult<()> {
        self.count("put");
        self.state
            .lock()
            .objects
            .insert(key.to_string(), (data.to_vec(), SystemTime::now()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> VfsResult<()> {
        self.count("delete");
        self.state.lock().objects.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: usize,
    ) -> VfsResult<ListPage> {
        self.count("list");
        let state = self.state.lock();

        // Objects and rolled-up prefixes share one lexical ordering
        let mut items: BTreeMap<String, Option<ObjectMeta>> = BTreeMap::new();
        for (key, (data, modified)) in state.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match delimiter.and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((d, i)) => {
                    items.insert(format!("{prefix}{}", &rest[..i + d.len()]), None);
                }
                None => {
                    items.insert(
                        key.clone(),
                        Some(ObjectMeta {
                            key: key.clone(),
                            size: data.len() as u64,
                            last_modified: Some(*modified),
                        }),
                    );
                }
            }
        }

        let mut page = ListPage::default();
        let mut remaining = items
            .into_iter()
            .filter(|(k, _)| continuation.as_ref().is_none_or(|c| k > c))
            .peekable();
        let mut last = None;
        for _ in 0..max_keys.max(1) {
            let Some((key, meta)) = remaining.next() else {
                break;
            };
            match meta {
                Some(meta) => page.objects.push(meta),
                None => page.prefixes.push(key.clone()),
            }
            last = Some(key);
        }
        if remaining.peek().is_some() {
            page.continuation = last;
        }
        Ok(page)
    }

    async fn copy(&self, from: &str, to: &str) -> VfsResult<()> {
        self.count("copy");
        let mut state = self.state.lock();
        let (data, _) = state
            .objects
            .get(from)
            .cloned()
            .ok_or_else(|| VfsError::not_found(from))?;
        state
            .objects
            .insert(to.to_string(), (data, SystemTime::now()));
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> VfsResult<String> {
        self.count("create_multipart");
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().uploads.insert(
            id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> VfsResult<CompletedPart> {
        self.count("upload_part");
        if self.fail_parts.load(Ordering::SeqCst) {
            return Err(VfsError::backend(format!("part {part_number} rejected")));
        }
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| VfsError::not_found(upload_id))?;
        let etag = format!("\"{upload_id}-{part_number}-{}\"", data.len());
        upload.parts.insert(part_number, (etag.clone(), data));
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> VfsResult<()> {
        self.count("complete_multipart");
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| VfsError::not_found(upload_id))?;
        if parts.is_empty() {
            return Err(VfsError::backend("multipart upload without parts"));
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(VfsError::backend("parts out of order"));
            }
            previous = part.part_number;
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
                _ => return Err(VfsError::backend(format!("invalid part {}", part.part_number))),
            }
        }
        state
            .objects
            .insert(key.to_string(), (data, SystemTime::now()));
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> VfsResult<()> {
        self.count("abort_multipart");
        self.state.lock().uploads.remove(upload_id);
        Ok(())
    }
}
