//! Object store driver.
//!
//! Presents a flat key space as a directory tree. A directory exists when
//! its zero-byte marker object (`.__dir__`) exists or when any key lives
//! under its prefix. Writes go out as multipart uploads; see
//! [`file::ObjectWriter`].

mod file;
mod s3;
mod store;

pub use s3::{S3Config, S3ObjectStore};
pub use store::{CompletedPart, ListPage, MemoryObjectStore, ObjectMeta, ObjectStore};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::constants::{DIR_MARKER, LIST_PAGE_SIZE};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Driver, FileHandle};
use crate::vfs::types::{DirEntry, FileAttr, OpenMode, normalize};
use file::{ObjectReader, ObjectUpdater, ObjectWriter};

/// Prune idle per-key locks once the map grows past this.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Driver over an [`ObjectStore`], rooted at a key prefix.
pub struct ObjectDriver {
    store: Arc<dyn ObjectStore>,
    /// Normalized key prefix with trailing `/`, or empty for the bucket root.
    prefix: String,
    read_only: bool,
    /// One writer per key at a time.
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ObjectDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDriver")
            .field("prefix", &self.prefix)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl ObjectDriver {
    /// Create the driver and check the store is reachable.
    ///
    /// A writable mount puts the root directory marker; a read-only one
    /// lists a single key. Either failing is `BackendUnavailable`.
    pub async fn connect(
        store: Arc<dyn ObjectStore>,
        prefix: &str,
        read_only: bool,
    ) -> VfsResult<Self> {
        let prefix = normalize(prefix).ok_or_else(|| VfsError::invalid_path(prefix))?;
        let prefix = if prefix.is_empty() {
            prefix
        } else {
            format!("{prefix}/")
        };
        let driver = Self {
            store,
            prefix,
            read_only,
            writers: DashMap::new(),
        };

        let preflight = if read_only {
            driver
                .store
                .list(&driver.prefix, Some("/"), None, 1)
                .await
                .map(|_| ())
        } else {
            driver.store.put(&driver.marker_key(""), &[]).await
        };
        preflight.map_err(|e| VfsError::unavailable(format!("object store preflight: {e}")))?;

        info!(prefix = %driver.prefix, read_only, "object store connected");
        Ok(driver)
    }

    fn key(path: &str) -> VfsResult<String> {
        normalize(path).ok_or_else(|| VfsError::path_escapes_root(path))
    }

    fn object_key(&self, path: &str) -> String {
        format!("{}{path}", self.prefix)
    }

    /// Key prefix of everything inside a directory.
    fn dir_prefix(&self, path: &str) -> String {
        if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{path}/", self.prefix)
        }
    }

    fn marker_key(&self, path: &str) -> String {
        format!("{}{DIR_MARKER}", self.dir_prefix(path))
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        if self.writers.len() > LOCK_PRUNE_THRESHOLD {
            self.writers.retain(|_, m| Arc::strong_count(m) > 1);
        }
        let lock = Arc::clone(
            self.writers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Every key under a prefix, across all listing pages.
    async fn all_keys(&self, prefix: &str) -> VfsResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let page = self
                .store
                .list(prefix, None, continuation, LIST_PAGE_SIZE)
                .await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            continuation = page.continuation;
            if continuation.is_none() {
                return Ok(keys);
            }
        }
    }
}

#[async_trait]
impl Driver for ObjectDriver {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = Self::key(path)?;
        if path.is_empty() {
            return Ok(FileAttr::directory(0o755));
        }

        if let Some(meta) = self.store.head(&self.object_key(&path)).await? {
            let attr = FileAttr::file(meta.size, 0o644);
            return Ok(match meta.last_modified {
                Some(mtime) => attr.with_mtime(mtime),
                None => attr,
            });
        }

        // Not an object; a directory if anything lives under it
        let page = self
            .store
            .list(&self.dir_prefix(&path), None, None, 1)
            .await?;
        match page.objects.first() {
            Some(first) => {
                let attr = FileAttr::directory(0o755);
                Ok(attr.with_mtime(first.last_modified.unwrap_or(SystemTime::UNIX_EPOCH)))
            }
            None if !page.prefixes.is_empty() => Ok(FileAttr::directory(0o755)),
            None => Err(VfsError::not_found(path)),
        }
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = Self::key(path)?;
        let prefix = self.dir_prefix(&path);
        let mut entries = Vec::new();
        let mut seen_any = false;
        let mut continuation = None;

        loop {
            let page = self
                .store
                .list(&prefix, Some("/"), continuation, LIST_PAGE_SIZE)
                .await?;
            for object in page.objects {
                seen_any = true;
                let name = &object.key[prefix.len()..];
                if name.is_empty() || name == DIR_MARKER {
                    continue;
                }
                let mut attr = FileAttr::file(object.size, 0o644);
                if let Some(mtime) = object.last_modified {
                    attr = attr.with_mtime(mtime);
                }
                entries.push(DirEntry::with_attr(name, attr));
            }
            for common in page.prefixes {
                seen_any = true;
                let name = common[prefix.len()..].trim_end_matches('/');
                if !name.is_empty() {
                    entries.push(DirEntry::with_attr(name, FileAttr::directory(0o755)));
                }
            }
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }

        if !seen_any && !path.is_empty() {
            return Err(VfsError::not_found(path));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>> {
        let path = Self::key(path)?;
        if path.is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }
        let key = self.object_key(&path);

        match mode {
            OpenMode::Read => {
                let meta = self
                    .store
                    .head(&key)
                    .await?
                    .ok_or_else(|| VfsError::not_found(path))?;
                Ok(Box::new(ObjectReader {
                    store: Arc::clone(&self.store),
                    key,
                    size: meta.size,
                }))
            }
            OpenMode::Write => {
                self.check_writable()?;
                let lock = self.lock_key(&key).await;
                debug!(%key, "open multipart writer");
                Ok(Box::new(ObjectWriter::new(Arc::clone(&self.store), key, lock)))
            }
            OpenMode::Update => {
                self.check_writable()?;
                let lock = self.lock_key(&key).await;
                let (content, existed) = match self.store.head(&key).await? {
                    Some(meta) => (
                        self.store.get_range(&key, 0, meta.size as usize).await?,
                        true,
                    ),
                    None => (Vec::new(), false),
                };
                Ok(Box::new(ObjectUpdater::new(
                    Arc::clone(&self.store),
                    key,
                    content,
                    existed,
                    lock,
                )))
            }
        }
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let path = Self::key(path)?;
        let key = self.object_key(&path);
        if self.store.head(&key).await?.is_none() {
            return Err(VfsError::not_found(path));
        }
        self.store.delete(&key).await
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let path = Self::key(path)?;
        if self.stat(&path).await.is_ok() {
            return Err(VfsError::already_exists(path));
        }
        self.store.put(&self.marker_key(&path), &[]).await
    }

    /// Deletes every object under the directory, marker included.
    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let path = Self::key(path)?;
        if path.is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let prefix = self.dir_prefix(&path);
        let mut removed = 0usize;
        loop {
            // Always read the first page; deleted keys drop out of it
            let page = self.store.list(&prefix, None, None, LIST_PAGE_SIZE).await?;
            if page.objects.is_empty() {
                break;
            }
            for object in page.objects {
                self.store.delete(&object.key).await?;
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(VfsError::not_found(path));
        }
        debug!(%prefix, removed, "removed directory");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check_writable()?;
        let from = Self::key(from)?;
        let to = Self::key(to)?;
        if from.is_empty() || to.is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        if to.starts_with(&format!("{from}/")) {
            return Err(VfsError::invalid_path(to));
        }

        let from_key = self.object_key(&from);
        if self.store.head(&from_key).await?.is_some() {
            let to_key = self.object_key(&to);
            let _lock = self.lock_key(&to_key).await;
            self.store.copy(&from_key, &to_key).await?;
            return self.store.delete(&from_key).await;
        }

        let from_prefix = self.dir_prefix(&from);
        let to_prefix = self.dir_prefix(&to);
        let keys = self.all_keys(&from_prefix).await?;
        if keys.is_empty() {
            return Err(VfsError::not_found(from));
        }
        for key in &keys {
            let target = format!("{to_prefix}{}", &key[from_prefix.len()..]);
            self.store.copy(key, &target).await?;
        }
        for key in &keys {
            self.store.delete(key).await?;
        }
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}
