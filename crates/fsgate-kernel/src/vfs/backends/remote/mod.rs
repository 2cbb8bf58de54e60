//! Remote filesystem service driver.
//!
//! Adapts a filesystem exposed as remote methods (see
//! [`transport::REQUIRED_METHODS`]) to the driver contract. The method set
//! is negotiated when the volume is mounted, stats are cached for a short
//! TTL and writes are coalesced per handle before they cross the wire.

mod cache;
#[cfg(any(test, feature = "test-mock"))]
pub mod mock;
pub mod transport;

pub use cache::StatCache;
pub use transport::{Capabilities, HttpServiceTransport, RemoteStat, ServiceTransport};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_FLUSH_THRESHOLD, DEFAULT_SELF_TEST_TIMEOUT, DEFAULT_STAT_CACHE_CAPACITY,
    DEFAULT_STAT_TTL,
};
use crate::vfs::backends::WriteBuffer;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Driver, FileHandle};
use crate::vfs::types::{DirEntry, FileAttr, OpenMode, join, normalize};
use transport::{map_remote_error, result_error};

/// Concurrent per-entry stats when the service has no bulk listing.
const STAT_FAN_OUT: usize = 8;

/// Tunables for a remote volume.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub stat_ttl: Duration,
    pub cache_capacity: usize,
    pub flush_threshold: usize,
    pub self_test_timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            stat_ttl: DEFAULT_STAT_TTL,
            cache_capacity: DEFAULT_STAT_CACHE_CAPACITY,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            self_test_timeout: DEFAULT_SELF_TEST_TIMEOUT,
        }
    }
}

struct Remote {
    transport: Arc<dyn ServiceTransport>,
    caps: Capabilities,
    cache: StatCache,
    flush_threshold: usize,
}

impl Remote {
    /// Paths cross the wire rooted at `/`.
    fn wire_path(path: &str) -> String {
        format!("/{path}")
    }

    async fn call(&self, method: &str, path: &str, kwargs: Value) -> VfsResult<Value> {
        let result = self.transport.call(method, kwargs).await?;
        match result_error(&result) {
            Some(message) => Err(map_remote_error(path, message)),
            None => Ok(result),
        }
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        if let Some(attr) = self.cache.get(path) {
            return Ok(attr);
        }
        let value = self
            .call("stat", path, json!({"p": Self::wire_path(path)}))
            .await?;
        let stat: RemoteStat =
            serde_json::from_value(value).map_err(|e| VfsError::backend(e.to_string()))?;
        let attr = stat.into_attr();
        self.cache.insert(path, attr.clone());
        Ok(attr)
    }

    async fn write_range(
        &self,
        path: &str,
        position: u64,
        data: &[u8],
        truncate: bool,
    ) -> VfsResult<()> {
        let kwargs = json!({
            "p": Self::wire_path(path),
            "position": position,
            "data": STANDARD.encode(data),
            "truncate": truncate,
        });
        let result = self.call("write", path, kwargs).await;
        self.cache.invalidate(path);
        result.map(|_| ())
    }
}

/// Driver over a remote filesystem service.
#[derive(Clone)]
pub struct RemoteDriver {
    inner: Arc<Remote>,
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("caps", &self.inner.caps)
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

impl RemoteDriver {
    /// Negotiate capabilities and self-test the service.
    ///
    /// Any failure, including a self-test that outlives
    /// `options.self_test_timeout`, is `BackendUnavailable`.
    pub async fn connect(
        transport: Arc<dyn ServiceTransport>,
        options: RemoteOptions,
    ) -> VfsResult<Self> {
        let methods = transport
            .describe()
            .await
            .map_err(|e| VfsError::unavailable(e.to_string()))?;
        let caps = Capabilities::negotiate(&methods)?;

        let driver = Self {
            inner: Arc::new(Remote {
                transport,
                caps,
                cache: StatCache::new(options.stat_ttl, options.cache_capacity),
                flush_threshold: options.flush_threshold,
            }),
        };

        match tokio::time::timeout(options.self_test_timeout, driver.self_test()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VfsError::unavailable(format!("self-test failed: {e}"))),
            Err(_) => return Err(VfsError::unavailable("self-test timed out")),
        }

        info!(?caps, "remote filesystem connected");
        Ok(driver)
    }

    /// Write and remove a throwaway file at the service root.
    async fn self_test(&self) -> VfsResult<()> {
        let probe = format!(".fsgate-probe-{}", uuid::Uuid::new_v4().simple());
        self.inner.write_range(&probe, 0, b"ok", true).await?;
        self.inner
            .call("unlink", &probe, json!({"p": Remote::wire_path(&probe)}))
            .await?;
        self.inner.cache.invalidate(&probe);
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.caps
    }

    fn key(path: &str) -> VfsResult<String> {
        normalize(path).ok_or_else(|| VfsError::path_escapes_root(path))
    }
}

#[async_trait]
impl Driver for RemoteDriver {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        self.inner.stat(&Self::key(path)?).await
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = Self::key(path)?;
        let wire = json!({"p": Remote::wire_path(&path)});

        let mut entries = if self.inner.caps.bulk_listing {
            let value = self.inner.call("readdirwithstats", &path, wire).await?;
            let stats: Vec<RemoteStat> =
                serde_json::from_value(value).map_err(|e| VfsError::backend(e.to_string()))?;
            let mut entries = Vec::with_capacity(stats.len());
            for stat in stats {
                let Some(name) = stat.name.clone() else {
                    continue;
                };
                let attr = stat.into_attr();
                self.inner.cache.insert(&join(&path, &name), attr.clone());
                entries.push(DirEntry::with_attr(name, attr));
            }
            entries
        } else {
            let value = self.inner.call("readdir", &path, wire).await?;
            let names: Vec<String> =
                serde_json::from_value(value).map_err(|e| VfsError::backend(e.to_string()))?;
            let inner = &self.inner;
            let dir = &path;
            stream::iter(names)
                .map(|name| async move {
                    let attr = inner.stat(&join(dir, &name)).await?;
                    Ok::<_, VfsError>(DirEntry::with_attr(name, attr))
                })
                .buffered(STAT_FAN_OUT)
                .try_collect::<Vec<DirEntry>>()
                .await?
        };

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>> {
        let path = Self::key(path)?;
        if mode == OpenMode::Read {
            let attr = self.inner.stat(&path).await?;
            if attr.is_dir() {
                return Err(VfsError::is_a_directory(path));
            }
        }
        debug!(%path, ?mode, "open remote file");
        Ok(Box::new(RemoteFile {
            buffer: WriteBuffer::new(self.inner.flush_threshold),
            remote: Arc::clone(&self.inner),
            truncate_pending: mode == OpenMode::Write,
            path,
        }))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let path = Self::key(path)?;
        let result = self
            .inner
            .call("unlink", &path, json!({"p": Remote::wire_path(&path)}))
            .await;
        self.inner.cache.invalidate(&path);
        result.map(|_| ())
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let path = Self::key(path)?;
        let result = self
            .inner
            .call("mkdir", &path, json!({"p": Remote::wire_path(&path)}))
            .await;
        self.inner.cache.invalidate(&path);
        result.map(|_| ())
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let path = Self::key(path)?;
        let result = self
            .inner
            .call("rmdir", &path, json!({"p": Remote::wire_path(&path)}))
            .await;
        self.inner.cache.invalidate_tree(&path);
        result.map(|_| ())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = Self::key(from)?;
        let to = Self::key(to)?;
        let kwargs = json!({
            "oldPath": Remote::wire_path(&from),
            "newPath": Remote::wire_path(&to),
        });
        let result = self.inner.call("rename", &from, kwargs).await;
        self.inner.cache.invalidate_tree(&from);
        self.inner.cache.invalidate_tree(&to);
        result.map(|_| ())
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn exists(&self, path: &str) -> bool {
        let Ok(path) = Self::key(path) else {
            return false;
        };
        if !self.inner.caps.exists {
            return self.inner.stat(&path).await.is_ok();
        }
        match self
            .inner
            .call("exists", &path, json!({"p": Remote::wire_path(&path)}))
            .await
        {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                warn!(%path, error = %e, "exists call failed");
                false
            }
        }
    }
}

/// Open remote file with a coalescing write buffer.
struct RemoteFile {
    remote: Arc<Remote>,
    path: String,
    buffer: WriteBuffer,
    /// Write-mode handles truncate with their first remote write.
    truncate_pending: bool,
}

impl RemoteFile {
    async fn flush(&mut self) -> VfsResult<()> {
        for (position, data) in self.buffer.take() {
            let truncate = std::mem::take(&mut self.truncate_pending);
            self.remote
                .write_range(&self.path, position, &data, truncate)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileHandle for RemoteFile {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        self.flush().await?;
        let kwargs = json!({
            "p": Remote::wire_path(&self.path),
            "position": position,
            "length": len,
        });
        let value = self.remote.call("read", &self.path, kwargs).await?;
        let encoded = value
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| VfsError::backend("read result without data"))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| VfsError::backend(format!("read result: {e}")))
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        if self.buffer.push(position, data) {
            self.flush().await?;
        }
        Ok(data.len())
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.flush().await?;
        // A write handle closed without data still leaves an empty file
        if std::mem::take(&mut self.truncate_pending) {
            self.remote.write_range(&self.path, 0, &[], true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockService;
    use super::*;

    async fn connect(service: &Arc<MockService>) -> RemoteDriver {
        let transport: Arc<dyn ServiceTransport> = Arc::clone(service) as Arc<dyn ServiceTransport>;
        RemoteDriver::connect(transport, RemoteOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_self_test_leaves_nothing_behind() {
        let service = Arc::new(MockService::new());
        let driver = connect(&service).await;
        assert_eq!(service.calls("write"), 1);
        assert_eq!(service.calls("unlink"), 1);
        assert!(driver.readdir("").await.unwrap().is_empty());
        assert!(driver.capabilities().bulk_listing);
    }

    #[tokio::test]
    async fn test_connect_fails_when_write_fails() {
        let service = Arc::new(MockService::new());
        service.set_fail_writes(true);
        let err = RemoteDriver::connect(service, RemoteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        let service = Arc::new(MockService::new());
        service.set_stall_writes(true);
        let options = RemoteOptions {
            self_test_timeout: Duration::from_millis(50),
            ..RemoteOptions::default()
        };
        let err = RemoteDriver::connect(service, options).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_methods() {
        let service = Arc::new(MockService::with_methods(vec!["stat".into()]));
        let err = RemoteDriver::connect(service, RemoteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::vfs::ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_buffered_writes_arrive_in_order() {
        let service = Arc::new(MockService::new());
        let driver = connect(&service).await;
        service.reset_calls();

        let mut handle = driver.open("out.txt", OpenMode::Write).await.unwrap();
        handle.write(6, b"world").await.unwrap();
        handle.write(0, b"hello ").await.unwrap();
        assert_eq!(service.calls("write"), 0);
        handle.close().await.unwrap();

        // contiguous chunks are coalesced into one remote write
        assert_eq!(service.calls("write"), 1);
        assert_eq!(service.file("out.txt").unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_threshold_flushes_early() {
        let service = Arc::new(MockService::new());
        let options = RemoteOptions {
            flush_threshold: 4,
            ..RemoteOptions::default()
        };
        let driver = RemoteDriver::connect(Arc::clone(&service) as Arc<dyn ServiceTransport>, options)
            .await
            .unwrap();
        service.reset_calls();

        let mut handle = driver.open("f", OpenMode::Write).await.unwrap();
        handle.write(0, b"abcdef").await.unwrap();
        assert_eq!(service.calls("write"), 1);
        handle.write(6, b"g").await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(service.file("f").unwrap(), b"abcdefg");
    }

    #[tokio::test]
    async fn test_write_mode_truncates_existing() {
        let service = Arc::new(MockService::new());
        service.insert_file("f", b"old contents here");
        let driver = connect(&service).await;

        driver.write_all("f", b"new").await.unwrap();
        assert_eq!(service.file("f").unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_empty_close_creates_file() {
        let service = Arc::new(MockService::new());
        let driver = connect(&service).await;

        let mut handle = driver.open("empty", OpenMode::Write).await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(service.file("empty").unwrap(), b"");
        assert_eq!(driver.stat("empty").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_update_mode_keeps_content() {
        let service = Arc::new(MockService::new());
        service.insert_file("f", b"abcdef");
        let driver = connect(&service).await;

        let mut handle = driver.open("f", OpenMode::Update).await.unwrap();
        handle.write(2, b"ZZ").await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(service.file("f").unwrap(), b"abZZef");
    }

    #[tokio::test]
    async fn test_stat_is_cached() {
        let service = Arc::new(MockService::new());
        service.insert_file("a.txt", b"abc");
        let driver = connect(&service).await;
        service.reset_calls();

        assert_eq!(driver.stat("a.txt").await.unwrap().size, 3);
        assert_eq!(driver.stat("/a.txt").await.unwrap().size, 3);
        assert_eq!(service.calls("stat"), 1);
    }

    #[tokio::test]
    async fn test_mutations_invalidate_cache() {
        let service = Arc::new(MockService::new());
        let driver = connect(&service).await;

        driver.mkdir("docs").await.unwrap();
        driver.write_all("docs/a.txt", b"abc").await.unwrap();
        assert_eq!(driver.stat("docs/a.txt").await.unwrap().size, 3);

        driver.write_all("docs/a.txt", b"abcdef").await.unwrap();
        assert_eq!(driver.stat("docs/a.txt").await.unwrap().size, 6);

        driver.rename("docs/a.txt", "docs/b.txt").await.unwrap();
        assert!(driver.stat("docs/a.txt").await.unwrap_err().is_not_found());
        let names: Vec<String> = driver
            .readdir("docs")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.txt"]);

        driver.unlink("docs/b.txt").await.unwrap();
        assert!(!driver.exists("docs/b.txt").await);
        assert!(driver.readdir("docs").await.unwrap().is_empty());

        driver.rmdir("docs").await.unwrap();
        assert!(driver.stat("docs").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_bulk_listing_fills_cache() {
        let service = Arc::new(MockService::new());
        service.insert_file("d/a", b"1");
        service.insert_file("d/b", b"22");
        let driver = connect(&service).await;
        service.reset_calls();

        let entries = driver.readdir("d").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(service.calls("readdirwithstats"), 1);
        assert_eq!(driver.stat("d/b").await.unwrap().size, 2);
        assert_eq!(service.calls("stat"), 0);
    }

    #[tokio::test]
    async fn test_listing_without_bulk_stats_each_entry() {
        let service = Arc::new(MockService::minimal());
        service.insert_file("d/a", b"1");
        service.insert_file("d/sub/x", b"x");
        let driver = connect(&service).await;
        service.reset_calls();

        let entries = driver.readdir("d").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].kind.is_dir());
        assert_eq!(service.calls("readdir"), 1);
        assert_eq!(service.calls("stat"), 2);
        // exists falls back to stat
        assert!(driver.exists("d/a").await);
    }

    #[tokio::test]
    async fn test_read_ranges() {
        let service = Arc::new(MockService::new());
        service.insert_file("f", b"hello world");
        let driver = connect(&service).await;

        let mut handle = driver.open("f", OpenMode::Read).await.unwrap();
        assert_eq!(handle.read(6, 5).await.unwrap(), b"world");
        assert_eq!(driver.read_all("f").await.unwrap(), b"hello world");
        assert!(driver.open("missing", OpenMode::Read).await.is_err());
    }
}
