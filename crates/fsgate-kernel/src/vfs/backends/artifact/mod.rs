//! Artifact store driver.
//!
//! A `single` artifact exposes its files at the volume root. A `collection`
//! exposes each child artifact as a top-level directory and routes deeper
//! paths into that child. The artifact type is read once at mount.
//!
//! Listings never expire: a miss costs one `list_files` call that caches
//! every sibling. The driver's own writes and removals keep the cache
//! current.

mod file;
mod manager;
#[cfg(any(test, feature = "test-mock"))]
pub mod mock;

pub use manager::{
    ArtifactFileInfo, ArtifactInfo, ArtifactManager, BlobTransfer, HttpArtifactManager,
    ReqwestTransfer,
};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::DEFAULT_FLUSH_THRESHOLD;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Driver, FileHandle};
use crate::vfs::types::{DirEntry, FileAttr, OpenMode, join, normalize, split};
use file::{ArtifactReader, ArtifactWriter};

#[derive(Debug, Clone)]
pub struct ArtifactOptions {
    pub read_only: bool,
    pub flush_threshold: usize,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

/// State shared between the driver and its open handles.
struct Shared {
    manager: Arc<dyn ArtifactManager>,
    transfer: Arc<dyn BlobTransfer>,
    attrs: DashMap<String, FileAttr>,
    listings: DashMap<String, Vec<DirEntry>>,
}

impl Shared {
    async fn fetch(&self, artifact_id: &str, inner: &str) -> VfsResult<Vec<u8>> {
        let url = self.manager.get_file(artifact_id, inner).await?;
        self.transfer.get(&url).await
    }

    /// Note a file that now exists with `size` bytes.
    fn record_file(&self, path: &str, size: u64) {
        let attr = FileAttr::file(size, 0o644);
        self.attrs.insert(path.to_string(), attr.clone());
        if let Some((parent, name)) = split(path) {
            if let Some(mut listing) = self.listings.get_mut(parent) {
                listing.retain(|e| e.name != name);
                listing.push(DirEntry::with_attr(name, attr));
            }
        }
    }

    /// Drop a path and everything under it.
    fn forget(&self, path: &str) {
        let below = format!("{path}/");
        self.attrs.retain(|k, _| k != path && !k.starts_with(&below));
        self.listings.retain(|k, _| k != path && !k.starts_with(&below));
        if let Some((parent, name)) = split(path) {
            if let Some(mut listing) = self.listings.get_mut(parent) {
                listing.retain(|e| e.name != name);
            }
        }
    }
}

#[derive(Debug)]
struct Child {
    name: String,
    id: String,
}

#[derive(Debug)]
enum Layout {
    Single,
    Collection(Vec<Child>),
}

/// Where a volume path lands.
enum Route<'a> {
    /// The listing of child artifacts.
    CollectionRoot,
    Artifact { id: &'a str, inner: &'a str },
}

/// Driver over one artifact or one collection of artifacts.
pub struct ArtifactDriver {
    shared: Arc<Shared>,
    artifact_id: String,
    layout: Layout,
    options: ArtifactOptions,
}

impl std::fmt::Debug for ArtifactDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDriver")
            .field("artifact_id", &self.artifact_id)
            .field("layout", &self.layout)
            .field("read_only", &self.options.read_only)
            .finish()
    }
}

impl ArtifactDriver {
    /// Read the artifact type and prepare the layout.
    ///
    /// A single artifact also has its root listing fetched up front.
    pub async fn connect(
        manager: Arc<dyn ArtifactManager>,
        transfer: Arc<dyn BlobTransfer>,
        artifact_id: &str,
        options: ArtifactOptions,
    ) -> VfsResult<Self> {
        let info = manager
            .read(artifact_id)
            .await
            .map_err(|e| VfsError::unavailable(format!("artifact {artifact_id}: {e}")))?;

        let layout = if info.is_collection() {
            let children = manager
                .children(artifact_id)
                .await
                .map_err(|e| VfsError::unavailable(format!("artifact {artifact_id}: {e}")))?;
            Layout::Collection(
                children
                    .iter()
                    .map(|c| Child {
                        name: c.display_name().to_string(),
                        id: c.id.clone(),
                    })
                    .collect(),
            )
        } else {
            Layout::Single
        };

        let driver = Self {
            shared: Arc::new(Shared {
                manager,
                transfer,
                attrs: DashMap::new(),
                listings: DashMap::new(),
            }),
            artifact_id: artifact_id.to_string(),
            layout,
            options,
        };
        if matches!(driver.layout, Layout::Single) {
            driver.listing("").await?;
        }

        info!(artifact = artifact_id, layout = ?driver.layout, read_only = driver.options.read_only, "artifact mounted");
        Ok(driver)
    }

    fn key(path: &str) -> VfsResult<String> {
        normalize(path).ok_or_else(|| VfsError::path_escapes_root(path))
    }

    fn route<'a>(&'a self, path: &'a str) -> VfsResult<Route<'a>> {
        match &self.layout {
            Layout::Single => Ok(Route::Artifact {
                id: &self.artifact_id,
                inner: path,
            }),
            Layout::Collection(_) if path.is_empty() => Ok(Route::CollectionRoot),
            Layout::Collection(children) => {
                let (head, rest) = path.split_once('/').unwrap_or((path, ""));
                let child = children
                    .iter()
                    .find(|c| c.name == head)
                    .ok_or_else(|| VfsError::not_found(path))?;
                Ok(Route::Artifact {
                    id: &child.id,
                    inner: rest,
                })
            }
        }
    }

    /// Mutations on a read-only mount are a permission error.
    fn check_writable(&self, path: &str) -> VfsResult<()> {
        if self.options.read_only {
            Err(VfsError::permission_denied(format!("{path}: read-only artifact")))
        } else {
            Ok(())
        }
    }

    /// Directory listing, from cache or one backend call.
    async fn listing(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        if let Some(cached) = self.shared.listings.get(path) {
            return Ok(cached.clone());
        }

        let entries: Vec<DirEntry> = match self.route(path)? {
            Route::CollectionRoot => match &self.layout {
                Layout::Collection(children) => children
                    .iter()
                    .map(|c| DirEntry::with_attr(c.name.clone(), FileAttr::directory(0o755)))
                    .collect(),
                Layout::Single => Vec::new(),
            },
            Route::Artifact { id, inner } => {
                let files = self.shared.manager.list_files(id, inner).await?;
                debug!(artifact = id, dir = inner, count = files.len(), "listed");
                files
                    .into_iter()
                    .map(|f| {
                        let name = f.name.rsplit('/').next().unwrap_or(&f.name).to_string();
                        DirEntry::with_attr(name, f.into_attr())
                    })
                    .collect()
            }
        };

        for entry in &entries {
            if let Some(attr) = &entry.attr {
                self.shared.attrs.insert(join(path, &entry.name), attr.clone());
            }
        }
        self.shared.listings.insert(path.to_string(), entries.clone());
        Ok(entries)
    }

    /// Every file below a directory, as volume paths.
    async fn files_under(&self, dir: &str) -> VfsResult<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_string()];
        while let Some(current) = pending.pop() {
            for entry in self.listing(&current).await? {
                let path = join(&current, &entry.name);
                if entry.kind.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    /// Resolve a writable file path to (artifact id, path inside it).
    fn file_route<'a>(&'a self, path: &'a str) -> VfsResult<(&'a str, &'a str)> {
        match self.route(path)? {
            Route::Artifact { id, inner } if !inner.is_empty() => Ok((id, inner)),
            _ => Err(VfsError::is_a_directory(path)),
        }
    }
}

#[async_trait]
impl Driver for ArtifactDriver {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = Self::key(path)?;
        match self.route(&path)? {
            Route::CollectionRoot => return Ok(FileAttr::directory(0o755)),
            Route::Artifact { inner: "", .. } => return Ok(FileAttr::directory(0o755)),
            Route::Artifact { .. } => {}
        }
        if let Some(attr) = self.shared.attrs.get(&path) {
            return Ok(attr.clone());
        }

        let Some((parent, _)) = split(&path) else {
            return Ok(FileAttr::directory(0o755));
        };
        if !self.shared.listings.contains_key(parent) {
            self.listing(parent).await?;
        }
        self.shared
            .attrs
            .get(&path)
            .map(|a| a.clone())
            .ok_or_else(|| VfsError::not_found(path))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = Self::key(path)?;
        if !self.stat(&path).await?.is_dir() {
            return Err(VfsError::not_a_directory(path));
        }
        self.listing(&path).await
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>> {
        let path = Self::key(path)?;

        if !mode.is_write() {
            let attr = self.stat(&path).await?;
            if attr.is_dir() {
                return Err(VfsError::is_a_directory(path));
            }
            let (id, inner) = self.file_route(&path)?;
            return Ok(Box::new(ArtifactReader {
                shared: Arc::clone(&self.shared),
                artifact_id: id.to_string(),
                inner: inner.to_string(),
                content: None,
            }));
        }

        self.check_writable(&path)?;
        let (id, inner) = self.file_route(&path)?;
        let content = match mode {
            OpenMode::Update => match self.stat(&path).await {
                Ok(attr) if attr.is_dir() => return Err(VfsError::is_a_directory(path.as_str())),
                Ok(_) => self.shared.fetch(id, inner).await?,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            },
            _ => Vec::new(),
        };
        Ok(Box::new(ArtifactWriter::new(
            Arc::clone(&self.shared),
            id.to_string(),
            inner.to_string(),
            path.clone(),
            content,
            self.options.flush_threshold,
        )))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let path = Self::key(path)?;
        self.check_writable(&path)?;
        if self.stat(&path).await?.is_dir() {
            return Err(VfsError::is_a_directory(path));
        }
        let (id, inner) = self.file_route(&path)?;

        let manager = &self.shared.manager;
        manager.stage(id).await?;
        manager.remove_file(id, inner).await?;
        manager.commit(id).await?;
        self.shared.forget(&path);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable(path)?;
        Err(VfsError::unsupported("mkdir on an artifact store"))
    }

    /// Removes every file under the directory in one staged batch.
    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let path = Self::key(path)?;
        self.check_writable(&path)?;
        let id = match self.route(&path)? {
            Route::Artifact { id, inner } if !inner.is_empty() => id,
            _ => return Err(VfsError::permission_denied(format!("{path}: artifact root"))),
        };
        if !self.stat(&path).await?.is_dir() {
            return Err(VfsError::not_a_directory(path.as_str()));
        }

        let files = self.files_under(&path).await?;
        let manager = &self.shared.manager;
        manager.stage(id).await?;
        for file in &files {
            let (_, inner) = self.file_route(file)?;
            manager.remove_file(id, inner).await?;
        }
        manager.commit(id).await?;

        debug!(%path, removed = files.len(), "removed artifact directory");
        self.shared.forget(&path);
        Ok(())
    }

    async fn rename(&self, from: &str, _to: &str) -> VfsResult<()> {
        self.check_writable(from)?;
        Err(VfsError::unsupported("rename on an artifact store"))
    }

    fn read_only(&self) -> bool {
        self.options.read_only
    }
}
