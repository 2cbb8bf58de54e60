//! Local filesystem backend.
//!
//! Provides access to a real directory tree, with path security to prevent
//! escaping the root directory.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Driver, FileHandle};
use crate::vfs::types::{DirEntry, FileAttr, FileType, OpenMode, normalize};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/files`, then `stat("docs/a.txt")` looks at
/// `/srv/files/docs/a.txt`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time so symlinked roots
    /// (e.g. macOS `/tmp` → `/private/tmp`) compare correctly later.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// `..` is rejected outright. Existing paths are canonicalized so a
    /// symlink inside the tree cannot point the caller outside it.
    async fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        let relative = normalize(path).ok_or_else(|| VfsError::path_escapes_root(path))?;
        if relative.is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(&relative);
        if fs::symlink_metadata(&full).await.is_err() {
            return Ok(full);
        }

        let canonical = fs::canonicalize(&full).await?;
        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        #[cfg(unix)]
        let perm = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        FileAttr {
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind: if meta.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            perm,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        }
    }
}

#[async_trait]
impl Driver for LocalBackend {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path).await?;
        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path).await?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Dangling links have no metadata and are skipped
            match fs::metadata(entry.path()).await {
                Ok(meta) => entries.push(DirEntry::with_attr(name, Self::metadata_to_attr(&meta))),
                Err(e) => tracing::debug!(%name, error = %e, "skipping unreadable entry"),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>> {
        let full_path = self.resolve(path).await?;
        let file = match mode {
            OpenMode::Read => fs::File::open(&full_path).await?,
            OpenMode::Write => {
                self.check_writable()?;
                fs::File::create(&full_path).await?
            }
            OpenMode::Update => {
                self.check_writable()?;
                fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&full_path)
                    .await?
            }
        };
        if file.metadata().await?.is_dir() {
            return Err(VfsError::is_a_directory(path));
        }
        Ok(Box::new(LocalFile { file }))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path).await?;
        Ok(fs::remove_file(&full_path).await?)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path).await?;
        Ok(fs::create_dir(&full_path).await?)
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path).await?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        Ok(fs::remove_dir(&full_path).await?)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check_writable()?;
        let from_path = self.resolve(from).await?;
        let to_path = self.resolve(to).await?;
        Ok(fs::rename(&from_path, &to_path).await?)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

struct LocalFile {
    file: fs::File,
}

#[async_trait]
impl FileHandle for LocalFile {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(position)).await?;
        let mut buffer = Vec::with_capacity(len.min(8 * 1024 * 1024));
        (&mut self.file).take(len as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.file.flush().await?;
        Ok(self.file.sync_all().await?)
    }
}
