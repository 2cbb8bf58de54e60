//! Driver contract.
//!
//! Every storage backend implements [`Driver`]. Operations are path-based
//! and asynchronous; failures come back through `VfsResult`, never as
//! sentinel values. Byte I/O goes through a [`FileHandle`] so each backend
//! can batch, buffer or stage writes in its own way.

use async_trait::async_trait;

use super::VfsResult;
use super::types::{DirEntry, FileAttr, OpenMode};

/// An open file on some backend.
///
/// Handles are used by one task at a time. `close` must be called to make
/// buffered writes durable; dropping a handle without closing it discards
/// whatever the backend has not yet applied.
#[async_trait]
pub trait FileHandle: Send {
    /// Read up to `len` bytes starting at `position`.
    ///
    /// Returns fewer bytes at end of file.
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>>;

    /// Write `data` at `position`. Returns the number of bytes accepted.
    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize>;

    /// Flush pending state and release backend resources.
    async fn close(&mut self) -> VfsResult<()>;
}

/// Storage backend operations.
///
/// Paths are relative to the volume root (see [`super::normalize_path`]).
/// The mount table handles routing and token translation.
#[async_trait]
pub trait Driver: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// List the immediate children of a directory.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Open a file handle.
    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    /// Create a directory. Parents must exist.
    async fn mkdir(&self, path: &str) -> VfsResult<()>;

    /// Remove a directory.
    ///
    /// Object and artifact stores remove everything under the prefix.
    /// Random-access backends require the directory to be empty.
    async fn rmdir(&self, path: &str) -> VfsResult<()>;

    /// Rename a file or directory within this volume.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this driver refuses every mutation.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let attr = self.stat(path).await?;
        let mut handle = self.open(path, OpenMode::Read).await?;
        let data = handle.read(0, attr.size as usize).await?;
        handle.close().await?;
        Ok(data)
    }

    /// Replace entire file contents.
    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut handle = self.open(path, OpenMode::Write).await?;
        if !data.is_empty() {
            handle.write(0, data).await?;
        }
        handle.close().await
    }
}
