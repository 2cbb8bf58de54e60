//! Artifact file handles.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::Shared;
use crate::vfs::backends::WriteBuffer;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::FileHandle;

fn slice_at(content: &[u8], position: u64, len: usize) -> Vec<u8> {
    let start = (position as usize).min(content.len());
    let end = start.saturating_add(len).min(content.len());
    content[start..end].to_vec()
}

/// Read handle; content is fetched on the first read, not at open.
pub(super) struct ArtifactReader {
    pub(super) shared: Arc<Shared>,
    pub(super) artifact_id: String,
    pub(super) inner: String,
    pub(super) content: Option<Vec<u8>>,
}

#[async_trait]
impl FileHandle for ArtifactReader {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        if self.content.is_none() {
            let data = self.shared.fetch(&self.artifact_id, &self.inner).await?;
            self.content = Some(data);
        }
        Ok(self
            .content
            .as_deref()
            .map(|content| slice_at(content, position, len))
            .unwrap_or_default())
    }

    async fn write(&mut self, _position: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::permission_denied(format!(
            "{} opened for reading",
            self.inner
        )))
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.content = None;
        Ok(())
    }
}

/// Buffered writer for one file of an artifact.
///
/// The first flush stages the artifact, obtains an upload URL, transfers
/// the file and commits. Later flushes re-upload to the same URL without
/// committing; `close` then stages and commits once more. Each upload
/// carries the whole file image.
pub(super) struct ArtifactWriter {
    shared: Arc<Shared>,
    artifact_id: String,
    inner: String,
    /// Volume-relative path, for cache upkeep.
    path: String,
    buffer: WriteBuffer,
    content: Vec<u8>,
    upload_url: Option<String>,
    /// Bytes written since the last transfer.
    pending: bool,
    /// Bytes transferred since the last commit.
    uncommitted: bool,
    closed: bool,
}

impl ArtifactWriter {
    pub(super) fn new(
        shared: Arc<Shared>,
        artifact_id: String,
        inner: String,
        path: String,
        content: Vec<u8>,
        flush_threshold: usize,
    ) -> Self {
        Self {
            shared,
            artifact_id,
            inner,
            path,
            buffer: WriteBuffer::new(flush_threshold),
            content,
            upload_url: None,
            pending: false,
            uncommitted: false,
            closed: false,
        }
    }

    async fn flush(&mut self) -> VfsResult<()> {
        self.buffer.apply_to(&mut self.content)?;
        let manager = &self.shared.manager;

        match &self.upload_url {
            Some(url) => {
                self.shared.transfer.put(url, self.content.clone()).await?;
                self.uncommitted = true;
            }
            None => {
                manager.stage(&self.artifact_id).await?;
                let url = manager.put_file(&self.artifact_id, &self.inner).await?;
                self.shared.transfer.put(&url, self.content.clone()).await?;
                manager.commit(&self.artifact_id).await?;
                self.upload_url = Some(url);
                self.uncommitted = false;
            }
        }

        self.pending = false;
        self.shared.record_file(&self.path, self.content.len() as u64);
        debug!(artifact = %self.artifact_id, file = %self.inner, size = self.content.len(), "flushed");
        Ok(())
    }
}

#[async_trait]
impl FileHandle for ArtifactWriter {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        self.buffer.apply_to(&mut self.content)?;
        Ok(slice_at(&self.content, position, len))
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        if self.closed {
            return Err(VfsError::other("write after close"));
        }
        self.pending = true;
        if self.buffer.push(position, data) {
            self.flush().await?;
        }
        Ok(data.len())
    }

    async fn close(&mut self) -> VfsResult<()> {
        if self.closed {
            return Ok(());
        }
        // A never-flushed handle still publishes its (possibly empty) file
        if self.pending || self.upload_url.is_none() {
            self.flush().await?;
        }
        if self.uncommitted {
            self.shared.manager.stage(&self.artifact_id).await?;
            self.shared.manager.commit(&self.artifact_id).await?;
            self.uncommitted = false;
        }
        self.closed = true;
        Ok(())
    }
}
