//! Object store file handles.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::store::{CompletedPart, ObjectStore};
use crate::vfs::backends::buffer::write_into;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::FileHandle;

/// Ranged reads of one object.
pub(super) struct ObjectReader {
    pub(super) store: Arc<dyn ObjectStore>,
    pub(super) key: String,
    pub(super) size: u64,
}

#[async_trait]
impl FileHandle for ObjectReader {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        if position >= self.size || len == 0 {
            return Ok(Vec::new());
        }
        let len = len.min((self.size - position) as usize);
        self.store.get_range(&self.key, position, len).await
    }

    async fn write(&mut self, _position: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::permission_denied(format!("{} opened for reading", self.key)))
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum Upload {
    /// Nothing sent yet.
    Idle,
    Active {
        upload_id: String,
        next_part: u32,
        parts: Vec<CompletedPart>,
    },
    /// A part upload failed; the upload id is kept so close can abort.
    Failed {
        upload_id: Option<String>,
        reason: String,
    },
    Closed,
}

/// Sequential writer backed by a multipart upload.
///
/// Every `write` becomes exactly one part, so callers should write in
/// pieces the store accepts as parts (S3 wants at least 5 MiB for all but
/// the last). The upload starts lazily; a write at offset 0 after parts
/// were sent abandons them and starts over. Nothing is addressable until
/// `close` completes the upload, and a failed upload is aborted on close.
pub(super) struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    key: String,
    state: Upload,
    written: u64,
    _lock: OwnedMutexGuard<()>,
}

impl ObjectWriter {
    pub(super) fn new(store: Arc<dyn ObjectStore>, key: String, lock: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            key,
            state: Upload::Idle,
            written: 0,
            _lock: lock,
        }
    }

    async fn abort(&self, upload_id: &str) {
        if let Err(e) = self.store.abort_multipart(&self.key, upload_id).await {
            warn!(key = %self.key, upload_id, error = %e, "abort multipart upload failed");
        }
    }
}

#[async_trait]
impl FileHandle for ObjectWriter {
    async fn read(&mut self, _position: u64, _len: usize) -> VfsResult<Vec<u8>> {
        Err(VfsError::permission_denied(format!("{} opened for writing", self.key)))
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        match &self.state {
            Upload::Failed { reason, .. } => return Err(VfsError::backend(reason.clone())),
            Upload::Closed => return Err(VfsError::other("write after close")),
            Upload::Active { upload_id, .. } if position == 0 => {
                debug!(key = %self.key, "rewrite from offset 0, restarting upload");
                let upload_id = upload_id.clone();
                self.abort(&upload_id).await;
                self.state = Upload::Idle;
                self.written = 0;
            }
            _ => {}
        }
        if position != self.written {
            return Err(VfsError::unsupported(format!(
                "non-sequential write to {} at {position}, expected {}",
                self.key, self.written
            )));
        }
        if data.is_empty() {
            return Ok(0);
        }

        if matches!(self.state, Upload::Idle) {
            let upload_id = self.store.create_multipart(&self.key).await?;
            self.state = Upload::Active {
                upload_id,
                next_part: 1,
                parts: Vec::new(),
            };
        }
        let Upload::Active {
            upload_id,
            next_part,
            parts,
        } = &mut self.state
        else {
            return Err(VfsError::other("upload not active"));
        };

        match self
            .store
            .upload_part(&self.key, upload_id, *next_part, data.to_vec())
            .await
        {
            Ok(part) => {
                parts.push(part);
                *next_part += 1;
                self.written += data.len() as u64;
                Ok(data.len())
            }
            Err(e) => {
                self.state = Upload::Failed {
                    upload_id: Some(upload_id.clone()),
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> VfsResult<()> {
        match std::mem::replace(&mut self.state, Upload::Closed) {
            Upload::Idle => self.store.put(&self.key, &[]).await,
            Upload::Active {
                upload_id, parts, ..
            } => {
                let result = self
                    .store
                    .complete_multipart(&self.key, &upload_id, parts)
                    .await;
                if result.is_err() {
                    self.abort(&upload_id).await;
                }
                result
            }
            Upload::Failed { upload_id, reason } => {
                if let Some(upload_id) = upload_id {
                    self.abort(&upload_id).await;
                }
                Err(VfsError::backend(format!("upload of {} failed: {reason}", self.key)))
            }
            Upload::Closed => Ok(()),
        }
    }
}

/// Positional writer for objects that may already exist.
///
/// Objects cannot be patched in place, so the handle keeps a full image
/// of the object and puts it back on close.
pub(super) struct ObjectUpdater {
    store: Arc<dyn ObjectStore>,
    key: String,
    content: Vec<u8>,
    dirty: bool,
    _lock: OwnedMutexGuard<()>,
}

impl ObjectUpdater {
    pub(super) fn new(
        store: Arc<dyn ObjectStore>,
        key: String,
        content: Vec<u8>,
        existed: bool,
        lock: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            store,
            key,
            content,
            dirty: !existed,
            _lock: lock,
        }
    }
}

#[async_trait]
impl FileHandle for ObjectUpdater {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        let start = (position as usize).min(self.content.len());
        let end = start.saturating_add(len).min(self.content.len());
        Ok(self.content[start..end].to_vec())
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        write_into(&mut self.content, position, data)?;
        self.dirty = true;
        Ok(data.len())
    }

    async fn close(&mut self) -> VfsResult<()> {
        if std::mem::take(&mut self.dirty) {
            self.store.put(&self.key, &self.content).await?;
        }
        Ok(())
    }
}
