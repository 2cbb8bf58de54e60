//! Positional write buffer shared by the RPC and artifact drivers.

use crate::constants::DEFAULT_FLUSH_THRESHOLD;
use crate::vfs::{VfsError, VfsResult};

/// Copy `data` into `content` at `position`, zero-filling any gap.
///
/// Offsets that overflow or cannot be allocated fail instead of growing
/// the buffer.
pub(crate) fn write_into(content: &mut Vec<u8>, position: u64, data: &[u8]) -> VfsResult<()> {
    let end = usize::try_from(position)
        .ok()
        .and_then(|start| start.checked_add(data.len()).map(|end| (start, end)));
    let Some((start, end)) = end else {
        return Err(VfsError::invalid_path(format!("write offset {position} out of range")));
    };
    if content.len() < end {
        content
            .try_reserve(end - content.len())
            .map_err(|e| VfsError::other(format!("write at offset {position}: {e}")))?;
        content.resize(end, 0);
    }
    content[start..end].copy_from_slice(data);
    Ok(())
}

/// Pending writes for one open handle.
///
/// Chunks may arrive in any order. [`WriteBuffer::take`] hands them back
/// sorted by offset with contiguous runs merged, so a flush issues as few
/// backend writes as possible.
#[derive(Debug)]
pub struct WriteBuffer {
    chunks: Vec<(u64, Vec<u8>)>,
    buffered: usize,
    threshold: usize,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_THRESHOLD)
    }
}

impl WriteBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            chunks: Vec::new(),
            buffered: 0,
            threshold: threshold.max(1),
        }
    }

    /// Queue a chunk. Returns true once the buffer should be flushed.
    pub fn push(&mut self, position: u64, data: &[u8]) -> bool {
        self.buffered += data.len();
        self.chunks.push((position, data.to_vec()));
        self.buffered >= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes currently queued.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Drain the buffer in offset order, merging contiguous chunks.
    ///
    /// Chunks at the same offset keep their arrival order so the later
    /// write wins when applied in sequence.
    pub fn take(&mut self) -> Vec<(u64, Vec<u8>)> {
        let mut chunks = std::mem::take(&mut self.chunks);
        self.buffered = 0;
        chunks.sort_by_key(|(position, _)| *position);

        let mut merged: Vec<(u64, Vec<u8>)> = Vec::with_capacity(chunks.len());
        for (position, data) in chunks {
            match merged.last_mut() {
                Some((start, run)) if start.checked_add(run.len() as u64) == Some(position) => {
                    run.extend_from_slice(&data);
                }
                _ => merged.push((position, data)),
            }
        }
        merged
    }

    /// Apply every queued chunk to an in-memory image of the file.
    pub fn apply_to(&mut self, content: &mut Vec<u8>) -> VfsResult<()> {
        for (position, data) in self.take() {
            write_into(content, position, &data)?;
        }
        Ok(())
    }
}
