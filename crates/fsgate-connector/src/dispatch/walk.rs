//! Recursive helpers shared by copy, move, remove and the size/search walks.

use fsgate_kernel::vfs::{FileAttr, OpenMode, Target, VfsError, VfsResult};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::gateway::Gateway;

/// Bytes requested per read when copying between handles. Reads are
/// gathered up to the upload chunk size before each write.
const COPY_CHUNK: usize = 1024 * 1024;

/// Map `item`, which lies under `from`, to the same place under `to`.
pub(crate) fn rebase(from: &Target, to: &Target, item: &Target) -> Target {
    let rest = item
        .relative
        .strip_prefix(from.relative.as_str())
        .unwrap_or(&item.relative)
        .trim_start_matches('/');
    let relative = if rest.is_empty() {
        to.relative.clone()
    } else if to.relative.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{rest}", to.relative)
    };
    Target::new(to.index, to.volume.clone(), relative)
}

impl Gateway {
    /// Every descendant of a directory with its attributes, parents
    /// before children.
    pub(crate) async fn walk(&self, root: &Target) -> VfsResult<Vec<(Target, FileAttr)>> {
        let driver = &root.volume.driver;
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = driver.readdir(&dir.relative).await?;
            let described: Vec<(Target, FileAttr)> = stream::iter(entries)
                .map(|entry| {
                    let child = dir.child(&entry.name);
                    async move {
                        let attr = match entry.attr {
                            Some(attr) => attr,
                            None => driver.stat(&child.relative).await?,
                        };
                        Ok::<_, VfsError>((child, attr))
                    }
                })
                .buffered(self.config().fan_out)
                .try_collect()
                .await?;

            for (child, attr) in described {
                if attr.is_dir() {
                    pending.push(child.clone());
                }
                found.push((child, attr));
            }
        }
        Ok(found)
    }

    /// Replace a file's content, writing in upload-sized chunks.
    ///
    /// Object stores take one part per write, so chunking keeps every part
    /// but the last above the store's minimum.
    pub(crate) async fn write_file(&self, target: &Target, data: &[u8]) -> VfsResult<()> {
        let mut handle = target
            .volume
            .driver
            .open(&target.relative, OpenMode::Write)
            .await?;
        let mut position = 0u64;
        for chunk in data.chunks(self.config().upload_chunk_size) {
            if let Err(e) = handle.write(position, chunk).await {
                let _ = handle.close().await;
                return Err(e);
            }
            position += chunk.len() as u64;
        }
        handle.close().await
    }

    /// Read a whole file.
    pub(crate) async fn read_file(&self, target: &Target) -> VfsResult<Vec<u8>> {
        target.volume.driver.read_all(&target.relative).await
    }

    /// Stream one file into another, possibly on a different volume.
    ///
    /// Every write but the last carries at least `upload_chunk_size` bytes,
    /// so multipart destinations never see an undersized part.
    pub(crate) async fn copy_file(&self, src: &Target, dst: &Target, size: u64) -> VfsResult<()> {
        let mut reader = src.volume.driver.open(&src.relative, OpenMode::Read).await?;
        let mut writer = dst.volume.driver.open(&dst.relative, OpenMode::Write).await?;
        let part_size = self.config().upload_chunk_size;

        let copied = async {
            let mut pending = Vec::with_capacity(part_size.min(size as usize));
            let mut read_at = 0u64;
            let mut written = 0u64;
            while read_at < size {
                let want = COPY_CHUNK.min((size - read_at) as usize);
                let chunk = reader.read(read_at, want).await?;
                if chunk.is_empty() {
                    break;
                }
                read_at += chunk.len() as u64;
                pending.extend_from_slice(&chunk);
                if pending.len() >= part_size {
                    writer.write(written, &pending).await?;
                    written += pending.len() as u64;
                    pending.clear();
                }
            }
            if !pending.is_empty() {
                writer.write(written, &pending).await?;
            }
            Ok::<_, VfsError>(())
        }
        .await;

        let _ = reader.close().await;
        match copied {
            Ok(()) => writer.close().await,
            Err(e) => {
                let _ = writer.close().await;
                Err(e)
            }
        }
    }

    /// Copy a file or a whole tree. `dst` must not exist.
    pub(crate) async fn copy_tree(&self, src: &Target, dst: &Target) -> VfsResult<()> {
        let dst_driver = &dst.volume.driver;
        if dst_driver.exists(&dst.relative).await {
            return Err(VfsError::already_exists(dst.absolute()));
        }

        let attr = src.volume.driver.stat(&src.relative).await?;
        if attr.is_file() {
            return self.copy_file(src, dst, attr.size).await;
        }
        if src.contains(dst) {
            return Err(VfsError::invalid_path(dst.absolute()));
        }

        dst_driver.mkdir(&dst.relative).await?;
        let items = self.walk(src).await?;
        let mut files = Vec::new();
        for (item, attr) in items {
            let target = rebase(src, dst, &item);
            if attr.is_dir() {
                dst_driver.mkdir(&target.relative).await?;
            } else {
                files.push((item, target, attr.size));
            }
        }

        stream::iter(files)
            .map(|(from, to, size)| async move { self.copy_file(&from, &to, size).await })
            .buffer_unordered(self.config().fan_out)
            .try_collect::<Vec<()>>()
            .await?;
        debug!(from = %src.absolute(), to = %dst.absolute(), "copied tree");
        Ok(())
    }

    /// Remove a file or a directory with everything under it.
    ///
    /// Backends that remove a whole prefix in one call get that call;
    /// random-access backends are emptied bottom-up first.
    pub(crate) async fn remove_tree(&self, target: &Target) -> VfsResult<()> {
        if target.is_root() {
            return Err(VfsError::permission_denied(target.absolute()));
        }
        let driver = &target.volume.driver;
        let attr = driver.stat(&target.relative).await?;
        if attr.is_file() {
            return driver.unlink(&target.relative).await;
        }

        match driver.rmdir(&target.relative).await {
            Err(e) if e.is_not_empty() => {}
            other => return other,
        }

        let items = self.walk(target).await?;
        let (dirs, files): (Vec<_>, Vec<_>) = items.into_iter().partition(|(_, a)| a.is_dir());

        stream::iter(files)
            .map(|(file, _)| async move { driver.unlink(&file.relative).await })
            .buffer_unordered(self.config().fan_out)
            .try_collect::<Vec<()>>()
            .await?;

        // Walk order puts parents first, so reverse it for deepest-first.
        for (dir, _) in dirs.iter().rev() {
            ignore_missing(driver.rmdir(&dir.relative).await)?;
        }
        ignore_missing(driver.rmdir(&target.relative).await)
    }

    /// Create a directory and any missing parents.
    pub(crate) async fn ensure_dir(&self, target: &Target) -> VfsResult<()> {
        let driver = &target.volume.driver;
        let mut missing = Vec::new();
        let mut cursor = Some(target.clone());
        while let Some(dir) = cursor {
            match driver.stat(&dir.relative).await {
                Ok(attr) if attr.is_dir() => break,
                Ok(_) => return Err(VfsError::not_a_directory(dir.absolute())),
                Err(e) if e.is_not_found() => {
                    cursor = dir.parent();
                    missing.push(dir);
                }
                Err(e) => return Err(e),
            }
        }
        for dir in missing.iter().rev() {
            match driver.mkdir(&dir.relative).await {
                Err(e) if e.kind() == fsgate_kernel::ErrorKind::AlreadyExists => {}
                other => other?,
            }
        }
        Ok(())
    }
}

fn ignore_missing(result: VfsResult<()>) -> VfsResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
