//! In-memory filesystem backend.
//!
//! Used for the `/tmp` scratch volume and testing. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use super::buffer::write_into;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Driver, FileHandle};
use crate::vfs::types::{DirEntry, FileAttr, OpenMode, normalize, split};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }
}

type Entries = Arc<RwLock<HashMap<String, Entry>>>;

/// In-memory filesystem backend.
///
/// Keys are normalized relative paths; the root is the empty string and
/// always exists. Cloning shares the same tree.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    entries: Entries,
    read_only: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            String::new(),
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
            read_only: false,
        }
    }

    /// Same tree, refusing every mutation.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn key(path: &str) -> VfsResult<String> {
        normalize(path).ok_or_else(|| VfsError::path_escapes_root(path))
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// The parent of `key` must be an existing directory.
    fn check_parent(entries: &HashMap<String, Entry>, key: &str) -> VfsResult<()> {
        let (parent, _) = split(key).ok_or_else(|| VfsError::permission_denied("root"))?;
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    fn is_child_of(candidate: &str, dir: &str) -> bool {
        match split(candidate) {
            Some((parent, _)) => parent == dir,
            None => false,
        }
    }

    fn is_under(candidate: &str, dir: &str) -> bool {
        candidate
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[async_trait]
impl Driver for MemoryBackend {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let key = Self::key(path)?;
        self.entries
            .read()
            .get(&key)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(key))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let key = Self::key(path)?;
        let entries = self.entries.read();

        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(key)),
            None => return Err(VfsError::not_found(key)),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(k, _)| Self::is_child_of(k, &key))
            .filter_map(|(k, entry)| {
                let (_, name) = split(k)?;
                Some(DirEntry::with_attr(name, entry.attr().clone()))
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn FileHandle>> {
        let key = Self::key(path)?;
        if mode.is_write() {
            self.check_writable()?;
            let mut entries = self.entries.write();
            Self::check_parent(&entries, &key)?;
            match entries.get_mut(&key) {
                Some(Entry::Directory { .. }) => return Err(VfsError::is_a_directory(key)),
                Some(Entry::File { data, attr }) => {
                    if mode == OpenMode::Write {
                        data.clear();
                        attr.size = 0;
                        attr.mtime = SystemTime::now();
                    }
                }
                None => {
                    entries.insert(
                        key.clone(),
                        Entry::File {
                            data: Vec::new(),
                            attr: FileAttr::file(0, 0o644),
                        },
                    );
                }
            }
        } else {
            match self.entries.read().get(&key) {
                Some(Entry::File { .. }) => {}
                Some(Entry::Directory { .. }) => return Err(VfsError::is_a_directory(key)),
                None => return Err(VfsError::not_found(key)),
            }
        }

        Ok(Box::new(MemoryFile {
            entries: Arc::clone(&self.entries),
            key,
        }))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path)?;
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(key)),
            Some(_) => {
                entries.remove(&key);
                Ok(())
            }
            None => Err(VfsError::not_found(key)),
        }
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path)?;
        let mut entries = self.entries.write();
        Self::check_parent(&entries, &key)?;
        if entries.contains_key(&key) {
            return Err(VfsError::already_exists(key));
        }
        entries.insert(
            key,
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path)?;
        if key.is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(key)),
            None => return Err(VfsError::not_found(key)),
        }
        if entries.keys().any(|k| Self::is_child_of(k, &key)) {
            return Err(VfsError::directory_not_empty(key));
        }
        entries.remove(&key);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check_writable()?;
        let from = Self::key(from)?;
        let to = Self::key(to)?;
        if from.is_empty() || to.is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        if Self::is_under(&to, &from) {
            return Err(VfsError::invalid_path(to));
        }

        let mut entries = self.entries.write();
        Self::check_parent(&entries, &to)?;
        let entry = entries
            .remove(&from)
            .ok_or_else(|| VfsError::not_found(from.clone()))?;

        // Directories carry their whole subtree
        if matches!(entry, Entry::Directory { .. }) {
            let children: Vec<String> = entries
                .keys()
                .filter(|k| Self::is_under(k, &from))
                .cloned()
                .collect();
            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    let moved = format!("{to}{}", &child[from.len()..]);
                    entries.insert(moved, child_entry);
                }
            }
        }

        entries.insert(to, entry);
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Handle onto a memory file. Reads and writes apply immediately.
struct MemoryFile {
    entries: Entries,
    key: String,
}

#[async_trait]
impl FileHandle for MemoryFile {
    async fn read(&mut self, position: u64, len: usize) -> VfsResult<Vec<u8>> {
        match self.entries.read().get(&self.key) {
            Some(Entry::File { data, .. }) => {
                let start = (position as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(self.key.clone())),
            None => Err(VfsError::not_found(self.key.clone())),
        }
    }

    async fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        match self.entries.write().get_mut(&self.key) {
            Some(Entry::File {
                data: file_data,
                attr,
            }) => {
                write_into(file_data, position, data)?;
                attr.size = file_data.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(data.len())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(self.key.clone())),
            None => Err(VfsError::not_found(self.key.clone())),
        }
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let fs = MemoryBackend::new();
        fs.write_all("test.txt", b"hello world").await.unwrap();

        let data = fs.read_all("test.txt").await.unwrap();
        assert_eq!(data, b"hello world");

        let mut handle = fs.open("test.txt", OpenMode::Read).await.unwrap();
        assert_eq!(handle.read(6, 100).await.unwrap(), b"world");
        assert!(handle.read(50, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_mode_truncates_update_does_not() {
        let fs = MemoryBackend::new();
        fs.write_all("f", b"abcdef").await.unwrap();

        let mut handle = fs.open("f", OpenMode::Update).await.unwrap();
        handle.write(2, b"ZZ").await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(fs.read_all("f").await.unwrap(), b"abZZef");

        let mut handle = fs.open("f", OpenMode::Write).await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(fs.stat("f").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_update_rejects_offset_past_addressable_range() {
        let fs = MemoryBackend::new();
        fs.write_all("f", b"abc").await.unwrap();

        let mut handle = fs.open("f", OpenMode::Update).await.unwrap();
        assert!(handle.write(1 << 62, b"xy").await.is_err());
        assert!(handle.write(u64::MAX, b"x").await.is_err());
        handle.close().await.unwrap();
        assert_eq!(fs.read_all("f").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryBackend::new();
        fs.mkdir("a").await.unwrap();
        fs.mkdir("a/b").await.unwrap();
        fs.write_all("a/file.txt", b"x").await.unwrap();

        let entries = fs.readdir("a").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "b");
        assert!(entries[0].kind.is_dir());
        assert_eq!(entries[1].name, "file.txt");
        assert_eq!(entries[1].attr.as_ref().unwrap().size, 1);

        let root = fs.readdir("").await.unwrap();
        assert_eq!(root.len(), 1);
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent_and_rejects_existing() {
        let fs = MemoryBackend::new();
        assert!(fs.mkdir("x/y").await.unwrap_err().is_not_found());
        fs.mkdir("x").await.unwrap();
        assert!(matches!(
            fs.mkdir("x").await,
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_rmdir_requires_empty() {
        let fs = MemoryBackend::new();
        fs.mkdir("d").await.unwrap();
        fs.write_all("d/f", b"x").await.unwrap();
        assert!(matches!(
            fs.rmdir("d").await,
            Err(VfsError::DirectoryNotEmpty(_))
        ));
        fs.unlink("d/f").await.unwrap();
        fs.rmdir("d").await.unwrap();
        assert!(!fs.exists("d").await);
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let fs = MemoryBackend::new();
        fs.mkdir("src").await.unwrap();
        fs.mkdir("src/inner").await.unwrap();
        fs.write_all("src/inner/f.txt", b"data").await.unwrap();

        fs.rename("src", "dst").await.unwrap();

        assert!(!fs.exists("src").await);
        assert!(!fs.exists("src/inner/f.txt").await);
        assert_eq!(fs.read_all("dst/inner/f.txt").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_into_self_rejected() {
        let fs = MemoryBackend::new();
        fs.mkdir("a").await.unwrap();
        assert!(fs.rename("a", "a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_read_only() {
        let fs = MemoryBackend::new();
        fs.write_all("f", b"x").await.unwrap();
        let ro = fs.clone().read_only();
        assert!(Driver::read_only(&ro));
        assert!(matches!(ro.unlink("f").await, Err(VfsError::ReadOnly)));
        assert!(ro.open("f", OpenMode::Write).await.is_err());
        assert_eq!(ro.read_all("f").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let fs = MemoryBackend::new();
        assert!(matches!(
            fs.stat("../etc/passwd").await,
            Err(VfsError::PathEscapesRoot(_))
        ));
    }
}
