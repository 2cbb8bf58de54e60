//! Core VFS types.
//!
//! Paths handed to drivers are relative to the volume root, use `/` as the
//! separator and never carry a leading slash. The empty path is the root.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes as returned by `stat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes. Always 0 for directories.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix mode bits when the backend reports them.
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl FileAttr {
    /// Create attributes for a file modified now.
    pub fn file(size: u64, perm: u32) -> Self {
        Self {
            size,
            kind: FileType::File,
            perm,
            mtime: SystemTime::now(),
        }
    }

    /// Create attributes for a directory modified now.
    pub fn directory(perm: u32) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            perm,
            mtime: SystemTime::now(),
        }
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = mtime;
        self
    }

    /// Modification time as unix milliseconds, the unit RPC backends use.
    pub fn with_mtime_ms(self, ms: u64) -> Self {
        self.with_mtime(UNIX_EPOCH + std::time::Duration::from_millis(ms))
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Modification time in whole unix seconds.
    pub fn mtime_secs(&self) -> u64 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Directory entry.
///
/// `attr` is filled when the backend returned metadata alongside the
/// listing, which saves a stat round trip per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
    pub attr: Option<FileAttr>,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
            attr: None,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }

    /// Entry carrying the attributes it was listed with.
    pub fn with_attr(name: impl Into<String>, attr: FileAttr) -> Self {
        Self {
            name: name.into(),
            kind: attr.kind,
            attr: Some(attr),
        }
    }
}

/// How a file handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Positional reads of an existing file.
    Read,
    /// Create or truncate, then write.
    Write,
    /// Positional writes into a file that may already exist.
    /// Creates the file when missing and never truncates.
    Update,
}

impl OpenMode {
    pub fn is_write(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Per-volume access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    /// Locked volumes refuse rename and removal of their entries.
    pub locked: bool,
}

impl Permissions {
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            locked: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            locked: true,
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::read_write()
    }
}

/// Join a parent relative path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Split a relative path into (parent, name). The root has no parent.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    })
}

/// Normalize a relative path: drop leading and trailing `/`, empty and `.`
/// components. Returns `None` if a `..` component is present.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => return None,
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
    }

    #[test]
    fn test_file_attr_mtime() {
        let attr = FileAttr::file(11, 0o644).with_mtime_ms(1_700_000_000_500);
        assert_eq!(attr.mtime_secs(), 1_700_000_000);
        assert!(attr.is_file());
        assert_eq!(FileAttr::directory(0o755).size, 0);
    }

    #[test]
    fn test_dir_entry_with_attr() {
        let entry = DirEntry::with_attr("docs", FileAttr::directory(0o755));
        assert_eq!(entry.kind, FileType::Directory);
        assert!(entry.attr.is_some());
        assert!(DirEntry::file("a.txt").attr.is_none());
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(split("a/b/c"), Some(("a/b", "c")));
        assert_eq!(split("c"), Some(("", "c")));
        assert_eq!(split(""), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/").as_deref(), Some("a/b/c"));
        assert_eq!(normalize("/").as_deref(), Some(""));
        assert_eq!(normalize("a/../b"), None);
    }

    #[test]
    fn test_open_mode() {
        assert!(!OpenMode::Read.is_write());
        assert!(OpenMode::Write.is_write());
        assert!(OpenMode::Update.is_write());
    }
}
