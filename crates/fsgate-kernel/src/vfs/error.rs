//! VFS error types.

use std::io;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Stable error kind strings reported to protocol clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    #[strum(serialize = "errInvalidTarget")]
    InvalidTarget,
    #[strum(serialize = "errNotFound")]
    NotFound,
    #[strum(serialize = "errExists")]
    AlreadyExists,
    #[strum(serialize = "errPerm")]
    PermissionDenied,
    #[strum(serialize = "errNetMount")]
    BackendUnavailable,
    #[strum(serialize = "errUnsupported")]
    Unsupported,
    #[strum(serialize = "errIO")]
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Volume is mounted read-only.
    #[error("volume is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Token does not decode to a mounted volume.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// No volume owns the path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// Source and destination live on different volumes.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// The backend cannot perform this even with write access.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Backend unreachable or failed its mount self-test.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Error reported by a remote backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_target(token: impl Into<String>) -> Self {
        Self::InvalidTarget(token.into())
    }

    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    pub fn unsupported(op: impl Into<String>) -> Self {
        Self::Unsupported(op.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Protocol-level kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) | VfsError::NoMountPoint(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::PermissionDenied(_) | VfsError::ReadOnly | VfsError::PathEscapesRoot(_) => {
                ErrorKind::PermissionDenied
            }
            VfsError::InvalidTarget(_) | VfsError::InvalidPath(_) => ErrorKind::InvalidTarget,
            VfsError::Unsupported(_) | VfsError::CrossDeviceLink => ErrorKind::Unsupported,
            VfsError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::Io,
            },
            VfsError::NotADirectory(_)
            | VfsError::IsADirectory(_)
            | VfsError::DirectoryNotEmpty(_)
            | VfsError::Backend(_)
            | VfsError::Other(_) => ErrorKind::Io,
        }
    }

    /// True for errors that mean "nothing at this path".
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True when a non-recursive rmdir refused a populated directory.
    pub fn is_not_empty(&self) -> bool {
        match self {
            VfsError::DirectoryNotEmpty(_) => true,
            VfsError::Io(e) => e.kind() == io::ErrorKind::DirectoryNotEmpty,
            _ => false,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(VfsError::invalid_target("v9_Lw").kind().as_str(), "errInvalidTarget");
        assert_eq!(VfsError::not_found("a").kind().as_str(), "errNotFound");
        assert_eq!(VfsError::already_exists("a").kind().as_str(), "errExists");
        assert_eq!(VfsError::ReadOnly.kind().as_str(), "errPerm");
        assert_eq!(VfsError::unavailable("x").kind().as_str(), "errNetMount");
        assert_eq!(VfsError::unsupported("mkdir").kind().as_str(), "errUnsupported");
    }

    #[test]
    fn test_io_errors_map_by_kind() {
        let err = VfsError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        let err = VfsError::from(io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_not_empty_detection() {
        assert!(VfsError::directory_not_empty("d").is_not_empty());
        let err = VfsError::from(io::Error::new(io::ErrorKind::DirectoryNotEmpty, "busy"));
        assert!(err.is_not_empty());
        assert!(!VfsError::not_found("d").is_not_empty());
    }
}
