//! Virtual filesystem layer.
//!
//! Provides the driver contract shared by every backend, the mount table
//! that routes absolute paths to volumes, and the token codec that hides
//! raw paths from protocol clients.

pub mod backends;
pub mod codec;
mod error;
mod mount;
mod ops;
mod types;

pub use codec::Target;
pub use error::{ErrorKind, VfsError, VfsResult};
pub use mount::{MountTable, Volume, VolumeMeta};
pub use ops::{Driver, FileHandle};
pub use types::{
    DirEntry, FileAttr, FileType, OpenMode, Permissions, join as join_path,
    normalize as normalize_path, split as split_path,
};
