//! fsgate kernel: one path-addressable namespace over many storage backends.
//!
//! The kernel owns the volume table, the path-token codec and the storage
//! drivers. The command protocol lives in `fsgate-connector`.

pub mod constants;
pub mod vfs;

pub use vfs::{
    Driver, ErrorKind, FileAttr, FileHandle, FileType, MountTable, OpenMode, Permissions, Target,
    VfsError, VfsResult, Volume,
};
