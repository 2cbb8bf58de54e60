//! Connector protocol constants.

/// Protocol version reported by `open` with `init`.
pub const API_VERSION: &str = "2.1";

/// Thumbnails are square PNGs of this edge length.
pub const THUMBNAIL_SIZE: u32 = 48;

/// Default location of cached thumbnails.
pub const DEFAULT_THUMBNAIL_ROOT: &str = "/tmp/.tmb";

/// Bytes per write call when copying or uploading. Matches the smallest
/// multipart part an S3 store accepts.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = fsgate_kernel::constants::MIN_PART_SIZE;

/// Concurrent backend calls per directory during tree walks.
pub const DEFAULT_FAN_OUT: usize = 8;

/// Commands disabled unless the config says otherwise.
pub const DEFAULT_DISABLED: &[&str] = &["chmod"];

/// Backends `netmount` knows how to reach.
pub const NET_DRIVERS: &[&str] = &["s3", "hyphafs", "hypha_artifacts"];

pub const UPLOAD_MAX_FILES: u32 = 1000;

/// Largest file an upload may produce, whole or assembled from chunks.
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 102_400 * 1024 * 1024;

/// Name given to a freshly created archive when the client sends none.
pub const DEFAULT_ARCHIVE_NAME: &str = "Archive.zip";

pub const ZIP_MIME: &str = "application/zip";

/// CSS classes for volume icons.
pub const ICON_LOCAL: &str = "elfinder-navbar-root-local";
pub const ICON_NETWORK: &str = "elfinder-navbar-root-network";
