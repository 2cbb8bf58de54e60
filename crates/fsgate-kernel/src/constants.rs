//! Kernel tuning constants.
//!
//! Drivers take these as defaults; the connector config can override most
//! of them per gateway.

use std::time::Duration;

/// Buffered bytes that trigger a flush of an open write handle.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024 * 1024;

/// Lifetime of a cached remote stat result.
pub const DEFAULT_STAT_TTL: Duration = Duration::from_secs(5);

/// Maximum cached stat results per remote volume.
pub const DEFAULT_STAT_CACHE_CAPACITY: usize = 4096;

/// Bound on the probe write+unlink a remote volume runs when mounted.
pub const DEFAULT_SELF_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the zero-byte object that marks a directory in an object store.
pub const DIR_MARKER: &str = ".__dir__";

/// Keys requested per object-store listing page.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Smallest part size S3 accepts for any part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;
