//! Gateway configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file yields
//! the stock gateway: `/home` and `/tmp` as in-memory volumes.
//!
//! ```toml
//! thumbnail_root = "/tmp/.tmb"
//! disabled = ["chmod", "netmount"]
//!
//! [[volumes]]
//! root = "/home"
//! kind = "local"
//! path = "/srv/fsgate/home"
//!
//! [[volumes]]
//! root = "/tmp"
//! kind = "memory"
//!
//! [remote]
//! stat_ttl_secs = 5
//! ```

use fsgate_kernel::constants::{
    DEFAULT_FLUSH_THRESHOLD, DEFAULT_SELF_TEST_TIMEOUT, DEFAULT_STAT_CACHE_CAPACITY,
    DEFAULT_STAT_TTL,
};
use fsgate_kernel::vfs::backends::artifact::ArtifactOptions;
use fsgate_kernel::vfs::backends::remote::RemoteOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_DISABLED, DEFAULT_FAN_OUT, DEFAULT_THUMBNAIL_ROOT, DEFAULT_UPLOAD_CHUNK_SIZE,
    DEFAULT_UPLOAD_MAX_SIZE,
};
use crate::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Volumes mounted at startup, in index order.
    pub volumes: Vec<VolumeConfig>,
    /// Absolute gateway path that holds cached thumbnails.
    pub thumbnail_root: String,
    /// Commands refused with `errPerm`.
    pub disabled: Vec<String>,
    pub upload_chunk_size: usize,
    /// Byte limit for one uploaded file, chunked or whole.
    pub upload_max_size: u64,
    /// Concurrent backend calls per directory in tree walks.
    pub fan_out: usize,
    pub remote: RemoteConfig,
    pub artifact: ArtifactConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            volumes: vec![VolumeConfig::memory("/home"), VolumeConfig::memory("/tmp")],
            thumbnail_root: DEFAULT_THUMBNAIL_ROOT.to_string(),
            disabled: DEFAULT_DISABLED.iter().map(|s| s.to_string()).collect(),
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            upload_max_size: DEFAULT_UPLOAD_MAX_SIZE,
            fan_out: DEFAULT_FAN_OUT,
            remote: RemoteConfig::default(),
            artifact: ArtifactConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(text: &str) -> ConnectorResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConnectorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConnectorResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConnectorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.upload_chunk_size == 0 {
            return Err(ConnectorError::Config("upload_chunk_size must be positive".into()));
        }
        if self.fan_out == 0 {
            return Err(ConnectorError::Config("fan_out must be positive".into()));
        }
        if !self.thumbnail_root.starts_with('/') {
            return Err(ConnectorError::Config(format!(
                "thumbnail_root must be absolute: {}",
                self.thumbnail_root
            )));
        }
        Ok(())
    }

    pub fn is_disabled(&self, command: &str) -> bool {
        self.disabled.iter().any(|d| d == command)
    }
}

/// A startup volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub root: String,
    #[serde(flatten)]
    pub backend: VolumeBackend,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub alias: Option<String>,
    /// Commands refused on this volume only.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl VolumeConfig {
    pub fn memory(root: &str) -> Self {
        Self {
            root: root.to_string(),
            backend: VolumeBackend::Memory,
            read_only: false,
            locked: false,
            alias: None,
            disabled: Vec::new(),
        }
    }

    pub fn local(root: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            backend: VolumeBackend::Local { path: path.into() },
            ..Self::memory(root)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VolumeBackend {
    Memory,
    Local { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub stat_ttl_secs: u64,
    pub stat_cache_capacity: usize,
    pub self_test_timeout_secs: u64,
    pub flush_threshold: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            stat_ttl_secs: DEFAULT_STAT_TTL.as_secs(),
            stat_cache_capacity: DEFAULT_STAT_CACHE_CAPACITY,
            self_test_timeout_secs: DEFAULT_SELF_TEST_TIMEOUT.as_secs(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl RemoteConfig {
    pub fn options(&self) -> RemoteOptions {
        RemoteOptions {
            stat_ttl: Duration::from_secs(self.stat_ttl_secs),
            cache_capacity: self.stat_cache_capacity,
            flush_threshold: self.flush_threshold,
            self_test_timeout: Duration::from_secs(self.self_test_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub flush_threshold: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl ArtifactConfig {
    pub fn options(&self, read_only: bool) -> ArtifactOptions {
        ArtifactOptions {
            read_only,
            flush_threshold: self.flush_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = GatewayConfig::from_toml("").unwrap();
        let roots: Vec<&str> = config.volumes.iter().map(|v| v.root.as_str()).collect();
        assert_eq!(roots, vec!["/home", "/tmp"]);
        assert_eq!(config.thumbnail_root, "/tmp/.tmb");
        assert_eq!(config.fan_out, 8);
        assert!(config.is_disabled("chmod"));
        assert!(!config.is_disabled("rm"));
    }

    #[test]
    fn test_volumes_and_overrides() {
        let config = GatewayConfig::from_toml(
            r#"
            disabled = ["netmount"]
            fan_out = 4

            [[volumes]]
            root = "/data"
            kind = "local"
            path = "/srv/data"
            read_only = true

            [[volumes]]
            root = "/scratch"
            kind = "memory"
            disabled = ["archive"]

            [remote]
            stat_ttl_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.volumes.len(), 2);
        assert_eq!(
            config.volumes[0].backend,
            VolumeBackend::Local { path: "/srv/data".into() }
        );
        assert!(config.volumes[0].read_only);
        assert_eq!(config.volumes[1].backend, VolumeBackend::Memory);
        assert_eq!(config.volumes[1].disabled, vec!["archive"]);
        assert!(config.volumes[0].disabled.is_empty());
        assert_eq!(config.upload_max_size, DEFAULT_UPLOAD_MAX_SIZE);
        assert_eq!(config.remote.options().stat_ttl, Duration::from_secs(30));
        assert_eq!(config.remote.stat_cache_capacity, 4096);
        assert!(config.is_disabled("netmount"));
        assert!(!config.is_disabled("chmod"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(GatewayConfig::from_toml("fan_out = 0").is_err());
        assert!(GatewayConfig::from_toml("thumbnail_root = \"tmb\"").is_err());
        assert!(GatewayConfig::from_toml("[[volumes]]\nroot = \"/x\"\nkind = \"ftp\"").is_err());
    }
}
