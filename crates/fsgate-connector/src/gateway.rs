//! The gateway: one mount table plus the config it was built from.

use fsgate_kernel::vfs::backends::{LocalBackend, MemoryBackend};
use fsgate_kernel::vfs::{Driver, MountTable, Permissions, Target, VfsResult, VolumeMeta};
use std::sync::Arc;
use tracing::info;

use crate::config::{GatewayConfig, VolumeBackend, VolumeConfig};
use crate::constants::ICON_LOCAL;
use crate::error::{ConnectorError, ConnectorResult};

/// A virtual filesystem gateway.
///
/// Owns its mount table, so several gateways can live in one process
/// without sharing volumes. Cheap to share behind an `Arc`; every command
/// takes `&self`.
#[derive(Debug)]
pub struct Gateway {
    mounts: MountTable,
    config: GatewayConfig,
}

impl Gateway {
    /// Validate the config and mount the startup volumes in order.
    pub async fn new(config: GatewayConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let gateway = Self {
            mounts: MountTable::new(),
            config,
        };
        for volume in &gateway.config.volumes {
            gateway.mount_startup(volume).await?;
        }
        info!(volumes = gateway.mounts.len(), "gateway ready");
        Ok(gateway)
    }

    async fn mount_startup(&self, volume: &VolumeConfig) -> ConnectorResult<Target> {
        let driver: Arc<dyn Driver> = match &volume.backend {
            VolumeBackend::Memory if volume.read_only => Arc::new(MemoryBackend::new().read_only()),
            VolumeBackend::Memory => Arc::new(MemoryBackend::new()),
            VolumeBackend::Local { path } => {
                tokio::fs::create_dir_all(path).await.map_err(|e| {
                    ConnectorError::Config(format!("volume {}: {}: {e}", volume.root, path.display()))
                })?;
                if volume.read_only {
                    Arc::new(LocalBackend::read_only(path))
                } else {
                    Arc::new(LocalBackend::new(path))
                }
            }
        };

        let kind = match volume.backend {
            VolumeBackend::Memory => "memory",
            VolumeBackend::Local { .. } => "local",
        };
        let mut meta = VolumeMeta::new(kind)
            .with_icon(ICON_LOCAL)
            .with_disabled(volume.disabled.iter().cloned());
        if let Some(alias) = &volume.alias {
            meta = meta.with_alias(alias);
        }

        let permissions = Permissions {
            read: true,
            write: !volume.read_only,
            locked: volume.locked,
        };
        Ok(self.mounts.mount(&volume.root, permissions, driver, meta)?)
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Mount an already-connected driver.
    pub fn mount(
        &self,
        root: &str,
        permissions: Permissions,
        driver: Arc<dyn Driver>,
        meta: VolumeMeta,
    ) -> VfsResult<Target> {
        self.mounts.mount(root, permissions, driver, meta)
    }

    /// Default volume for `open` without a usable target.
    pub(crate) fn default_root(&self) -> ConnectorResult<Target> {
        self.mounts
            .root(0)
            .ok_or_else(|| ConnectorError::Config("no volumes mounted".into()))
    }

    /// Decode a token or fail with `errInvalidTarget` naming it.
    pub(crate) fn target(&self, token: &str) -> ConnectorResult<Target> {
        self.mounts.target(token).map_err(|source| ConnectorError::Vfs {
            source,
            token: Some(token.to_string()),
        })
    }

    /// Directory holding cached thumbnails, if some volume owns it.
    pub(crate) fn thumbnail_dir(&self) -> Option<Target> {
        self.mounts.resolve(&self.config.thumbnail_root)
    }
}
