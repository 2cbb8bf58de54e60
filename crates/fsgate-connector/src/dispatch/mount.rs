//! netmount: mount a network backend, or unmount one.

use fsgate_kernel::vfs::VfsError;
use serde_json::{Value, json};
use tracing::info;

use super::params::Params;
use crate::error::{ConnectorResult, ResultExt};
use crate::gateway::Gateway;
use crate::netmount::{self, MountRequest};

impl Gateway {
    #[tracing::instrument(skip(self, p), name = "cmd.netmount")]
    pub(crate) async fn netmount(&self, p: &Params) -> ConnectorResult<Value> {
        if p.get("protocol") == Some("netunmount") {
            return self.netunmount(p).await;
        }

        let request = MountRequest::from_params(p)?;
        let connected = netmount::connect(&request, self.config()).await?;
        let root = self.mount(
            &connected.root,
            connected.permissions,
            connected.driver,
            connected.meta,
        )?;
        Ok(json!({ "added": [self.file_info(&root).await?] }))
    }

    /// `user` carries the root token of the volume to drop.
    async fn netunmount(&self, p: &Params) -> ConnectorResult<Value> {
        let token = p.require("user")?;
        let target = self.target(token)?;
        if !target.is_root() || !target.volume.meta.network {
            return Err(VfsError::permission_denied(target.absolute())).at(token);
        }
        let removed = self.mounts().unmount(&target.volume.mount_key).at(token)?;
        info!(root = %target.volume.root, "network volume released");
        Ok(json!({ "removed": [removed] }))
    }
}
