//! Zip commands: archive and zipdl.

use fsgate_kernel::vfs::{Target, VfsError};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::Response;
use super::params::Params;
use crate::constants::{DEFAULT_ARCHIVE_NAME, ZIP_MIME};
use crate::error::{ConnectorError, ConnectorResult, ResultExt};
use crate::gateway::Gateway;
use crate::media;

/// Scratch directory for two-phase downloads, next to the thumbnails.
const ZIPDL_DIR: &str = ".zipdl";

impl Gateway {
    /// Archive entries for the given items, named relative to each item's
    /// parent. Directories contribute a `name/` entry and their contents.
    async fn archive_entries(&self, targets: &[Target]) -> ConnectorResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for target in targets {
            let token = target.token();
            let driver = &target.volume.driver;
            let attr = driver.stat(&target.relative).await.at(&token)?;
            let base = target.name();
            if attr.is_file() {
                entries.push((base, self.read_file(target).await.at(&token)?));
                continue;
            }

            entries.push((format!("{base}/"), Vec::new()));
            for (item, attr) in self.walk(target).await.at(&token)? {
                let inner = item
                    .relative
                    .strip_prefix(target.relative.as_str())
                    .unwrap_or(&item.relative)
                    .trim_start_matches('/');
                if attr.is_dir() {
                    entries.push((format!("{base}/{inner}/"), Vec::new()));
                } else {
                    let data = self.read_file(&item).await.at(&item.token())?;
                    entries.push((format!("{base}/{inner}"), data));
                }
            }
        }
        Ok(entries)
    }

    async fn build_zip(&self, targets: &[Target]) -> ConnectorResult<Vec<u8>> {
        let entries = self.archive_entries(targets).await?;
        let count = entries.len();
        let zip = tokio::task::spawn_blocking(move || media::zip_archive(entries))
            .await
            .map_err(|e| media::MediaError::Io(std::io::Error::other(e)))??;
        debug!(entries = count, bytes = zip.len(), "zip built");
        Ok(zip)
    }

    #[tracing::instrument(skip(self, p), name = "cmd.archive")]
    pub(crate) async fn archive(&self, p: &Params) -> ConnectorResult<Value> {
        if let Some(kind) = p.get("type") {
            if kind != ZIP_MIME {
                return Err(media::MediaError::Unsupported(format!("archive type {kind}")).into());
            }
        }
        let dir = self.param_target(p)?;
        let targets = self.param_targets(p)?;
        let name = super::edit::valid_name(p.get("name").unwrap_or(DEFAULT_ARCHIVE_NAME))?;
        let file = dir.child(name);
        let token = file.token();
        dir.volume.check_writable().at(&token)?;
        if file.volume.driver.exists(&file.relative).await {
            return Err(VfsError::already_exists(file.absolute())).at(&token);
        }

        let zip = self.build_zip(&targets).await?;
        self.write_file(&file, &zip).await.at(&token)?;
        Ok(json!({ "added": [self.file_info(&file).await?] }))
    }

    fn zipdl_dir(&self) -> ConnectorResult<Target> {
        self.thumbnail_dir()
            .and_then(|tmb| tmb.parent())
            .map(|scratch| scratch.child(ZIPDL_DIR))
            .ok_or_else(|| ConnectorError::Config("no scratch volume for downloads".into()))
    }

    /// Phase one builds the archive in scratch space and returns its
    /// token; phase two (`download=1`) streams it and deletes it.
    #[tracing::instrument(skip(self, p), name = "cmd.zipdl")]
    pub(crate) async fn zipdl(&self, p: &Params) -> ConnectorResult<Response> {
        if p.flag("download") {
            return self.zipdl_download(p).await;
        }

        let targets = self.param_targets(p)?;
        let name = match targets.first().and_then(|t| t.parent()) {
            Some(parent) => format!("{}.zip", parent.name()),
            None => DEFAULT_ARCHIVE_NAME.to_string(),
        };
        let zip = self.build_zip(&targets).await?;

        let scratch = self.zipdl_dir()?;
        self.ensure_dir(&scratch).await.at(&scratch.token())?;
        let file = scratch.child(&format!("{}.zip", uuid::Uuid::new_v4().simple()));
        self.write_file(&file, &zip).await.at(&file.token())?;

        Ok(Response::Json(json!({
            "zipdl": { "file": file.token(), "name": name, "mime": ZIP_MIME }
        })))
    }

    /// `targets[]` is `[cwd, file, name, mime?]` as returned by phase one.
    async fn zipdl_download(&self, p: &Params) -> ConnectorResult<Response> {
        let targets = p.list("targets");
        let (Some(token), Some(name)) = (targets.get(1), targets.get(2)) else {
            return Err(ConnectorError::params("targets"));
        };
        let file = self.target(token)?;
        if !self.zipdl_dir()?.contains(&file) {
            return Err(VfsError::permission_denied(file.absolute())).at(token);
        }

        let body = self.read_file(&file).await.at(token)?;
        if let Err(e) = file.volume.driver.unlink(&file.relative).await {
            warn!(token, "download archive not removed: {e}");
        }
        let mime = targets.get(3).copied().unwrap_or(ZIP_MIME);
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', "_"));
        Ok(Response::File {
            status: 200,
            headers: vec![
                ("Content-Type".into(), mime.to_string()),
                ("Content-Disposition".into(), disposition),
                ("Content-Length".into(), body.len().to_string()),
            ],
            body,
        })
    }
}
