//! Read-only commands: open, ls, tree, parents, info, search, size.

use fsgate_kernel::vfs::{Target, VfsError};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use tracing::warn;

use super::info::{Archivers, FileInfo};
use super::params::Params;
use crate::constants::{API_VERSION, NET_DRIVERS, UPLOAD_MAX_FILES};
use crate::error::{ConnectorError, ConnectorResult, ResultExt};
use crate::gateway::Gateway;

/// Bytes per megabyte in the `uplMaxSize` figure.
const MIB: f64 = 1024.0 * 1024.0;

/// Keep the first record for every hash.
fn dedup(files: Vec<FileInfo>) -> Vec<FileInfo> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|f| seen.insert(f.hash.clone()))
        .collect()
}

impl Gateway {
    /// Decode the `target` parameter.
    pub(crate) fn param_target(&self, p: &Params) -> ConnectorResult<Target> {
        self.target(p.require("target")?)
    }

    /// Decode `targets[]`, failing on the first bad token.
    pub(crate) fn param_targets(&self, p: &Params) -> ConnectorResult<Vec<Target>> {
        let tokens = p.list("targets");
        if tokens.is_empty() {
            return Err(ConnectorError::params("targets"));
        }
        tokens.into_iter().map(|t| self.target(t)).collect()
    }

    /// Info for a target that must be a directory.
    async fn dir_info(&self, target: &Target) -> ConnectorResult<FileInfo> {
        let info = self.file_info(target).await?;
        if info.is_dir() {
            Ok(info)
        } else {
            Err(VfsError::not_a_directory(target.absolute())).at(&info.hash)
        }
    }

    #[tracing::instrument(skip(self, p), name = "cmd.open")]
    pub(crate) async fn open(&self, p: &Params) -> ConnectorResult<Value> {
        let init = p.flag("init");
        let requested = match p.get("target") {
            Some(token) => match self.mounts().decode(token) {
                Some(target) => Some(target),
                None if init => None,
                None => return Err(VfsError::invalid_target(token)).at(token),
            },
            None if init => None,
            None => return Err(ConnectorError::params("target")),
        };

        let (cwd, cwd_info) = match requested {
            Some(target) => match self.dir_info(&target).await {
                Ok(info) => (target, info),
                Err(e) if init => {
                    warn!("open target unusable, falling back to default volume: {e}");
                    let root = self.default_root()?;
                    let info = self.dir_info(&root).await?;
                    (root, info)
                }
                Err(e) => return Err(e),
            },
            None => {
                let root = self.default_root()?;
                let info = self.dir_info(&root).await?;
                (root, info)
            }
        };

        let mut files = Vec::new();
        if init || p.flag("tree") {
            files.extend(self.root_infos().await);
        }
        files.extend(self.list_infos(&cwd).await?);
        let files = dedup(files);

        let mut result = Map::new();
        if init {
            result.insert("api".into(), json!(API_VERSION));
        }
        result.insert(
            "options".into(),
            json!({
                "path": cwd.absolute(),
                "separator": "/",
                "disabled": self.config().disabled,
                "uiCmdMap": {},
                "tmbUrl": format!("{}/", self.config().thumbnail_root.trim_end_matches('/')),
                "archivers": Archivers::default(),
            }),
        );
        result.insert("netDrivers".into(), json!(NET_DRIVERS));
        result.insert("uplMaxFile".into(), json!(UPLOAD_MAX_FILES));
        result.insert("uplMaxSize".into(), json!(format!("{:.1}M", self.config().upload_max_size as f64 / MIB)));
        result.insert("cwd".into(), json!(cwd_info));
        result.insert("files".into(), json!(files));
        Ok(Value::Object(result))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.ls")]
    pub(crate) async fn ls(&self, p: &Params) -> ConnectorResult<Value> {
        let dir = self.param_target(p)?;
        let entries = dir
            .volume
            .driver
            .readdir(&dir.relative)
            .await
            .at(&dir.token())?;
        let intersect = p.list("intersect");
        let list: Vec<String> = entries
            .into_iter()
            .map(|e| e.name)
            .filter(|name| intersect.is_empty() || intersect.contains(&name.as_str()))
            .collect();
        Ok(json!({ "list": list }))
    }

    /// Immediate subdirectories of a directory.
    async fn subdirs(&self, dir: &Target) -> ConnectorResult<Vec<FileInfo>> {
        let entries = dir
            .volume
            .driver
            .readdir(&dir.relative)
            .await
            .at(&dir.token())?
            .into_iter()
            .filter(|e| e.kind.is_dir())
            .collect();
        Ok(self.describe_entries(dir, entries).await)
    }

    #[tracing::instrument(skip(self, p), name = "cmd.tree")]
    pub(crate) async fn tree(&self, p: &Params) -> ConnectorResult<Value> {
        let dir = self.param_target(p)?;
        Ok(json!({ "tree": self.subdirs(&dir).await? }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.parents")]
    pub(crate) async fn parents(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let mut tree = self.root_infos().await;
        let mut cursor = target.parent();
        while let Some(dir) = cursor {
            tree.extend(self.subdirs(&dir).await?);
            cursor = dir.parent();
        }
        Ok(json!({ "tree": dedup(tree) }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.info")]
    pub(crate) async fn info(&self, p: &Params) -> ConnectorResult<Value> {
        let mut files = Vec::new();
        for token in p.list("targets") {
            let described = match self.target(token) {
                Ok(target) => self.file_info(&target).await,
                Err(e) => Err(e),
            };
            match described {
                Ok(info) => files.push(info),
                Err(e) => warn!(token, "info skipped: {e}"),
            }
        }
        Ok(json!({ "files": files }))
    }

    /// Case-insensitive name match below `target`, or below every volume
    /// when no target is given.
    #[tracing::instrument(skip(self, p), name = "cmd.search")]
    pub(crate) async fn search(&self, p: &Params) -> ConnectorResult<Value> {
        let needle = p.require("q")?.to_lowercase();
        let roots = match p.get("target") {
            Some(token) => vec![self.target(token)?],
            None => self.mounts().roots(),
        };

        let mut files = Vec::new();
        for root in roots {
            let items = match self.walk(&root).await {
                Ok(items) => items,
                Err(e) if p.get("target").is_none() => {
                    warn!(root = %root.volume.root, "search skipped volume: {e}");
                    continue;
                }
                Err(e) => return Err(e).at(&root.token()),
            };
            let matches: Vec<_> = items
                .into_iter()
                .filter(|(t, _)| t.name().to_lowercase().contains(&needle))
                .collect();
            let described: Vec<FileInfo> = stream::iter(matches)
                .map(|(target, attr)| async move { self.describe(&target, &attr).await })
                .buffered(self.config().fan_out)
                .collect()
                .await;
            files.extend(described);
        }
        Ok(json!({ "files": files }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.size")]
    pub(crate) async fn size(&self, p: &Params) -> ConnectorResult<Value> {
        let (mut size, mut file_count, mut dir_count) = (0u64, 0u64, 0u64);
        for target in self.param_targets(p)? {
            let token = target.token();
            let attr = target.volume.driver.stat(&target.relative).await.at(&token)?;
            if attr.is_file() {
                size += attr.size;
                file_count += 1;
                continue;
            }
            dir_count += 1;
            for (_, attr) in self.walk(&target).await.at(&token)? {
                if attr.is_dir() {
                    dir_count += 1;
                } else {
                    size += attr.size;
                    file_count += 1;
                }
            }
        }
        Ok(json!({ "size": size, "fileCnt": file_count, "dirCnt": dir_count }))
    }
}
