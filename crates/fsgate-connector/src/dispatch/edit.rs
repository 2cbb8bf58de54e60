//! Mutating commands: mkdir, mkfile, rename, duplicate, paste, rm, put, get.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fsgate_kernel::vfs::{Target, VfsError, join_path, normalize_path};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::params::Params;
use crate::error::{ConnectorError, ConnectorResult, ResultExt};
use crate::gateway::Gateway;

/// A single path component supplied by the client.
pub(crate) fn valid_name(name: &str) -> ConnectorResult<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ConnectorError::params(format!("name: {name:?}")));
    }
    Ok(name)
}

/// Insert `suffix` before the extension: `report.txt` -> `report(copy).txt`.
///
/// A leading dot is part of the stem, so `.bashrc` has no extension.
pub(crate) fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{suffix}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}{suffix}"),
    }
}

/// Decode a `data:` URL body.
fn decode_data_url(content: &str) -> ConnectorResult<Vec<u8>> {
    let (header, body) = content
        .split_once(',')
        .ok_or_else(|| ConnectorError::params("content"))?;
    if header.ends_with(";base64") {
        STANDARD
            .decode(body.trim())
            .map_err(|_| ConnectorError::params("content"))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

impl Gateway {
    #[tracing::instrument(skip(self, p), name = "cmd.mkdir")]
    pub(crate) async fn mkdir(&self, p: &Params) -> ConnectorResult<Value> {
        let dir = self.param_target(p)?;
        let token = dir.token();
        dir.volume.check_writable().at(&token)?;

        let mut created = Vec::new();
        let mut hashes = serde_json::Map::new();
        if let Some(name) = p.get("name") {
            created.push(dir.child(valid_name(name)?));
        }
        for path in p.list("dirs") {
            let relative = normalize_path(path)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| ConnectorError::params(format!("dirs: {path:?}")))?;
            let target = Target::new(dir.index, dir.volume.clone(), join_path(&dir.relative, &relative));
            hashes.insert(path.to_string(), Value::from(target.token()));
            created.push(target);
        }
        if created.is_empty() {
            return Err(ConnectorError::params("name"));
        }

        let mut added = Vec::new();
        for target in created {
            let token = target.token();
            self.ensure_dir(&target).await.at(&token)?;
            added.push(self.file_info(&target).await?);
        }
        Ok(json!({ "added": added, "hashes": hashes }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.mkfile")]
    pub(crate) async fn mkfile(&self, p: &Params) -> ConnectorResult<Value> {
        let dir = self.param_target(p)?;
        let file = dir.child(valid_name(p.require("name")?)?);
        let token = file.token();
        dir.volume.check_writable().at(&token)?;
        if file.volume.driver.exists(&file.relative).await {
            return Err(VfsError::already_exists(file.absolute())).at(&token);
        }
        self.write_file(&file, &[]).await.at(&token)?;
        Ok(json!({ "added": [self.file_info(&file).await?] }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.rename")]
    pub(crate) async fn rename(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let token = target.token();
        let name = valid_name(p.require("name")?)?;
        let parent = target
            .parent()
            .ok_or_else(|| VfsError::permission_denied(target.absolute()))
            .at(&token)?;
        target.volume.check_unlocked(&target.relative).at(&token)?;

        let renamed = parent.child(name);
        if renamed.relative == target.relative {
            return Ok(json!({ "added": [self.file_info(&target).await?], "removed": [] }));
        }
        if renamed.volume.driver.exists(&renamed.relative).await {
            return Err(VfsError::already_exists(renamed.absolute())).at(&renamed.token());
        }
        target
            .volume
            .driver
            .rename(&target.relative, &renamed.relative)
            .await
            .at(&token)?;
        self.forget_thumbnail(&token).await;

        Ok(json!({ "added": [self.file_info(&renamed).await?], "removed": [token] }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.duplicate")]
    pub(crate) async fn duplicate(&self, p: &Params) -> ConnectorResult<Value> {
        let mut added = Vec::new();
        for source in self.param_targets(p)? {
            let token = source.token();
            let parent = source
                .parent()
                .ok_or_else(|| VfsError::permission_denied(source.absolute()))
                .at(&token)?;
            source.volume.check_writable().at(&token)?;

            let name = source.name();
            let mut copy = parent.child(&with_suffix(&name, "(copy)"));
            let mut n = 1;
            while copy.volume.driver.exists(&copy.relative).await {
                copy = parent.child(&with_suffix(&name, &format!("(copy {n})")));
                n += 1;
            }
            self.copy_tree(&source, &copy).await.at(&token)?;
            added.push(self.file_info(&copy).await?);
        }
        Ok(json!({ "added": added }))
    }

    /// Copy or move one item into `dst`. Returns the new target.
    async fn paste_one(
        &self,
        token: &str,
        dst: &Target,
        cut: bool,
        renames: &[&str],
        suffix: &str,
    ) -> ConnectorResult<Target> {
        let source = self.target(token)?;
        let mut name = source.name();
        if renames.contains(&name.as_str()) {
            name = with_suffix(&name, suffix);
        }
        let dest = dst.child(&name);
        let dest_token = dest.token();

        if source.relative == dest.relative && source.index == dest.index {
            return Err(VfsError::already_exists(dest.absolute())).at(&dest_token);
        }
        if dest.volume.driver.exists(&dest.relative).await {
            return Err(VfsError::already_exists(dest.absolute())).at(&dest_token);
        }

        if !cut {
            self.copy_tree(&source, &dest).await.at(token)?;
            return Ok(dest);
        }

        source.volume.check_unlocked(&source.relative).at(token)?;
        if source.contains(&dest) {
            return Err(VfsError::invalid_path(dest.absolute())).at(&dest_token);
        }
        if source.index == dest.index {
            source
                .volume
                .driver
                .rename(&source.relative, &dest.relative)
                .await
                .at(token)?;
        } else {
            debug!(from = %source.absolute(), to = %dest.absolute(), "cross-volume move");
            self.copy_tree(&source, &dest).await.at(token)?;
            self.remove_tree(&source).await.at(token)?;
        }
        self.forget_thumbnail(token).await;
        Ok(dest)
    }

    /// Each item succeeds or fails on its own; failures are reported in
    /// `warning` and never undo the items before them.
    #[tracing::instrument(skip(self, p), name = "cmd.paste")]
    pub(crate) async fn paste(&self, p: &Params) -> ConnectorResult<Value> {
        let dst = self.target(p.require("dst")?)?;
        dst.volume.check_writable().at(&dst.token())?;
        let cut = p.flag("cut");
        let renames = p.list("renames");
        let suffix = p.get("suffix").unwrap_or("~");

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut warnings = Vec::new();
        for token in p.list("targets") {
            match self.paste_one(token, &dst, cut, &renames, suffix).await {
                Ok(dest) => {
                    match self.file_info(&dest).await {
                        Ok(info) => added.push(info),
                        Err(e) => warn!(token, "pasted item vanished: {e}"),
                    }
                    if cut {
                        removed.push(token.to_string());
                    }
                }
                Err(e) => {
                    warn!(token, "paste failed: {e}");
                    warnings.push(e.to_json());
                }
            }
        }
        let changed = self.file_info(&dst).await.into_iter().collect::<Vec<_>>();
        Ok(json!({
            "added": added,
            "removed": removed,
            "changed": changed,
            "warning": warnings,
        }))
    }

    /// Best effort: bad tokens, locked volumes and failed removals are
    /// skipped, and `removed` lists exactly what is gone.
    #[tracing::instrument(skip(self, p), name = "cmd.rm")]
    pub(crate) async fn rm(&self, p: &Params) -> ConnectorResult<Value> {
        let mut removed = Vec::new();
        for token in p.list("targets") {
            let Some(target) = self.mounts().decode(token) else {
                warn!(token, "rm skipped invalid target");
                continue;
            };
            let result = match target.volume.check_unlocked(&target.relative) {
                Ok(()) => self.remove_tree(&target).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    self.forget_thumbnail(token).await;
                    removed.push(token.to_string());
                }
                Err(e) => warn!(token, "rm failed: {e}"),
            }
        }
        Ok(json!({ "removed": removed }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.put")]
    pub(crate) async fn put(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let token = target.token();
        target.volume.check_writable().at(&token)?;

        let content = p.get("content").unwrap_or_default();
        let data = match p.get("encoding") {
            Some("scheme") => decode_data_url(content)?,
            _ => content.as_bytes().to_vec(),
        };
        self.write_file(&target, &data).await.at(&token)?;
        self.refresh_thumbnail(&target).await;
        Ok(json!({ "changed": [self.file_info(&target).await?] }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.get")]
    pub(crate) async fn get(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let data = self.read_file(&target).await.at(&target.token())?;
        Ok(json!({ "content": String::from_utf8_lossy(&data) }))
    }
}
