//! File info records sent to the client.

use fsgate_kernel::vfs::{DirEntry, FileAttr, Target, Volume};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::{DEFAULT_ARCHIVE_NAME, ZIP_MIME};
use crate::error::{ConnectorResult, ResultExt};
use crate::gateway::Gateway;
use crate::media::{is_image, mime_for};

/// Marker sent in `tmb` when a thumbnail can be generated but is not cached.
const TMB_PENDING: &str = "1";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
    /// Parent token. Absent for a volume root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
    pub mime: String,
    pub ts: u64,
    pub size: u64,
    pub read: u8,
    pub write: u8,
    pub locked: u8,
    #[serde(rename = "isdir")]
    pub is_dir: u8,
    pub dirs: u8,
    #[serde(rename = "volumeid")]
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmb: Option<String>,
    #[serde(rename = "isroot", skip_serializing_if = "Option::is_none")]
    pub is_root: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<RootOptions>,
    #[serde(rename = "netkey", skip_serializing_if = "Option::is_none")]
    pub net_key: Option<String>,
}

/// Per-volume options carried on root entries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RootOptions {
    pub disabled: Vec<String>,
    pub archivers: Archivers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub csscls: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Archivers {
    pub create: Vec<String>,
    pub extract: Vec<String>,
    pub createext: BTreeMap<String, String>,
}

impl Default for Archivers {
    fn default() -> Self {
        let ext = DEFAULT_ARCHIVE_NAME
            .rsplit('.')
            .next()
            .unwrap_or("zip")
            .to_string();
        Self {
            create: vec![ZIP_MIME.to_string()],
            extract: Vec::new(),
            createext: BTreeMap::from([(ZIP_MIME.to_string(), ext)]),
        }
    }
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.is_dir == 1
    }
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

impl Gateway {
    /// Stat a target and describe it.
    pub(crate) async fn file_info(&self, target: &Target) -> ConnectorResult<FileInfo> {
        let attr = target
            .volume
            .driver
            .stat(&target.relative)
            .await
            .at(&target.token())?;
        Ok(self.describe(target, &attr).await)
    }

    /// Build the info record for a target whose attributes are known.
    pub(crate) async fn describe(&self, target: &Target, attr: &FileAttr) -> FileInfo {
        let token = target.token();
        let volume = &target.volume;
        let name = target.name();
        let is_dir = attr.is_dir();

        let dirs = is_dir && self.has_subdirs(target).await;
        let mime = if is_dir {
            "directory".to_string()
        } else {
            mime_for(&name)
        };
        let tmb = if !is_dir && is_image(&name) {
            Some(self.thumbnail_ref(&token).await)
        } else {
            None
        };

        let mut info = FileInfo {
            name,
            phash: target.parent().map(|p| p.token()),
            hash: token,
            mime,
            ts: attr.mtime_secs(),
            size: if is_dir { 0 } else { attr.size },
            read: flag(volume.permissions.read),
            write: flag(volume.writable()),
            locked: flag(volume.permissions.locked),
            is_dir: flag(is_dir),
            dirs: flag(dirs),
            volume_id: format!("v{}_", target.index),
            tmb,
            is_root: None,
            options: None,
            net_key: None,
        };
        if target.is_root() {
            info.is_root = Some(1);
            info.options = Some(self.root_options(volume));
            info.net_key = volume.meta.network.then(|| volume.mount_key.clone());
        }
        info
    }

    fn root_options(&self, volume: &Volume) -> RootOptions {
        let mut disabled = self.config().disabled.clone();
        for cmd in &volume.meta.disabled {
            if !disabled.contains(cmd) {
                disabled.push(cmd.clone());
            }
        }
        RootOptions {
            disabled,
            archivers: Archivers::default(),
            url: volume.meta.url.clone(),
            csscls: volume.meta.icon.clone().unwrap_or_default(),
        }
    }

    async fn has_subdirs(&self, target: &Target) -> bool {
        match target.volume.driver.readdir(&target.relative).await {
            Ok(entries) => entries.iter().any(|e| e.kind.is_dir()),
            Err(_) => false,
        }
    }

    /// `{token}.png` when the thumbnail is cached, the pending marker otherwise.
    async fn thumbnail_ref(&self, token: &str) -> String {
        let file = format!("{token}.png");
        match self.thumbnail_dir() {
            Some(dir) => {
                let cached = dir.child(&file);
                if cached.volume.driver.exists(&cached.relative).await {
                    file
                } else {
                    TMB_PENDING.to_string()
                }
            }
            None => TMB_PENDING.to_string(),
        }
    }

    /// Describe listing entries, stat-ing only those without attributes.
    ///
    /// Entries that vanish between readdir and stat are dropped.
    pub(crate) async fn describe_entries(
        &self,
        dir: &Target,
        entries: Vec<DirEntry>,
    ) -> Vec<FileInfo> {
        stream::iter(entries)
            .map(|entry| async move {
                let child = dir.child(&entry.name);
                let attr = match entry.attr {
                    Some(attr) => attr,
                    None => match child.volume.driver.stat(&child.relative).await {
                        Ok(attr) => attr,
                        Err(e) => {
                            debug!(path = %child.absolute(), "skipping entry: {e}");
                            return None;
                        }
                    },
                };
                Some(self.describe(&child, &attr).await)
            })
            .buffered(self.config().fan_out)
            .filter_map(|info| async move { info })
            .collect()
            .await
    }

    /// Info for every entry of a directory.
    pub(crate) async fn list_infos(&self, dir: &Target) -> ConnectorResult<Vec<FileInfo>> {
        let entries = dir
            .volume
            .driver
            .readdir(&dir.relative)
            .await
            .at(&dir.token())?;
        Ok(self.describe_entries(dir, entries).await)
    }

    /// One root entry per volume, for `open` and `parents`.
    ///
    /// A root that cannot be stat-ed is still listed so the client can
    /// unmount it.
    pub(crate) async fn root_infos(&self) -> Vec<FileInfo> {
        let roots = self.mounts().roots();
        stream::iter(roots)
            .map(|root| async move {
                let attr = match root.volume.driver.stat("").await {
                    Ok(attr) => attr,
                    Err(e) => {
                        debug!(root = %root.volume.root, "root stat failed: {e}");
                        FileAttr::directory(0o755)
                    }
                };
                let mut info = self.describe(&root, &attr).await;
                info.phash = Some(String::new());
                info
            })
            .buffered(self.config().fan_out)
            .collect()
            .await
    }
}
