//! In-process artifact manager for tests.
//!
//! Implements both [`ArtifactManager`] and [`BlobTransfer`]. Upload URLs
//! write into a pending area that the next `commit` publishes, so reads
//! only ever see committed versions.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::manager::{ArtifactFileInfo, ArtifactInfo, ArtifactManager, BlobTransfer};
use crate::vfs::error::{VfsError, VfsResult};

const URL_SCHEME: &str = "mock://";

#[derive(Debug, Default)]
struct MockArtifact {
    alias: Option<String>,
    kind: Option<String>,
    parent: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
    staged: bool,
    uploads: BTreeMap<String, Vec<u8>>,
    removals: BTreeSet<String>,
}

#[derive(Default)]
pub struct MockArtifactStore {
    artifacts: Mutex<HashMap<String, MockArtifact>>,
    calls: DashMap<&'static str, usize>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_artifact(&self, id: &str, alias: Option<&str>, kind: &str, parent: Option<&str>) {
        self.artifacts.lock().insert(
            id.to_string(),
            MockArtifact {
                alias: alias.map(str::to_string),
                kind: Some(kind.to_string()),
                parent: parent.map(str::to_string),
                ..Default::default()
            },
        );
    }

    /// Add a committed file.
    pub fn add_file(&self, id: &str, path: &str, data: &[u8]) {
        if let Some(artifact) = self.artifacts.lock().get_mut(id) {
            artifact.files.insert(path.to_string(), data.to_vec());
        }
    }

    /// Committed content of a file.
    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.artifacts.lock().get(id)?.files.get(path).cloned()
    }

    pub fn is_staged(&self, id: &str) -> bool {
        self.artifacts.lock().get(id).is_some_and(|a| a.staged)
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    fn count(&self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn url(id: &str, path: &str) -> String {
        format!("{URL_SCHEME}{id}?{path}")
    }

    fn parse_url(url: &str) -> VfsResult<(String, String)> {
        url.strip_prefix(URL_SCHEME)
            .and_then(|rest| rest.split_once('?'))
            .map(|(id, path)| (id.to_string(), path.to_string()))
            .ok_or_else(|| VfsError::backend(format!("bad url {url}")))
    }

    fn with_artifact<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut MockArtifact) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let mut artifacts = self.artifacts.lock();
        let artifact = artifacts
            .get_mut(id)
            .ok_or_else(|| VfsError::not_found(id))?;
        f(artifact)
    }
}

#[async_trait]
impl ArtifactManager for MockArtifactStore {
    async fn read(&self, artifact_id: &str) -> VfsResult<ArtifactInfo> {
        self.count("read");
        self.with_artifact(artifact_id, |a| {
            Ok(ArtifactInfo {
                id: artifact_id.to_string(),
                alias: a.alias.clone(),
                kind: a.kind.clone(),
            })
        })
    }

    async fn children(&self, collection_id: &str) -> VfsResult<Vec<ArtifactInfo>> {
        self.count("children");
        let artifacts = self.artifacts.lock();
        let mut children: Vec<ArtifactInfo> = artifacts
            .iter()
            .filter(|(_, a)| a.parent.as_deref() == Some(collection_id))
            .map(|(id, a)| ArtifactInfo {
                id: id.clone(),
                alias: a.alias.clone(),
                kind: a.kind.clone(),
            })
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn list_files(&self, artifact_id: &str, dir: &str) -> VfsResult<Vec<ArtifactFileInfo>> {
        self.count("list_files");
        self.with_artifact(artifact_id, |a| {
            let prefix = if dir.is_empty() {
                String::new()
            } else {
                format!("{dir}/")
            };
            let mut entries: BTreeMap<String, ArtifactFileInfo> = BTreeMap::new();
            for (path, data) in a.files.range(prefix.clone()..) {
                let Some(rest) = path.strip_prefix(&prefix) else {
                    break;
                };
                let entry = match rest.split_once('/') {
                    Some((sub, _)) => ArtifactFileInfo {
                        name: sub.to_string(),
                        kind: Some("directory".into()),
                        size: 0,
                        last_modified: None,
                    },
                    None => ArtifactFileInfo {
                        name: rest.to_string(),
                        kind: Some("file".into()),
                        size: data.len() as u64,
                        last_modified: Some(1_700_000_000.0),
                    },
                };
                entries.insert(entry.name.clone(), entry);
            }
            if entries.is_empty() && !dir.is_empty() {
                return Err(VfsError::not_found(dir));
            }
            Ok(entries.into_values().collect())
        })
    }

    async fn get_file(&self, artifact_id: &str, path: &str) -> VfsResult<String> {
        self.count("get_file");
        self.with_artifact(artifact_id, |a| {
            if a.files.contains_key(path) {
                Ok(Self::url(artifact_id, path))
            } else {
                Err(VfsError::not_found(path))
            }
        })
    }

    async fn put_file(&self, artifact_id: &str, path: &str) -> VfsResult<String> {
        self.count("put_file");
        self.with_artifact(artifact_id, |a| {
            if a.staged {
                Ok(Self::url(artifact_id, path))
            } else {
                Err(VfsError::backend(format!("{artifact_id} is not staged")))
            }
        })
    }

    async fn stage(&self, artifact_id: &str) -> VfsResult<()> {
        self.count("stage");
        self.with_artifact(artifact_id, |a| {
            a.staged = true;
            Ok(())
        })
    }

    async fn commit(&self, artifact_id: &str) -> VfsResult<()> {
        self.count("commit");
        self.with_artifact(artifact_id, |a| {
            if !a.staged {
                return Err(VfsError::backend(format!("{artifact_id} is not staged")));
            }
            for path in std::mem::take(&mut a.removals) {
                a.files.remove(&path);
            }
            let uploads = std::mem::take(&mut a.uploads);
            a.files.extend(uploads);
            a.staged = false;
            Ok(())
        })
    }

    async fn remove_file(&self, artifact_id: &str, path: &str) -> VfsResult<()> {
        self.count("remove_file");
        self.with_artifact(artifact_id, |a| {
            if !a.staged {
                return Err(VfsError::backend(format!("{artifact_id} is not staged")));
            }
            if !a.files.contains_key(path) {
                return Err(VfsError::not_found(path));
            }
            a.removals.insert(path.to_string());
            Ok(())
        })
    }
}

#[async_trait]
impl BlobTransfer for MockArtifactStore {
    async fn get(&self, url: &str) -> VfsResult<Vec<u8>> {
        self.count("get");
        let (id, path) = Self::parse_url(url)?;
        self.file(&id, &path).ok_or_else(|| VfsError::not_found(path))
    }

    async fn put(&self, url: &str, data: Vec<u8>) -> VfsResult<()> {
        self.count("put");
        let (id, path) = Self::parse_url(url)?;
        self.with_artifact(&id, |a| {
            a.uploads.insert(path, data);
            Ok(())
        })
    }
}
