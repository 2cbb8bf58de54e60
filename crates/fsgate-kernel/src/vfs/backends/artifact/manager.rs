//! Artifact manager service boundary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;
use url::Url;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::types::FileAttr;

/// Artifact metadata as returned by `read` and `list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactInfo {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl ArtifactInfo {
    pub fn is_collection(&self) -> bool {
        self.kind.as_deref() == Some("collection")
    }

    /// Name shown as a directory when listed inside a collection.
    pub fn display_name(&self) -> &str {
        match &self.alias {
            Some(alias) if !alias.is_empty() => alias,
            _ => self.id.rsplit('/').next().unwrap_or(&self.id),
        }
    }
}

/// One entry of a `list_files` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactFileInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub size: u64,
    /// Unix seconds.
    #[serde(default)]
    pub last_modified: Option<f64>,
}

impl ArtifactFileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind.as_deref() == Some("directory")
    }

    pub fn into_attr(self) -> FileAttr {
        let attr = if self.is_dir() {
            FileAttr::directory(0o755)
        } else {
            FileAttr::file(self.size, 0o644)
        };
        match self.last_modified {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                attr.with_mtime(UNIX_EPOCH + Duration::from_secs_f64(secs))
            }
            _ => attr,
        }
    }
}

/// Versioned content store.
///
/// Mutations (`put_file`, `remove_file`) are only accepted while the
/// artifact is staged; `commit` publishes them as a new version.
#[async_trait]
pub trait ArtifactManager: Send + Sync {
    async fn read(&self, artifact_id: &str) -> VfsResult<ArtifactInfo>;

    /// Child artifacts of a collection.
    async fn children(&self, collection_id: &str) -> VfsResult<Vec<ArtifactInfo>>;

    /// Entries directly inside `dir` (empty for the artifact root).
    async fn list_files(&self, artifact_id: &str, dir: &str) -> VfsResult<Vec<ArtifactFileInfo>>;

    /// Download URL for a committed file.
    async fn get_file(&self, artifact_id: &str, path: &str) -> VfsResult<String>;

    /// Upload URL for a file in the staged version.
    async fn put_file(&self, artifact_id: &str, path: &str) -> VfsResult<String>;

    async fn stage(&self, artifact_id: &str) -> VfsResult<()>;

    async fn commit(&self, artifact_id: &str) -> VfsResult<()>;

    async fn remove_file(&self, artifact_id: &str, path: &str) -> VfsResult<()>;
}

/// Moves bytes to and from the URLs an [`ArtifactManager`] hands out.
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    async fn get(&self, url: &str) -> VfsResult<Vec<u8>>;
    async fn put(&self, url: &str, data: Vec<u8>) -> VfsResult<()>;
}

/// Artifact manager reached over HTTP.
///
/// Functions are invoked as
/// `POST {server}/public/services/artifact-manager/{function}` with the
/// keyword arguments as a JSON body.
#[derive(Debug, Clone)]
pub struct HttpArtifactManager {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpArtifactManager {
    pub fn new(server_url: &str, token: Option<String>) -> VfsResult<Self> {
        let server = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| VfsError::invalid_path(format!("{server_url}: {e}")))?;
        let base = server
            .join("/public/services/artifact-manager/")
            .map_err(|e| VfsError::invalid_path(format!("{server_url}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token,
        })
    }

    fn function_url(&self, function: &str) -> String {
        format!("{}{function}", self.base)
    }

    async fn call(&self, function: &str, kwargs: Value) -> VfsResult<Value> {
        let mut request = self.client.post(self.function_url(function)).json(&kwargs);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| VfsError::unavailable(format!("{function}: {e}")))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        debug!(function, %status, "artifact manager call");
        if status.is_success() {
            return Ok(body);
        }

        let detail = body
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        let context = kwargs
            .get("file_path")
            .or_else(|| kwargs.get("artifact_id"))
            .and_then(Value::as_str)
            .unwrap_or(function);
        Err(match status.as_u16() {
            404 => VfsError::not_found(context),
            401 | 403 => VfsError::permission_denied(context),
            _ => VfsError::backend(format!("{function}: HTTP {status}: {detail}")),
        })
    }

    fn url_result(function: &str, value: Value) -> VfsResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VfsError::backend(format!("{function}: expected a URL, got {value}")))
    }
}

fn decode<T: serde::de::DeserializeOwned>(function: &str, value: Value) -> VfsResult<T> {
    serde_json::from_value(value).map_err(|e| VfsError::backend(format!("{function}: {e}")))
}

#[async_trait]
impl ArtifactManager for HttpArtifactManager {
    async fn read(&self, artifact_id: &str) -> VfsResult<ArtifactInfo> {
        let value = self.call("read", json!({ "artifact_id": artifact_id })).await?;
        decode("read", value)
    }

    async fn children(&self, collection_id: &str) -> VfsResult<Vec<ArtifactInfo>> {
        let value = self.call("list", json!({ "parent_id": collection_id })).await?;
        decode("list", value)
    }

    async fn list_files(&self, artifact_id: &str, dir: &str) -> VfsResult<Vec<ArtifactFileInfo>> {
        let mut kwargs = json!({ "artifact_id": artifact_id });
        if !dir.is_empty() {
            kwargs["dir_path"] = Value::String(dir.to_string());
        }
        let value = self.call("list_files", kwargs).await?;
        decode("list_files", value)
    }

    async fn get_file(&self, artifact_id: &str, path: &str) -> VfsResult<String> {
        let value = self
            .call("get_file", json!({ "artifact_id": artifact_id, "file_path": path }))
            .await?;
        Self::url_result("get_file", value)
    }

    async fn put_file(&self, artifact_id: &str, path: &str) -> VfsResult<String> {
        let value = self
            .call("put_file", json!({ "artifact_id": artifact_id, "file_path": path }))
            .await?;
        Self::url_result("put_file", value)
    }

    async fn stage(&self, artifact_id: &str) -> VfsResult<()> {
        self.call("edit", json!({ "artifact_id": artifact_id, "stage": true }))
            .await
            .map(|_| ())
    }

    async fn commit(&self, artifact_id: &str) -> VfsResult<()> {
        self.call("commit", json!({ "artifact_id": artifact_id }))
            .await
            .map(|_| ())
    }

    async fn remove_file(&self, artifact_id: &str, path: &str) -> VfsResult<()> {
        self.call("remove_file", json!({ "artifact_id": artifact_id, "file_path": path }))
            .await
            .map(|_| ())
    }
}

/// Plain HTTP GET/PUT of presigned URLs.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransfer {
    client: reqwest::Client,
}

impl ReqwestTransfer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobTransfer for ReqwestTransfer {
    async fn get(&self, url: &str) -> VfsResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VfsError::backend(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VfsError::not_found(url));
        }
        let response = response
            .error_for_status()
            .map_err(|e| VfsError::backend(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VfsError::backend(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, url: &str, data: Vec<u8>) -> VfsResult<()> {
        self.client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| VfsError::backend(format!("upload failed: {e}")))
    }
}
