//! Remote filesystem service boundary.
//!
//! A remote volume talks to a service exposing named methods that take
//! JSON keyword arguments. The transport only moves JSON; the driver owns
//! the method contract.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::types::FileAttr;

/// Methods every remote filesystem service must expose.
pub const REQUIRED_METHODS: &[&str] = &[
    "stat", "readdir", "mkdir", "unlink", "rmdir", "rename", "read", "write",
];

/// Bulk listing returning names and stats in one round trip.
pub const BULK_LISTING_METHOD: &str = "readdirwithstats";

pub const EXISTS_METHOD: &str = "exists";

/// Moves calls to a remote filesystem service.
#[async_trait]
pub trait ServiceTransport: Send + Sync {
    /// Names of the methods the service advertises.
    async fn describe(&self) -> VfsResult<Vec<String>>;

    /// Invoke `method` with keyword arguments.
    async fn call(&self, method: &str, kwargs: Value) -> VfsResult<Value>;
}

/// Optional methods found during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub bulk_listing: bool,
    pub exists: bool,
}

impl Capabilities {
    /// Check the advertised method set against the required core.
    pub fn negotiate(methods: &[String]) -> VfsResult<Self> {
        let has = |name: &str| methods.iter().any(|m| m == name);
        let missing: Vec<&str> = REQUIRED_METHODS
            .iter()
            .copied()
            .filter(|m| !has(m))
            .collect();
        if !missing.is_empty() {
            return Err(VfsError::unavailable(format!(
                "service lacks required methods: {}",
                missing.join(", ")
            )));
        }
        Ok(Self {
            bulk_listing: has(BULK_LISTING_METHOD),
            exists: has(EXISTS_METHOD),
        })
    }
}

/// Stat record as the service reports it. `mtime` is unix milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStat {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: Option<f64>,
    #[serde(rename = "isDirectory", default)]
    pub is_directory: bool,
    #[serde(default)]
    pub mode: Option<u32>,
}

impl RemoteStat {
    pub fn into_attr(self) -> FileAttr {
        let attr = if self.is_directory {
            FileAttr::directory(self.mode.unwrap_or(0o755))
        } else {
            FileAttr::file(self.size, self.mode.unwrap_or(0o644))
        };
        match self.mtime {
            Some(ms) if ms >= 0.0 => attr.with_mtime_ms(ms as u64),
            _ => attr,
        }
    }
}

/// Map an error message from the service onto a VFS error.
pub fn map_remote_error(path: &str, message: &str) -> VfsError {
    if message.contains("ENOENT") || message.contains("No such file") {
        VfsError::not_found(path)
    } else if message.contains("EEXIST") || message.contains("exists") {
        VfsError::already_exists(path)
    } else if message.contains("EACCES") || message.contains("EPERM") || message.contains("Permission denied") {
        VfsError::permission_denied(path)
    } else if message.contains("ENOTEMPTY") {
        VfsError::directory_not_empty(path)
    } else {
        VfsError::backend(format!("{path}: {message}"))
    }
}

/// Return the service's error string if the result carries one.
pub fn result_error(value: &Value) -> Option<&str> {
    value.as_object()?.get("error")?.as_str()
}

/// Service reached over HTTP.
///
/// Methods are invoked as `POST {service_url}/{method}` with the kwargs as
/// the JSON body. `GET {service_url}` returns the service description.
#[derive(Debug, Clone)]
pub struct HttpServiceTransport {
    client: reqwest::Client,
    service_url: Url,
    token: Option<String>,
}

/// Description keys that are not callable methods.
const DESCRIPTION_FIELDS: &[&str] = &["id", "name", "type", "config", "description", "docs"];

impl HttpServiceTransport {
    /// `service_url` looks like `https://server/{workspace}/services/{service}`.
    pub fn new(service_url: &str, token: Option<String>) -> VfsResult<Self> {
        let service_url = Url::parse(service_url.trim_end_matches('/'))
            .map_err(|e| VfsError::invalid_path(format!("{service_url}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            service_url,
            token,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.service_url.as_str().trim_end_matches('/'))
    }
}

fn http_error(e: reqwest::Error) -> VfsError {
    VfsError::unavailable(e.to_string())
}

#[async_trait]
impl ServiceTransport for HttpServiceTransport {
    async fn describe(&self) -> VfsResult<Vec<String>> {
        let response = self
            .request(self.client.get(self.service_url.clone()))
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?;
        let description: Value = response.json().await.map_err(http_error)?;

        let methods = match description.get("methods").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(|m| m.as_str().map(str::to_string))
                .collect(),
            None => description
                .as_object()
                .map(|obj| {
                    obj.keys()
                        .filter(|k| !DESCRIPTION_FIELDS.contains(&k.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        };
        debug!(service = %self.service_url, ?methods, "described remote service");
        Ok(methods)
    }

    async fn call(&self, method: &str, kwargs: Value) -> VfsResult<Value> {
        let response = self
            .request(self.client.post(self.method_url(method)))
            .json(&kwargs)
            .send()
            .await
            .map_err(|e| VfsError::backend(format!("{method}: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::Object(Map::new()));
        if !status.is_success() && result_error(&body).is_none() {
            return Err(VfsError::backend(format!("{method}: HTTP {status}")));
        }
        Ok(body)
    }
}
