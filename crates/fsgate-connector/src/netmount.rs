//! Network mount requests.
//!
//! The `host` of a mount request decides the backend:
//!
//! - `s3://key:secret@http(s)://endpoint/bucket/prefix` mounts an object store
//! - `http(s)://server/{workspace}/services/{service}` mounts a remote
//!   filesystem service
//! - `http(s)://server/{workspace}/artifacts/{alias}` mounts an artifact,
//!   read-only unless a token is supplied

use fsgate_kernel::vfs::backends::artifact::{ArtifactDriver, HttpArtifactManager, ReqwestTransfer};
use fsgate_kernel::vfs::backends::object::{ObjectDriver, S3Config, S3ObjectStore};
use fsgate_kernel::vfs::backends::remote::{HttpServiceTransport, RemoteDriver};
use fsgate_kernel::vfs::{Driver, Permissions, VolumeMeta, normalize_path};
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::config::GatewayConfig;
use crate::constants::ICON_NETWORK;
use crate::dispatch::Params;
use crate::error::{ConnectorError, ConnectorResult};

/// Parameters of a `netmount` command.
#[derive(Debug, Clone, Default)]
pub struct MountRequest {
    pub host: String,
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub token: Option<String>,
}

impl MountRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn from_params(p: &Params) -> ConnectorResult<Self> {
        let owned = |key: &str| p.get(key).map(str::to_string);
        Ok(Self {
            host: p.require("host")?.trim().to_string(),
            name: owned("name"),
            prefix: owned("prefix"),
            user: owned("user"),
            pass: owned("pass"),
            token: owned("token"),
        })
    }
}

/// What a mount request points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    S3 {
        config: S3Config,
        /// Key prefix inside the bucket, without slashes at either end.
        prefix: String,
    },
    Service {
        service_url: String,
        workspace: String,
        service: String,
    },
    Artifact {
        server_url: String,
        workspace: String,
        alias: String,
    },
}

/// Strip characters that cannot appear in a volume name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn invalid(host: &str) -> ConnectorError {
    ConnectorError::params(format!("host: invalid file system URI {host}"))
}

impl MountSpec {
    pub fn parse(request: &MountRequest) -> ConnectorResult<Self> {
        let host = request.host.as_str();
        if let Some(rest) = host.strip_prefix("s3://") {
            return Self::parse_s3(request, rest);
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            let url = Url::parse(host).map_err(|_| invalid(host))?;
            let origin = url.origin().ascii_serialization();
            let path = url.path();
            if let Some((workspace, service)) = path.split_once("/services/") {
                let workspace = workspace.replace('/', "");
                let service = service.replace('/', "");
                if workspace.is_empty() || service.is_empty() {
                    return Err(invalid(host));
                }
                return Ok(Self::Service {
                    service_url: format!("{origin}/{workspace}/services/{service}"),
                    workspace,
                    service,
                });
            }
            if let Some((workspace, alias)) = path.split_once("/artifacts/") {
                let workspace = workspace.trim_start_matches('/').to_string();
                let alias = alias.trim_end_matches('/').to_string();
                if workspace.is_empty() || alias.is_empty() || alias.contains('/') {
                    return Err(invalid(host));
                }
                return Ok(Self::Artifact {
                    server_url: origin,
                    workspace,
                    alias,
                });
            }
        }
        Err(invalid(host))
    }

    fn parse_s3(request: &MountRequest, rest: &str) -> ConnectorResult<Self> {
        let host = request.host.as_str();
        let (access_key, secret_key, location) = match rest.split_once('@') {
            Some((creds, location)) => {
                let (key, secret) = creds.split_once(':').ok_or_else(|| invalid(host))?;
                (key.to_string(), secret.to_string(), location)
            }
            None => match (&request.user, &request.pass) {
                (Some(user), Some(pass)) => (user.clone(), pass.clone(), rest),
                _ => return Err(invalid(host)),
            },
        };
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(invalid(host));
        }

        let scheme_end = location.find("://").ok_or_else(|| invalid(host))? + 3;
        if !location.starts_with("http://") && !location.starts_with("https://") {
            return Err(invalid(host));
        }
        let host_end = location[scheme_end..]
            .find('/')
            .map(|i| scheme_end + i)
            .ok_or_else(|| invalid(host))?;
        let endpoint = &location[..host_end];
        let (bucket, key_prefix) = location[host_end + 1..]
            .split_once('/')
            .unwrap_or((&location[host_end + 1..], ""));
        if bucket.is_empty() || host_end == scheme_end {
            return Err(invalid(host));
        }

        let combined = match &request.prefix {
            Some(extra) => format!("{key_prefix}/{extra}"),
            None => key_prefix.to_string(),
        };
        let prefix = normalize_path(&combined).ok_or_else(|| invalid(host))?;

        Ok(Self::S3 {
            config: S3Config {
                endpoint: endpoint.to_string(),
                region: String::new(),
                bucket: bucket.to_string(),
                access_key,
                secret_key,
            },
            prefix,
        })
    }

    /// Backend kind, also the prefix of the volume's mount key.
    pub fn kind(&self) -> &'static str {
        match self {
            MountSpec::S3 { .. } => "s3",
            MountSpec::Service { .. } => "hyphafs",
            MountSpec::Artifact { .. } => "hypha_artifacts",
        }
    }

    /// Mount root chosen when the request has no `name`.
    pub fn default_root(&self) -> String {
        match self {
            MountSpec::S3 { config, prefix } => {
                let top = prefix.rsplit('/').find(|p| !p.is_empty()).unwrap_or(config.bucket.as_str());
                format!("/{}", sanitize_name(top))
            }
            MountSpec::Service {
                workspace, service, ..
            } => format!("/{workspace}:{service}"),
            MountSpec::Artifact {
                workspace, alias, ..
            } => format!("/{workspace}:{alias}"),
        }
    }

    /// Location shown to the client. Never carries credentials.
    pub fn display_url(&self) -> String {
        match self {
            MountSpec::S3 { config, prefix } => {
                format!("{}/{}/{prefix}", config.endpoint, config.bucket)
            }
            MountSpec::Service { service_url, .. } => service_url.clone(),
            MountSpec::Artifact {
                server_url,
                workspace,
                alias,
            } => format!("{server_url}/{workspace}/artifacts/{alias}"),
        }
    }
}

/// A connected backend ready to be placed in the mount table.
pub struct Connected {
    pub root: String,
    pub permissions: Permissions,
    pub driver: Arc<dyn Driver>,
    pub meta: VolumeMeta,
}

/// Parse the request and connect its backend, self-test included.
///
/// Nothing is mounted here; a failure leaves no trace.
pub async fn connect(request: &MountRequest, config: &GatewayConfig) -> ConnectorResult<Connected> {
    let spec = MountSpec::parse(request)?;
    let token = request.token.clone();

    let (driver, permissions): (Arc<dyn Driver>, Permissions) = match &spec {
        MountSpec::S3 { config: s3, prefix } => {
            let store = Arc::new(S3ObjectStore::new(s3.clone())?);
            let driver = ObjectDriver::connect(store, prefix, false).await?;
            (Arc::new(driver), Permissions::read_write())
        }
        MountSpec::Service { service_url, .. } => {
            let transport = Arc::new(HttpServiceTransport::new(service_url, token)?);
            let driver = RemoteDriver::connect(transport, config.remote.options()).await?;
            (Arc::new(driver), Permissions::read_write())
        }
        MountSpec::Artifact {
            server_url,
            workspace,
            alias,
        } => {
            let read_only = token.is_none();
            let manager = Arc::new(HttpArtifactManager::new(server_url, token)?);
            let transfer = Arc::new(ReqwestTransfer::new());
            let artifact_id = format!("{workspace}/{alias}");
            let driver = ArtifactDriver::connect(
                manager,
                transfer,
                &artifact_id,
                config.artifact.options(read_only),
            )
            .await?;
            let permissions = if read_only {
                Permissions::read_only()
            } else {
                Permissions::read_write()
            };
            (Arc::new(driver), permissions)
        }
    };

    let root = match request.name.as_deref().map(sanitize_name) {
        Some(name) if !name.is_empty() => format!("/{name}"),
        _ => spec.default_root(),
    };
    info!(kind = spec.kind(), %root, "backend connected");
    Ok(Connected {
        root,
        permissions,
        driver,
        meta: VolumeMeta::new(spec.kind())
            .with_icon(ICON_NETWORK)
            .with_url(spec.display_url())
            .network(),
    })
}
