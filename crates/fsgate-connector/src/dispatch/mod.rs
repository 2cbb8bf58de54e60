//! Command dispatcher.
//!
//! Every protocol verb is a method on [`Gateway`] implemented purely over
//! the mount table and the driver contract. The transport hands in a
//! [`Request`] and gets back a [`Response`]; errors never escape as Rust
//! errors, they become the `{"error": [...]}` JSON body.

mod archive;
mod edit;
mod imaging;
mod info;
mod mount;
mod navigate;
pub mod params;
mod transfer;
mod walk;

pub use info::{Archivers, FileInfo, RootOptions};
pub use params::Params;

use serde_json::Value;
use std::str::FromStr;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::gateway::Gateway;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// A command as delivered by the transport.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub cmd: String,
    pub params: Params,
    pub uploads: Vec<Upload>,
    /// Raw `Range` header, for `file`.
    pub range: Option<String>,
}

impl Request {
    pub fn new(cmd: impl Into<String>, params: Params) -> Self {
        Self {
            cmd: cmd.into(),
            params,
            ..Default::default()
        }
    }

    pub fn with_uploads(mut self, uploads: Vec<Upload>) -> Self {
        self.uploads = uploads;
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }
}

/// What goes back over the transport.
#[derive(Debug, Clone)]
pub enum Response {
    Json(Value),
    File {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

impl Response {
    pub fn json(&self) -> Option<&Value> {
        match self {
            Response::Json(value) => Some(value),
            Response::File { .. } => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            Response::File { headers, .. } => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            Response::Json(_) => None,
        }
    }
}

/// Protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Open,
    Ls,
    Tree,
    Parents,
    Info,
    Mkdir,
    Mkfile,
    Rename,
    Duplicate,
    Paste,
    Rm,
    Upload,
    Put,
    Get,
    File,
    Tmb,
    Dim,
    Resize,
    Archive,
    Zipdl,
    Search,
    Size,
    Netmount,
}

impl Gateway {
    /// Run one command. Failures come back as an error body.
    pub async fn dispatch(&self, request: Request) -> Response {
        let cmd = request.cmd.clone();
        match self.run(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(cmd = %cmd, kind = e.kind(), "command failed: {e}");
                Response::Json(e.to_json())
            }
        }
    }

    /// A volume named by `target`, `dst` or `targets[]` has the command
    /// switched off. Tokens that do not decode are left to the command.
    fn volume_refuses(&self, request: &Request) -> bool {
        let p = &request.params;
        ["target", "dst"]
            .into_iter()
            .filter_map(|key| p.get(key))
            .chain(p.list("targets"))
            .filter_map(|token| self.mounts().decode(token))
            .any(|target| target.volume.meta.is_disabled(&request.cmd))
    }

    async fn run(&self, request: Request) -> ConnectorResult<Response> {
        let command = Command::from_str(&request.cmd)
            .map_err(|_| ConnectorError::UnknownCmd(request.cmd.clone()))?;
        if self.config().is_disabled(&request.cmd) || self.volume_refuses(&request) {
            return Err(ConnectorError::Disabled(request.cmd));
        }
        debug!(%command, "dispatch");

        let p = &request.params;
        let value = match command {
            Command::Open => self.open(p).await?,
            Command::Ls => self.ls(p).await?,
            Command::Tree => self.tree(p).await?,
            Command::Parents => self.parents(p).await?,
            Command::Info => self.info(p).await?,
            Command::Mkdir => self.mkdir(p).await?,
            Command::Mkfile => self.mkfile(p).await?,
            Command::Rename => self.rename(p).await?,
            Command::Duplicate => self.duplicate(p).await?,
            Command::Paste => self.paste(p).await?,
            Command::Rm => self.rm(p).await?,
            Command::Upload => self.upload(p, &request.uploads).await?,
            Command::Put => self.put(p).await?,
            Command::Get => self.get(p).await?,
            Command::File => return self.file(p, request.range.as_deref()).await,
            Command::Tmb => self.tmb(p).await?,
            Command::Dim => self.dim(p).await?,
            Command::Resize => self.resize(p).await?,
            Command::Archive => self.archive(p).await?,
            Command::Zipdl => return self.zipdl(p).await,
            Command::Search => self.search(p).await?,
            Command::Size => self.size(p).await?,
            Command::Netmount => self.netmount(p).await?,
        };
        Ok(Response::Json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Command::from_str("zipdl").unwrap(), Command::Zipdl);
        assert_eq!(Command::from_str("netmount").unwrap(), Command::Netmount);
        assert!(Command::from_str("chmod").is_err());
        assert_eq!(Command::Mkfile.to_string(), "mkfile");
    }
}
