//! Connector errors and their protocol form.

use fsgate_kernel::VfsError;
use serde_json::{Value, json};
use thiserror::Error;

use crate::media::MediaError;

/// Errors that fail a whole command.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Storage error, with the token of the item it concerns when known.
    #[error("{source}")]
    Vfs {
        #[source]
        source: VfsError,
        token: Option<String>,
    },

    /// Missing or malformed command parameter.
    #[error("bad parameter: {0}")]
    CmdParams(String),

    #[error("unknown command: {0}")]
    UnknownCmd(String),

    /// Command switched off in the gateway config.
    #[error("command disabled: {0}")]
    Disabled(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<VfsError> for ConnectorError {
    fn from(source: VfsError) -> Self {
        ConnectorError::Vfs {
            source,
            token: None,
        }
    }
}

impl ConnectorError {
    pub fn params(msg: impl Into<String>) -> Self {
        Self::CmdParams(msg.into())
    }

    /// Stable kind string for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::Vfs { source, .. } => source.kind().as_str(),
            ConnectorError::CmdParams(_) => "errCmdParams",
            ConnectorError::UnknownCmd(_) => "errUnknownCmd",
            ConnectorError::Disabled(_) => "errPerm",
            ConnectorError::Media(MediaError::Unsupported(_)) => "errUnsupported",
            ConnectorError::Media(_) | ConnectorError::Config(_) => "errIO",
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            ConnectorError::Vfs { token, .. } => token.as_deref(),
            _ => None,
        }
    }

    /// `{"error": [kind, token?], "message": ...}`
    pub fn to_json(&self) -> Value {
        let mut error = vec![Value::from(self.kind())];
        if let Some(token) = self.token() {
            error.push(Value::from(token));
        }
        json!({ "error": error, "message": self.to_string() })
    }
}

/// Attach the offending token to a storage error.
pub trait ResultExt<T> {
    fn at(self, token: &str) -> Result<T, ConnectorError>;
}

impl<T> ResultExt<T> for Result<T, VfsError> {
    fn at(self, token: &str) -> Result<T, ConnectorError> {
        self.map_err(|source| ConnectorError::Vfs {
            source,
            token: Some(token.to_string()),
        })
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_carries_kind_and_token() {
        let err = Err::<(), _>(VfsError::not_found("a.txt")).at("v0_L2EudHh0").unwrap_err();
        let json = err.to_json();
        assert_eq!(json["error"][0], "errNotFound");
        assert_eq!(json["error"][1], "v0_L2EudHh0");
        assert!(json["message"].as_str().unwrap().contains("a.txt"));
    }

    #[test]
    fn test_protocol_kinds() {
        assert_eq!(ConnectorError::params("target").kind(), "errCmdParams");
        assert_eq!(ConnectorError::UnknownCmd("x".into()).kind(), "errUnknownCmd");
        let json = ConnectorError::UnknownCmd("x".into()).to_json();
        assert_eq!(json["error"].as_array().unwrap().len(), 1);
    }
}
