//! fsgate connector: the file-manager command protocol over fsgate volumes.
//!
//! A [`Gateway`] owns a mount table built from a [`GatewayConfig`] and
//! answers [`Request`]s with [`Response`]s. Network volumes are added at
//! runtime through the `netmount` command.

pub mod config;
pub mod constants;
pub mod dispatch;
mod error;
mod gateway;
pub mod media;
pub mod netmount;

pub use config::GatewayConfig;
pub use dispatch::{Command, FileInfo, Params, Request, Response, Upload};
pub use error::{ConnectorError, ConnectorResult, ResultExt};
pub use gateway::Gateway;
