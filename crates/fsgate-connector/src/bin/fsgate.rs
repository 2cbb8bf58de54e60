//! fsgate command-line front end.
//!
//! Usage:
//!   # List the volumes a config mounts
//!   fsgate --config gateway.toml volumes
//!
//!   # Run one command and print the JSON result
//!   fsgate --config gateway.toml exec open init=1
//!   fsgate exec mkdir target=v0_Lw name=docs
//!
//!   # Upload a file, or save a file body
//!   fsgate exec upload target=v0_Lw --upload ./report.txt
//!   fsgate exec file target=v0_L3JlcG9ydC50eHQ --output report.txt

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use fsgate_connector::{Gateway, GatewayConfig, Params, Request, Response, Upload};

/// Virtual filesystem gateway.
#[derive(Parser, Debug)]
#[command(name = "fsgate")]
#[command(about = "One namespace over memory, disk, object-store and remote volumes")]
struct Args {
    /// Gateway config (TOML). Defaults to in-memory /home and /tmp.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run one protocol command.
    Exec {
        /// Command name, e.g. `open`, `ls`, `mkdir`.
        cmd: String,

        /// Parameters as key=value; repeat a key for arrays.
        params: Vec<String>,

        /// File to send as an upload; may repeat.
        #[arg(long)]
        upload: Vec<PathBuf>,

        /// Range header for `file`, e.g. `bytes=0-99`.
        #[arg(long)]
        range: Option<String>,

        /// Where to write a file body instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List mounted volumes.
    Volumes,
}

fn parse_params(pairs: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter {pair:?} is not key=value");
        };
        params.push(key, value);
    }
    Ok(params)
}

async fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        uploads.push(Upload::new(name, data));
    }
    Ok(uploads)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    let gateway = Gateway::new(config).await?;

    match args.command {
        Cmd::Volumes => {
            for root in gateway.mounts().roots() {
                let volume = &root.volume;
                let mode = if volume.writable() { "rw" } else { "ro" };
                println!("{}\t{}\t{}\t{}", root.token(), volume.root, volume.meta.kind, mode);
            }
        }
        Cmd::Exec {
            cmd,
            params,
            upload,
            range,
            output,
        } => {
            let mut request = Request::new(cmd, parse_params(&params)?)
                .with_uploads(read_uploads(&upload).await?);
            if let Some(range) = range {
                request = request.with_range(range);
            }

            match gateway.dispatch(request).await {
                Response::Json(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    if value.get("error").is_some() {
                        std::process::exit(1);
                    }
                }
                Response::File {
                    status,
                    headers,
                    body,
                } => {
                    tracing::info!(status, ?headers, bytes = body.len(), "file response");
                    match output {
                        Some(path) => tokio::fs::write(&path, &body)
                            .await
                            .with_context(|| format!("writing {}", path.display()))?,
                        None => {
                            use std::io::Write;
                            std::io::stdout().write_all(&body)?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
