//! Image commands: tmb, dim, resize. Thumbnail cache upkeep.

use fsgate_kernel::vfs::Target;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::params::Params;
use crate::constants::THUMBNAIL_SIZE;
use crate::error::{ConnectorError, ConnectorResult, ResultExt};
use crate::gateway::Gateway;
use crate::media::{self, ImageOp, MediaError};

/// Run codec work off the async workers.
async fn blocking<T, F>(work: F) -> ConnectorResult<T>
where
    F: FnOnce() -> media::MediaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))?
        .map_err(ConnectorError::from)
}

impl Gateway {
    fn thumbnail_name(token: &str) -> String {
        format!("{token}.png")
    }

    /// Render and cache the thumbnail for one image. Returns its file name.
    async fn make_thumbnail(&self, target: &Target) -> ConnectorResult<String> {
        let token = target.token();
        let dir = self
            .thumbnail_dir()
            .ok_or_else(|| ConnectorError::Config("thumbnail root is not on any volume".into()))?;
        let data = self.read_file(target).await.at(&token)?;
        let png = blocking(move || media::thumbnail(&data, THUMBNAIL_SIZE)).await?;

        self.ensure_dir(&dir).await.at(&dir.token())?;
        let file = Self::thumbnail_name(&token);
        let cached = dir.child(&file);
        self.write_file(&cached, &png).await.at(&cached.token())?;
        debug!(target = %target.absolute(), "thumbnail cached");
        Ok(file)
    }

    /// Drop a cached thumbnail whose source changed or went away.
    pub(crate) async fn forget_thumbnail(&self, token: &str) {
        if let Some(dir) = self.thumbnail_dir() {
            let cached = dir.child(&Self::thumbnail_name(token));
            if cached.volume.driver.exists(&cached.relative).await {
                if let Err(e) = cached.volume.driver.unlink(&cached.relative).await {
                    debug!(token, "stale thumbnail kept: {e}");
                }
            }
        }
    }

    /// Re-render the thumbnail after an image was rewritten.
    pub(crate) async fn refresh_thumbnail(&self, target: &Target) {
        if !media::is_image(&target.name()) {
            return;
        }
        if let Err(e) = self.make_thumbnail(target).await {
            debug!(target = %target.absolute(), "thumbnail not refreshed: {e}");
            self.forget_thumbnail(&target.token()).await;
        }
    }

    /// Images to thumbnail: `targets[]`, or every image in `current`.
    async fn thumbnail_candidates(&self, p: &Params) -> ConnectorResult<Vec<Target>> {
        let tokens = p.list("targets");
        if !tokens.is_empty() {
            return Ok(tokens
                .into_iter()
                .filter_map(|t| self.mounts().decode(t))
                .collect());
        }
        let current = self.target(p.require("current")?)?;
        let entries = current
            .volume
            .driver
            .readdir(&current.relative)
            .await
            .at(&current.token())?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind.is_file())
            .map(|e| current.child(&e.name))
            .collect())
    }

    /// Per-file failures are left out of `images`.
    #[tracing::instrument(skip(self, p), name = "cmd.tmb")]
    pub(crate) async fn tmb(&self, p: &Params) -> ConnectorResult<Value> {
        let candidates = self.thumbnail_candidates(p).await?;
        let cache = self.thumbnail_dir();
        let wanted: Vec<Target> = candidates
            .into_iter()
            .filter(|t| media::is_image(&t.name()))
            .filter(|t| !cache.as_ref().is_some_and(|dir| dir.contains(t)))
            .collect();

        let rendered: Vec<(String, ConnectorResult<String>)> = stream::iter(wanted)
            .map(|target| async move { (target.token(), self.make_thumbnail(&target).await) })
            .buffered(self.config().fan_out)
            .collect()
            .await;

        let mut images = Map::new();
        for (token, result) in rendered {
            match result {
                Ok(file) => {
                    images.insert(token, Value::from(file));
                }
                Err(e) => warn!(token, "thumbnail failed: {e}"),
            }
        }
        Ok(json!({ "images": images }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.dim")]
    pub(crate) async fn dim(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let data = self.read_file(&target).await.at(&target.token())?;
        let (width, height) = blocking(move || media::dimensions(&data)).await?;
        Ok(json!({ "dim": format!("{width}x{height}") }))
    }

    #[tracing::instrument(skip(self, p), name = "cmd.resize")]
    pub(crate) async fn resize(&self, p: &Params) -> ConnectorResult<Value> {
        let target = self.param_target(p)?;
        let token = target.token();
        target.volume.check_writable().at(&token)?;

        let dimension = |key: &str| -> ConnectorResult<u32> {
            p.number::<u32>(key)?.ok_or_else(|| ConnectorError::params(key))
        };
        let op = match p.get("mode").unwrap_or("resize") {
            "resize" => ImageOp::Resize {
                width: dimension("width")?,
                height: dimension("height")?,
            },
            "crop" => ImageOp::Crop {
                x: p.number::<u32>("x")?.unwrap_or(0),
                y: p.number::<u32>("y")?.unwrap_or(0),
                width: dimension("width")?,
                height: dimension("height")?,
            },
            "rotate" => ImageOp::Rotate {
                degrees: p.number::<i32>("degree")?.unwrap_or(0),
            },
            other => return Err(ConnectorError::params(format!("mode: {other}"))),
        };
        let quality = p.number::<u8>("quality")?;

        let data = self.read_file(&target).await.at(&token)?;
        let name = target.name();
        let edited = blocking(move || media::transform(&data, &name, op, quality)).await?;
        self.write_file(&target, &edited).await.at(&token)?;
        self.refresh_thumbnail(&target).await;

        Ok(json!({ "changed": [self.file_info(&target).await?] }))
    }
}
