//! Byte transfer commands: upload and file.

use fsgate_kernel::vfs::{OpenMode, Target, VfsError, VfsResult};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::info::FileInfo;
use super::params::Params;
use super::{Response, Upload};
use crate::error::{ConnectorError, ConnectorResult, ResultExt};
use crate::gateway::Gateway;
use crate::media::mime_for;

/// Position of one chunk inside the whole upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkRange {
    pub start: u64,
    pub length: u64,
    pub total: u64,
}

impl ChunkRange {
    /// Parse `start,length,total`.
    pub(crate) fn parse(range: &str) -> Option<Self> {
        let mut parts = range.split(',').map(|s| s.trim().parse::<u64>());
        let start = parts.next()?.ok()?;
        let length = parts.next()?.ok()?;
        let total = parts.next()?.ok()?;
        if parts.next().is_some() || start.checked_add(length)? > total {
            return None;
        }
        Some(Self {
            start,
            length,
            total,
        })
    }

    /// The chunk that completes the file.
    pub(crate) fn is_final(&self) -> bool {
        self.start + self.length == self.total
    }
}

/// File name from a chunk name: `report.txt.2_5.part` -> `report.txt`.
pub(crate) fn chunk_file_name(chunk: &str) -> Option<&str> {
    let (rest, _part) = chunk.rsplit_once('.')?;
    let (name, _index) = rest.rsplit_once('.')?;
    (!name.is_empty()).then_some(name)
}

/// Byte window requested by a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    Satisfiable { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a single `bytes=` range against a file of `size` bytes.
///
/// Returns `None` when the header is absent or not a byte range, which
/// means the whole file is served.
pub(crate) fn parse_byte_range(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return None,
        ("", suffix) => {
            let suffix: u64 = suffix.parse().ok()?;
            if suffix == 0 || size == 0 {
                return Some(ByteRange::Unsatisfiable);
            }
            (size.saturating_sub(suffix), size - 1)
        }
        (start, "") => (start.parse().ok()?, size.saturating_sub(1)),
        (start, end) => {
            let end: u64 = end.parse().ok()?;
            (start.parse().ok()?, end.min(size.saturating_sub(1)))
        }
    };
    if start >= size || start > end {
        return Some(ByteRange::Unsatisfiable);
    }
    Some(ByteRange::Satisfiable { start, end })
}

/// `attachment` with an RFC 5987 encoded file name.
fn attachment(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

impl Gateway {
    /// Write `data` at `offset`, creating the file if needed. Chunks may
    /// arrive in any order, so nothing is truncated.
    async fn write_at(&self, target: &Target, offset: u64, data: &[u8]) -> VfsResult<()> {
        let mut handle = target
            .volume
            .driver
            .open(&target.relative, OpenMode::Update)
            .await?;
        if let Err(e) = handle.write(offset, data).await {
            let _ = handle.close().await;
            return Err(e);
        }
        handle.close().await
    }

    /// Destination directory for the `index`-th upload.
    fn upload_dir(&self, p: &Params, index: usize, default: &Target) -> ConnectorResult<Target> {
        match p.list("upload_path").get(index) {
            Some(token) => self.target(token),
            None => Ok(default.clone()),
        }
    }

    /// Three shapes: whole files, one chunk at an offset (`chunk` plus
    /// `range`), and a bare `chunk` asking whether the merged file exists.
    #[tracing::instrument(skip(self, p, uploads), fields(files = uploads.len()), name = "cmd.upload")]
    pub(crate) async fn upload(&self, p: &Params, uploads: &[Upload]) -> ConnectorResult<Value> {
        let dir = self.param_target(p)?;

        if let Some(chunk) = p.get("chunk") {
            return match p.get("range") {
                Some(range) => self.upload_chunk(p, &dir, chunk, range, uploads).await,
                None => self.probe_chunk(&dir, chunk).await,
            };
        }

        if uploads.is_empty() {
            return Err(ConnectorError::params("upload"));
        }
        let mut added = Vec::new();
        let mut warnings = Vec::new();
        for (index, upload) in uploads.iter().enumerate() {
            let stored: ConnectorResult<FileInfo> = async {
                let parent = self.upload_dir(p, index, &dir)?;
                parent.volume.check_writable().at(&parent.token())?;
                if upload.data.len() as u64 > self.config().upload_max_size {
                    return Err(ConnectorError::params("upload size"));
                }
                let name = upload.name.rsplit(['/', '\\']).next().unwrap_or(&upload.name);
                let file = parent.child(super::edit::valid_name(name)?);
                self.write_file(&file, &upload.data).await.at(&file.token())?;
                self.refresh_thumbnail(&file).await;
                self.file_info(&file).await
            }
            .await;
            match stored {
                Ok(info) => added.push(info),
                Err(e) => {
                    warn!(name = %upload.name, "upload failed: {e}");
                    warnings.push(e.to_json());
                }
            }
        }
        Ok(json!({ "added": added, "warning": warnings }))
    }

    async fn upload_chunk(
        &self,
        p: &Params,
        dir: &Target,
        chunk: &str,
        range: &str,
        uploads: &[Upload],
    ) -> ConnectorResult<Value> {
        let range = ChunkRange::parse(range).ok_or_else(|| ConnectorError::params("range"))?;
        let name = chunk_file_name(chunk).ok_or_else(|| ConnectorError::params("chunk"))?;
        let name = super::edit::valid_name(name)?;
        let upload = uploads.first().ok_or_else(|| ConnectorError::params("upload"))?;
        if upload.data.len() as u64 != range.length || range.total > self.config().upload_max_size {
            return Err(ConnectorError::params("range"));
        }

        let parent = self.upload_dir(p, 0, dir)?;
        parent.volume.check_writable().at(&parent.token())?;
        let file = parent.child(name);
        self.write_at(&file, range.start, &upload.data)
            .await
            .at(&file.token())?;
        debug!(name, start = range.start, length = range.length, total = range.total, "chunk stored");

        if range.is_final() {
            Ok(json!({ "_chunkmerged": name, "_name": name, "added": [] }))
        } else {
            Ok(json!({ "added": [] }))
        }
    }

    async fn probe_chunk(&self, dir: &Target, name: &str) -> ConnectorResult<Value> {
        let file = dir.child(super::edit::valid_name(name)?);
        match self.file_info(&file).await {
            Ok(info) => {
                self.refresh_thumbnail(&file).await;
                Ok(json!({ "added": [info] }))
            }
            Err(e) => {
                warn!(name, "merged upload missing: {e}");
                Ok(json!({ "added": [], "warning": "Failed to upload" }))
            }
        }
    }

    /// Read `len` bytes at `start`.
    pub(crate) async fn read_range(&self, target: &Target, start: u64, len: usize) -> VfsResult<Vec<u8>> {
        let mut handle = target
            .volume
            .driver
            .open(&target.relative, OpenMode::Read)
            .await?;
        let data = handle.read(start, len).await;
        let _ = handle.close().await;
        data
    }

    #[tracing::instrument(skip(self, p), name = "cmd.file")]
    pub(crate) async fn file(&self, p: &Params, range: Option<&str>) -> ConnectorResult<Response> {
        let target = self.param_target(p)?;
        let token = target.token();
        let attr = target.volume.driver.stat(&target.relative).await.at(&token)?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(target.absolute())).at(&token);
        }

        let name = target.name();
        let disposition = if p.flag("download") {
            attachment(&name)
        } else {
            "inline".to_string()
        };
        let mut headers = vec![
            ("Content-Type".to_string(), mime_for(&name)),
            ("Content-Disposition".to_string(), disposition),
            ("Accept-Ranges".to_string(), "bytes".to_string()),
        ];

        let size = attr.size;
        match range.and_then(|r| parse_byte_range(r, size)) {
            Some(ByteRange::Satisfiable { start, end }) => {
                let len = (end - start + 1) as usize;
                let body = self.read_range(&target, start, len).await.at(&token)?;
                headers.push(("Content-Range".into(), format!("bytes {start}-{end}/{size}")));
                headers.push(("Content-Length".into(), body.len().to_string()));
                Ok(Response::File {
                    status: 206,
                    headers,
                    body,
                })
            }
            Some(ByteRange::Unsatisfiable) => {
                headers.push(("Content-Range".into(), format!("bytes */{size}")));
                Ok(Response::File {
                    status: 416,
                    headers,
                    body: Vec::new(),
                })
            }
            None => {
                let body = self.read_file(&target).await.at(&token)?;
                headers.push(("Content-Length".into(), body.len().to_string()));
                Ok(Response::File {
                    status: 200,
                    headers,
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_range() {
        let first = ChunkRange::parse("0,5,12").unwrap();
        assert!(!first.is_final());
        let last = ChunkRange::parse("10,2,12").unwrap();
        assert!(last.is_final());
        assert_eq!(ChunkRange::parse("10,5,12"), None);
        assert_eq!(ChunkRange::parse("1,2"), None);
        assert_eq!(ChunkRange::parse("a,b,c"), None);
        assert_eq!(ChunkRange::parse(&format!("{},1,{}", u64::MAX, u64::MAX)), None);
    }

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name("report.txt.0_3.part"), Some("report.txt"));
        assert_eq!(chunk_file_name("archive.tar.gz.2_3.part"), Some("archive.tar.gz"));
        assert_eq!(chunk_file_name("noext.1_2.part"), Some("noext"));
        assert_eq!(chunk_file_name("part"), None);
    }

    #[test]
    fn test_byte_ranges() {
        use ByteRange::*;
        assert_eq!(parse_byte_range("bytes=0-4", 10), Some(Satisfiable { start: 0, end: 4 }));
        assert_eq!(parse_byte_range("bytes=6-", 10), Some(Satisfiable { start: 6, end: 9 }));
        assert_eq!(parse_byte_range("bytes=-3", 10), Some(Satisfiable { start: 7, end: 9 }));
        assert_eq!(parse_byte_range("bytes=5-100", 10), Some(Satisfiable { start: 5, end: 9 }));
        assert_eq!(parse_byte_range("bytes=10-", 10), Some(Unsatisfiable));
        assert_eq!(parse_byte_range("bytes=4-2", 10), Some(Unsatisfiable));
        assert_eq!(parse_byte_range("items=0-1", 10), None);
        assert_eq!(parse_byte_range("bytes=0-1,4-5", 10), None);
    }

    #[test]
    fn test_attachment_header() {
        let header = attachment("a b ü.txt");
        assert!(header.starts_with("attachment; filename=\"a b _.txt\""));
        assert!(header.ends_with("filename*=UTF-8''a%20b%20%C3%BC.txt"));
    }
}
