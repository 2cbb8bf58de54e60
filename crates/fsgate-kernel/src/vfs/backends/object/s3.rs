//! S3-compatible object store via `rust-s3`.

use async_trait::async_trait;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::{Bucket, Region, creds::Credentials};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::store::{CompletedPart, ListPage, ObjectMeta, ObjectStore};
use crate::vfs::error::{VfsError, VfsResult};

const OCTET_STREAM: &str = "application/octet-stream";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// e.g. `https://s3.amazonaws.com` or `http://localhost:9000`
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    /// Build a path-style client. Nothing is sent until the first call.
    pub fn new(config: S3Config) -> VfsResult<Self> {
        let region = if config.region.is_empty() {
            "us-east-1".to_string()
        } else {
            config.region
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| VfsError::unavailable(format!("credentials: {e}")))?;
        let bucket = Bucket::new(
            &config.bucket,
            Region::Custom {
                endpoint: config.endpoint,
                region,
            },
            credentials,
        )
        .map_err(map_s3_error)?
        .with_path_style();
        Ok(Self { bucket })
    }
}

fn map_s3_error(e: S3Error) -> VfsError {
    match e {
        S3Error::HttpFailWithBody(404, body) => VfsError::not_found(body),
        S3Error::HttpFailWithBody(403, body) => VfsError::permission_denied(body),
        other => VfsError::backend(other.to_string()),
    }
}

fn check_status(op: &str, key: &str, code: u16) -> VfsResult<()> {
    match code {
        200..=299 => Ok(()),
        404 => Err(VfsError::not_found(key)),
        403 => Err(VfsError::permission_denied(key)),
        _ => Err(VfsError::backend(format!("{op} {key}: HTTP {code}"))),
    }
}

/// Parse either header (RFC 2822) or listing (RFC 3339) timestamps.
fn parse_time(raw: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .or_else(|_| chrono::DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(SystemTime::from)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> VfsResult<Option<ObjectMeta>> {
        match self.bucket.head_object(key).await {
            Ok((head, 200)) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: head.content_length.unwrap_or(0).max(0) as u64,
                last_modified: head.last_modified.as_deref().and_then(parse_time),
            })),
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Ok((_, code)) => Err(VfsError::backend(format!("head {key}: HTTP {code}"))),
            Err(e) => Err(map_s3_error(e)),
        }
    }

    async fn get_range(&self, key: &str, start: u64, len: usize) -> VfsResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = start + len as u64 - 1;
        match self.bucket.get_object_range(key, start, Some(end)).await {
            Ok(response) => {
                let code = response.status_code();
                if code == 416 {
                    return Ok(Vec::new());
                }
                check_status("get", key, code)?;
                Ok(response.bytes().to_vec())
            }
            Err(S3Error::HttpFailWithBody(416, _)) => Ok(Vec::new()),
            Err(e) => Err(map_s3_error(e)),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> VfsResult<()> {
        let response = self.bucket.put_object(key, data).await.map_err(map_s3_error)?;
        check_status("put", key, response.status_code())
    }

    async fn delete(&self, key: &str) -> VfsResult<()> {
        match self.bucket.delete_object(key).await {
            Ok(response) => check_status("delete", key, response.status_code()),
            // Deleting a missing key is not an error on S3
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(map_s3_error(e)),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
        max_keys: usize,
    ) -> VfsResult<ListPage> {
        let (result, code) = self
            .bucket
            .list_page(
                prefix.to_string(),
                delimiter.map(str::to_string),
                continuation,
                None,
                Some(max_keys),
            )
            .await
            .map_err(map_s3_error)?;
        check_status("list", prefix, code)?;

        Ok(ListPage {
            objects: result
                .contents
                .into_iter()
                .map(|object| ObjectMeta {
                    last_modified: parse_time(&object.last_modified),
                    size: object.size,
                    key: object.key,
                })
                .collect(),
            prefixes: result
                .common_prefixes
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.prefix)
                .collect(),
            continuation: if result.is_truncated {
                result.next_continuation_token
            } else {
                None
            },
        })
    }

    async fn copy(&self, from: &str, to: &str) -> VfsResult<()> {
        let code = self
            .bucket
            .copy_object_internal(from, to)
            .await
            .map_err(map_s3_error)?;
        check_status("copy", from, code)
    }

    async fn create_multipart(&self, key: &str) -> VfsResult<String> {
        let response = self
            .bucket
            .initiate_multipart_upload(key, OCTET_STREAM)
            .await
            .map_err(map_s3_error)?;
        Ok(response.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> VfsResult<CompletedPart> {
        let part = self
            .bucket
            .put_multipart_chunk(data, key, part_number, upload_id, OCTET_STREAM)
            .await
            .map_err(map_s3_error)?;
        Ok(CompletedPart {
            part_number: part.part_number,
            etag: part.etag,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> VfsResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag,
            })
            .collect();
        let response = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(map_s3_error)?;
        check_status("complete", key, response.status_code())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> VfsResult<()> {
        self.bucket
            .abort_upload(key, upload_id)
            .await
            .map_err(map_s3_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2024-05-01T10:00:00.000Z").is_some());
        assert!(parse_time("Wed, 21 Oct 2015 07:28:00 GMT").is_some());
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("put", "k", 200).is_ok());
        assert!(check_status("put", "k", 404).unwrap_err().is_not_found());
        assert!(matches!(
            check_status("put", "k", 403),
            Err(VfsError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires S3-compatible server"]
    async fn test_s3_round_trip() {
        let store = S3ObjectStore::new(S3Config {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "test-bucket".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
        })
        .unwrap();
        store.put("fsgate-test/a.txt", b"hello").await.unwrap();
        assert_eq!(store.head("fsgate-test/a.txt").await.unwrap().unwrap().size, 5);
        assert_eq!(store.get_range("fsgate-test/a.txt", 1, 3).await.unwrap(), b"ell");
        store.delete("fsgate-test/a.txt").await.unwrap();
        assert!(store.head("fsgate-test/a.txt").await.unwrap().is_none());
    }
}
