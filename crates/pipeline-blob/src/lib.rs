#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! S3-compatible presigned-URL broker: mints single-PUT or multipart upload
//! tickets, presigns downloads, and fetches objects for stage handlers.
//!
//! No retry happens here; retry is the worker runtime's responsibility per
//! the broker contract in [`pipeline_core::BlobBroker`].

use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use chrono::Duration;
use futures_util::TryStreamExt;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use pipeline_config::StorageConfig;
use pipeline_core::{BlobBroker, PipelineError, PipelineResult, UploadTicket};
use rand::RngCore;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Objects of at most this size use a single presigned `PUT`.
const SINGLE_PUT_THRESHOLD: u64 = 50 * 1024 * 1024;
/// Minimum (and rounding unit) for a multipart part.
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// S3's hard cap on parts per multipart upload.
const MAX_PARTS: u64 = 10_000;

const SINGLE_PUT_TTL: StdDuration = StdDuration::from_secs(60 * 60);
const MULTIPART_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);
const DOWNLOAD_TTL: StdDuration = StdDuration::from_secs(60 * 60);

/// Characters outside this set are percent-escaped when building object keys
/// from an uploaded file's extension.
const KEY_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'%')
    .add(b'"')
    .add(b'<')
    .add(b'>');

/// Presigned-URL broker backed by an S3-compatible bucket (R2, MinIO, AWS).
pub struct S3Broker {
    client: Client,
    bucket: String,
    public_url: Option<String>,
    http: reqwest::Client,
}

impl S3Broker {
    /// Build a client from the storage section of [`pipeline_config::PipelineConfig`].
    pub async fn new(config: &StorageConfig) -> PipelineResult<Self> {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "pipeline-blob",
        );

        let loaded = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("auto".to_string()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .load()
            .await;

        let client = Client::new(&loaded);
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| PipelineError::transient("blob_broker.http_client", err))?;

        Ok(Self {
            client,
            bucket: config.bucket_name.clone(),
            public_url: config.public_url.clone(),
            http,
        })
    }

    fn object_key(file_name: &str) -> String {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut rand_bytes = [0u8; 6];
        rand::rng().fill_bytes(&mut rand_bytes);
        let rand12 = hex_encode(&rand_bytes);
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let escaped_ext = utf8_percent_encode(ext, KEY_UNSAFE).to_string();
        format!("uploads/{now_ms}_{rand12}.{escaped_ext}")
    }

    fn public_url_for(&self, key: &str) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }

    /// Part sizing policy per §4.1: at least 5 MiB, rounded up to a 5 MiB
    /// multiple, sized so the part count never exceeds [`MAX_PARTS`].
    fn part_size_for(size: u64) -> u64 {
        let raw = size.div_ceil(MAX_PARTS).max(MIN_PART_SIZE);
        raw.div_ceil(MIN_PART_SIZE) * MIN_PART_SIZE
    }
}

#[async_trait]
impl BlobBroker for S3Broker {
    async fn mint_upload(
        &self,
        file_name: &str,
        content_type: &str,
        size: Option<u64>,
    ) -> PipelineResult<UploadTicket> {
        let key = Self::object_key(file_name);
        let public_url = self.public_url_for(&key);

        let Some(size) = size.filter(|size| *size > SINGLE_PUT_THRESHOLD) else {
            let presign = PresigningConfig::expires_in(SINGLE_PUT_TTL)
                .map_err(|err| PipelineError::transient("blob_broker.presign_config", err))?;
            let request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(content_type)
                .presigned(presign)
                .await
                .map_err(|err| PipelineError::transient("blob_broker.presign_put", err))?;
            return Ok(UploadTicket::Single {
                put_url: request.uri().to_string(),
                key,
                public_url,
            });
        };

        let part_size = Self::part_size_for(size);
        let part_count = size.div_ceil(part_size);
        if part_count > MAX_PARTS {
            return Err(PipelineError::poison(format!(
                "upload of {size} bytes would require {part_count} parts, exceeding the {MAX_PARTS} part cap"
            )));
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.create_multipart", err))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| PipelineError::poison("object store returned no upload id"))?
            .to_string();

        let mut part_urls = Vec::with_capacity(part_count as usize);
        let multipart_presign = PresigningConfig::expires_in(MULTIPART_TTL)
            .map_err(|err| PipelineError::transient("blob_broker.presign_config", err))?;
        for part_number in 1..=i32::try_from(part_count)
            .map_err(|err| PipelineError::transient("blob_broker.part_count", err))?
        {
            let presign = PresigningConfig::expires_in(MULTIPART_TTL)
                .map_err(|err| PipelineError::transient("blob_broker.presign_config", err))?;
            let request = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .presigned(presign)
                .await
                .map_err(|err| PipelineError::transient("blob_broker.presign_part", err))?;
            part_urls.push(request.uri().to_string());
        }

        let complete_request = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .upload_id(&upload_id)
            .presigned(multipart_presign)
            .await
            .map_err(|err| PipelineError::transient("blob_broker.presign_complete", err))?;

        let abort_presign = PresigningConfig::expires_in(MULTIPART_TTL)
            .map_err(|err| PipelineError::transient("blob_broker.presign_config", err))?;
        let abort_request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .upload_id(&upload_id)
            .presigned(abort_presign)
            .await
            .map_err(|err| PipelineError::transient("blob_broker.presign_abort", err))?;

        Ok(UploadTicket::Multipart {
            key,
            upload_id,
            part_urls,
            complete_url: complete_request.uri().to_string(),
            abort_url: abort_request.uri().to_string(),
            part_size,
            public_url,
        })
    }

    async fn get_download_url(&self, key: &str, ttl: Duration) -> PipelineResult<String> {
        let std_ttl = ttl
            .to_std()
            .unwrap_or(DOWNLOAD_TTL)
            .min(StdDuration::from_secs(7 * 24 * 60 * 60));
        let presign = PresigningConfig::expires_in(std_ttl)
            .map_err(|err| PipelineError::transient("blob_broker.presign_config", err))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign)
            .await
            .map_err(|err| PipelineError::transient("blob_broker.presign_get", err))?;
        Ok(request.uri().to_string())
    }

    async fn fetch(&self, key: &str) -> PipelineResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.get_object", err))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.collect_body", err))?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    async fn fetch_to_file(
        &self,
        key: &str,
        public_url: Option<&str>,
        path: &Path,
    ) -> PipelineResult<()> {
        match self.fetch_to_file_from_storage(key, path).await {
            Ok(()) => Ok(()),
            Err(storage_err) => {
                let Some(url) = public_url else {
                    return Err(storage_err);
                };
                warn!(%key, error = %storage_err, "storage fetch failed; falling back to public URL");
                self.fetch_to_file_via_http(url, path).await
            }
        }
    }
}

impl S3Broker {
    async fn fetch_to_file_from_storage(&self, key: &str, path: &Path) -> PipelineResult<()> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.get_object", err))?;

        let mut file = File::create(path)
            .await
            .map_err(|err| PipelineError::transient("blob_broker.create_file", err))?;
        let mut stream = output.body;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.stream_body", err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| PipelineError::transient("blob_broker.write_chunk", err))?;
        }
        file.flush()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.flush_file", err))?;
        Ok(())
    }

    async fn fetch_to_file_via_http(&self, url: &str, path: &Path) -> PipelineResult<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.http_get", err))?
            .error_for_status()
            .map_err(|err| PipelineError::transient("blob_broker.http_status", err))?;

        let mut file = File::create(path)
            .await
            .map_err(|err| PipelineError::transient("blob_broker.create_file", err))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.http_stream", err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| PipelineError::transient("blob_broker.write_chunk", err))?;
        }
        file.flush()
            .await
            .map_err(|err| PipelineError::transient("blob_broker.flush_file", err))?;
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build a multipart completion request body from the `{PartNumber, ETag}`
/// pairs a client reports after uploading each part. Exposed so the HTTP
/// control plane (out of this crate's scope to serve, but responsible for
/// shaping the request) can construct the same S3-standard payload the
/// presigned `complete_url` expects.
#[must_use]
pub fn completed_multipart_upload(parts: Vec<(i32, String)>) -> CompletedMultipartUpload {
    let parts = parts
        .into_iter()
        .map(|(part_number, e_tag)| {
            CompletedPart::builder()
                .part_number(part_number)
                .e_tag(e_tag)
                .build()
        })
        .collect();
    CompletedMultipartUpload::builder()
        .set_parts(Some(parts))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_rounds_up_to_5_mib_multiple() {
        let size = 600 * 1024 * 1024;
        let part_size = S3Broker::part_size_for(size);
        assert_eq!(part_size % MIN_PART_SIZE, 0);
        assert!(part_size >= MIN_PART_SIZE);
        assert!(size.div_ceil(part_size) <= MAX_PARTS);
    }

    #[test]
    fn part_size_floors_at_5_mib_for_small_multipart_sizes() {
        assert_eq!(S3Broker::part_size_for(60 * 1024 * 1024), MIN_PART_SIZE);
    }

    #[test]
    fn object_key_has_uploads_prefix_and_extension() {
        let key = S3Broker::object_key("lecture.mp4");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with(".mp4"));
    }

    #[test]
    fn object_key_percent_escapes_unsafe_extension_characters() {
        let key = S3Broker::object_key("weird file.a b");
        assert!(!key.contains(' '));
    }
}
