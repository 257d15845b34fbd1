use crate::config::S3Config;
use crate::error::{Error, Result, Store};
use crate::models::content_type_for;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// S3 accepts at most this many keys per DeleteObjects request
pub const DELETE_BATCH_LIMIT: usize = 1000;

/// Outcome of a batch delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDeleteReport {
    /// Keys the store confirmed as deleted
    pub deleted: usize,
    /// Keys the store reported as not deleted
    pub failed: Vec<String>,
}

/// Sibling of `dest` that receives bytes until the download completes
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.part", name))
}

/// Stream `chunks` into `dest`, which only appears once every chunk is
/// written. On any error the partial file is removed and `dest` is untouched.
async fn write_atomic<S, B, E>(dest: &Path, chunks: S) -> Result<usize>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let partial = partial_path(dest);
    let outcome = async {
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| Error::io(&partial, e))?;

        futures::pin_mut!(chunks);
        let mut written = 0usize;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| Error::Transient {
                store: Store::ObjectStore,
                message: format!("download interrupted: {}", e),
            })?;
            file.write_all(chunk.as_ref())
                .await
                .map_err(|e| Error::io(&partial, e))?;
            written += chunk.as_ref().len();
        }
        file.flush().await.map_err(|e| Error::io(&partial, e))?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| Error::io(dest, e))?;
        Ok::<_, Error>(written)
    }
    .await;

    if outcome.is_err() {
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
    outcome
}

/// Key-addressed blob storage for image bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Download `key` into a local file, creating parent directories
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()>;

    /// Delete many keys; per-key failures are reported, not raised
    async fn delete_batch(&self, keys: &[String]) -> Result<BatchDeleteReport>;

    /// Number of objects in the bucket
    async fn count_objects(&self) -> Result<u64>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3ObjectStore {
    /// Create a new S3 object store from shared SDK configuration
    pub fn new(sdk: &SdkConfig, config: &S3Config) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(5 * 1024 * 1024),
        }
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| Error::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;

        let upload_id = create_response.upload_id().ok_or_else(|| Error::Rejected {
            store: Store::ObjectStore,
            message: "no upload id in CreateMultipartUpload response".to_string(),
        })?;

        match self.upload_parts(key, upload_id, &data).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;
                Ok(())
            }
            Err(e) => {
                // Abandoned parts are billed until aborted
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: &[u8],
    ) -> Result<Vec<CompletedPart>> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in data.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let content_type = content_type_for(key);
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io(path, e))?
            .len() as usize;

        debug!(size_bytes = size, "Uploading object");

        if size > self.multipart_threshold_bytes {
            let data = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
            self.multipart_upload(key, data, content_type).await?;
        } else {
            self.simple_upload(key, path, content_type).await?;
        }

        info!(size_bytes = size, "Object uploaded");
        Ok(())
    }

    #[instrument(skip(self, dest), fields(bucket = %self.bucket))]
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    Error::not_found("object", key)
                } else {
                    Error::from_sdk(Store::ObjectStore, e)
                }
            })?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }

        let body = futures::stream::unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(e), body)),
            }
        });
        let written = write_atomic(dest, body).await?;

        debug!(size_bytes = written, dest = %dest.display(), "Object downloaded");
        Ok(())
    }

    #[instrument(skip(self, keys), fields(bucket = %self.bucket, count = keys.len()))]
    async fn delete_batch(&self, keys: &[String]) -> Result<BatchDeleteReport> {
        let mut report = BatchDeleteReport::default();

        for batch in keys.chunks(DELETE_BATCH_LIMIT) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::InvalidInput(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| Error::InvalidInput(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;

            let failed: Vec<String> = response
                .errors()
                .iter()
                .filter_map(|err| err.key().map(String::from))
                .collect();

            report.deleted += batch.len().saturating_sub(failed.len());
            report.failed.extend(failed);
        }

        debug!(deleted = report.deleted, failed = report.failed.len(), "Batch delete finished");
        Ok(report)
    }

    async fn count_objects(&self) -> Result<u64> {
        let mut count = 0u64;
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk(Store::ObjectStore, e))?;

            count += response.contents().len() as u64;

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(count)
    }
}
