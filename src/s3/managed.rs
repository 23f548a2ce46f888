//! Managed upload
//!
//! Bodies are read up to the multipart threshold. If the stream ends first the
//! buffer goes out as one PutObject; otherwise the upload switches to the
//! multipart API and streams parts of `part_size` bytes. A failed multipart
//! upload is aborted so no orphaned parts are left behind.

use super::{
    ObjectParams, ProgressListener, S3ObjectStore, StorageClientError, UploadOutput,
    UploadProgress,
};
use crate::metrics;
use crate::stream::FileStream;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, ObjectCannedAcl, ServerSideEncryption,
    StorageClass,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

/// Minimum part size (5MB) - S3 requirement
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum part size (5GB) - S3 requirement
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: usize = 10000;

macro_rules! with_object_params {
    ($builder:expr, $params:expr) => {{
        let params: &ObjectParams = $params;
        $builder
            .bucket(&params.bucket)
            .key(&params.key)
            .content_type(&params.content_type)
            .set_acl(params.acl.map(|acl| ObjectCannedAcl::from(acl.as_str())))
            .set_metadata(params.metadata.as_ref().map(|metadata| {
                metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }))
            .set_cache_control(params.cache_control.clone())
            .set_content_disposition(params.content_disposition.clone())
            .set_content_encoding(params.content_encoding.clone())
            .set_storage_class(params.storage_class.map(|class| StorageClass::from(class.as_str())))
            .set_server_side_encryption(
                params
                    .server_side_encryption
                    .map(|sse| ServerSideEncryption::from(sse.as_str())),
            )
            .set_ssekms_key_id(params.sse_kms_key_id.clone())
    }};
}

/// Pull chunks into `buffer` until it holds `limit` bytes or the body ends.
/// Returns `true` once the body is exhausted.
async fn fill(body: &mut FileStream, buffer: &mut BytesMut, limit: usize) -> Result<bool, StorageClientError> {
    while buffer.len() < limit {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

impl S3ObjectStore {
    pub(super) async fn managed_upload(
        &self,
        params: &ObjectParams,
        mut body: FileStream,
        progress: &ProgressListener,
    ) -> Result<UploadOutput, StorageClientError> {
        let mut buffer = BytesMut::new();
        let exhausted = fill(&mut body, &mut buffer, self.config.multipart_threshold.max(1)).await?;

        if exhausted {
            self.put_object(params, buffer.freeze(), progress).await
        } else {
            self.multipart_upload(params, buffer, body, progress).await
        }
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, params, body, progress),
        fields(
            s3.bucket = %params.bucket,
            s3.key = %params.key,
            http.method = "PUT",
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn put_object(
        &self,
        params: &ObjectParams,
        body: Bytes,
        progress: &ProgressListener,
    ) -> Result<UploadOutput, StorageClientError> {
        let size = body.len() as u64;
        let output = with_object_params!(self.client.put_object(), params)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageClientError::request("PutObject", e))?;

        let etag = output.e_tag().unwrap_or_default().to_string();
        tracing::Span::current().record("s3.etag", etag.as_str());

        progress(UploadProgress {
            loaded: size,
            total: Some(size),
            part: None,
        });

        tracing::info!(etag = %etag, bytes = size, "PutObject completed");

        Ok(UploadOutput {
            location: self.object_url(&params.bucket, &params.key),
            etag,
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[tracing::instrument(
        name = "s3.multipart_upload",
        skip(self, params, buffer, body, progress),
        fields(
            s3.bucket = %params.bucket,
            s3.key = %params.key,
            s3.upload_id = tracing::field::Empty,
            parts_count = tracing::field::Empty
        ),
        err
    )]
    async fn multipart_upload(
        &self,
        params: &ObjectParams,
        buffer: BytesMut,
        body: FileStream,
        progress: &ProgressListener,
    ) -> Result<UploadOutput, StorageClientError> {
        let created = with_object_params!(self.client.create_multipart_upload(), params)
            .send()
            .await
            .map_err(|e| StorageClientError::request("CreateMultipartUpload", e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageClientError::ResponseError("No upload ID returned from S3".into()))?
            .to_string();
        tracing::Span::current().record("s3.upload_id", upload_id.as_str());

        let result = match self
            .upload_parts(params, &upload_id, buffer, body, progress)
            .await
        {
            Ok(parts) => self.complete(params, &upload_id, parts).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                metrics::record_multipart_upload_failure(&params.bucket);
                self.abort(params, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        params: &ObjectParams,
        upload_id: &str,
        mut buffer: BytesMut,
        mut body: FileStream,
        progress: &ProgressListener,
    ) -> Result<(Vec<CompletedPart>, u64), StorageClientError> {
        let part_size = self.config.part_size.max(1);
        let mut parts = Vec::new();
        let mut loaded = 0u64;
        let mut exhausted = false;

        loop {
            if !exhausted {
                exhausted = fill(&mut body, &mut buffer, part_size).await?;
            }
            if buffer.is_empty() {
                break;
            }
            if parts.len() >= MAX_PARTS {
                return Err(StorageClientError::MultipartError(format!(
                    "body needs more than {} parts of {} bytes",
                    MAX_PARTS, part_size
                )));
            }

            let take = buffer.len().min(part_size);
            let data = buffer.split_to(take).freeze();
            let part_number = parts.len() as u32 + 1;
            let size = data.len() as u64;

            parts.push(self.upload_part(params, upload_id, part_number, data).await?);
            loaded += size;
            progress(UploadProgress {
                loaded,
                total: None,
                part: Some(part_number),
            });
        }

        progress(UploadProgress {
            loaded,
            total: Some(loaded),
            part: None,
        });
        Ok((parts, loaded))
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, params, body),
        fields(
            s3.bucket = %params.bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            http.method = "PUT",
            upload.bytes = body.len()
        ),
        err
    )]
    async fn upload_part(
        &self,
        params: &ObjectParams,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageClientError> {
        let output = self
            .client
            .upload_part()
            .bucket(&params.bucket)
            .key(&params.key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageClientError::request("UploadPart", e))?;

        let etag = output.e_tag().ok_or_else(|| {
            StorageClientError::ResponseError(format!("No ETag returned for part {}", part_number))
        })?;

        Ok(CompletedPart::builder()
            .part_number(part_number as i32)
            .e_tag(etag)
            .build())
    }

    async fn complete(
        &self,
        params: &ObjectParams,
        upload_id: &str,
        (parts, size): (Vec<CompletedPart>, u64),
    ) -> Result<UploadOutput, StorageClientError> {
        if parts.is_empty() {
            return Err(StorageClientError::MultipartError("No parts uploaded".into()));
        }
        let parts_count = parts.len();
        tracing::Span::current().record("parts_count", parts_count);

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&params.bucket)
            .key(&params.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageClientError::request("CompleteMultipartUpload", e))?;

        metrics::record_multipart_upload_success(&params.bucket, parts_count);
        tracing::info!(
            upload_id = %upload_id,
            parts = parts_count,
            bytes = size,
            "Completed multipart upload"
        );

        Ok(UploadOutput {
            location: output
                .location()
                .map(str::to_string)
                .unwrap_or_else(|| self.object_url(&params.bucket, &params.key)),
            etag: output.e_tag().unwrap_or_default().to_string(),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn abort(&self, params: &ObjectParams, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&params.bucket)
            .key(&params.key)
            .upload_id(upload_id)
            .send()
            .await;

        match result {
            Ok(_) => tracing::info!(upload_id = %upload_id, "Aborted multipart upload"),
            Err(e) => tracing::warn!(
                upload_id = %upload_id,
                error = %StorageClientError::request("AbortMultipartUpload", e),
                "Failed to abort multipart upload"
            ),
        }
    }
}
