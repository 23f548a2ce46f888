//! S3 storage engine
//!
//! Runs one upload per file part: resolve options, determine the content
//! type, then either store the body once or fan it out to every transform.
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3_engine::file::{FileInfo, IncomingFile, RequestContext};
//! use mizuchi_s3_engine::options::{ContentTypeOption, StorageOptions};
//! use mizuchi_s3_engine::s3::{S3ClientConfig, S3ObjectStore};
//! use mizuchi_s3_engine::stream;
//! use mizuchi_s3_engine::upload::{S3StorageEngine, StorageEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = S3ObjectStore::new(S3ClientConfig::new("us-east-1")).await?;
//! let options = StorageOptions::builder()
//!     .bucket("uploads")
//!     .content_type(ContentTypeOption::Auto)
//!     .build()?;
//! let engine = S3StorageEngine::new(options, Arc::new(store));
//!
//! let file = IncomingFile::new(
//!     FileInfo::new("avatar", "me.png"),
//!     stream::from_bytes("hello"),
//! );
//! let outcome = engine.handle_file(&RequestContext::new(), file).await?;
//! println!("{:?}", outcome.as_single().map(|f| &f.location));
//! # Ok(())
//! # }
//! ```

use super::transform;
use super::{StorageEngine, StorageError, StoredFile, UploadOutcome};
use crate::file::{FileInfo, IncomingFile, RequestContext};
use crate::metrics;
use crate::options::StorageOptions;
use crate::s3::{ObjectParams, ObjectStore, ProgressListener};
use crate::stream::FileStream;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Remembers the last total size reported by upload progress
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    size: AtomicU64,
}

impl ProgressTracker {
    fn listener(self: &Arc<Self>) -> ProgressListener {
        let tracker = Arc::clone(self);
        Arc::new(move |progress| {
            if let Some(total) = progress.total.filter(|t| *t > 0) {
                tracker.size.store(total, Ordering::Relaxed);
            }
        })
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }
}

/// Upload one body and build its descriptor.
///
/// The reported size is the last total seen in progress events; a store that
/// never reports a total yields a size of 0.
#[tracing::instrument(
    name = "engine.store_object",
    skip(store, params, body, info),
    fields(
        s3.bucket = %params.bucket,
        s3.key = %params.key,
        http.content_type = %params.content_type,
        upload.size = tracing::field::Empty,
        s3.etag = tracing::field::Empty
    ),
    err
)]
pub(crate) async fn store_object(
    store: &dyn ObjectStore,
    params: ObjectParams,
    body: FileStream,
    info: &FileInfo,
) -> Result<StoredFile, StorageError> {
    let start_time = Instant::now();
    let tracker = Arc::new(ProgressTracker::default());
    let bucket = params.bucket.clone();

    let result = store
        .upload(params.clone(), body, tracker.listener())
        .await;

    let duration = start_time.elapsed();
    metrics::record_upload_duration(&bucket, "managed", duration.as_secs_f64());

    match result {
        Ok(output) => {
            let size = tracker.size();
            metrics::record_upload_success(&bucket, size);

            let span = tracing::Span::current();
            span.record("upload.size", size);
            span.record("s3.etag", output.etag.as_str());

            tracing::info!(
                location = %output.location,
                size = size,
                duration_ms = duration.as_millis(),
                "Object stored"
            );

            Ok(StoredFile::new(info, params, output, size))
        }
        Err(e) => {
            metrics::record_upload_failure(&bucket);
            Err(StorageError::Transport(e))
        }
    }
}

/// [`StorageEngine`] storing files in S3
#[derive(Clone)]
pub struct S3StorageEngine {
    options: Arc<StorageOptions>,
    store: Arc<dyn ObjectStore>,
}

impl S3StorageEngine {
    pub fn new(options: StorageOptions, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            options: Arc::new(options),
            store,
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Delete one object by bucket and key
    #[tracing::instrument(name = "engine.remove_object", skip(self), err)]
    pub async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        match self.store.delete_object(bucket, key).await {
            Ok(()) => {
                metrics::record_delete(bucket, true);
                tracing::info!("Object removed");
                Ok(())
            }
            Err(e) => {
                metrics::record_delete(bucket, false);
                metrics::record_error("transport");
                Err(StorageError::Transport(e))
            }
        }
    }

    /// Delete every object of an outcome, stopping at the first failure
    pub async fn remove_outcome(
        &self,
        ctx: &RequestContext,
        outcome: &UploadOutcome,
    ) -> Result<(), StorageError> {
        for file in outcome.files() {
            self.remove_file(ctx, file).await?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        ctx: &RequestContext,
        file: IncomingFile,
    ) -> Result<UploadOutcome, StorageError> {
        let IncomingFile { info, stream } = file;

        let resolved = self.options.resolve(ctx, &info).await?;
        let span = tracing::Span::current();
        span.record("s3.bucket", resolved.bucket.as_str());
        span.record("s3.key", resolved.key.as_str());

        let (content_type, body) = self
            .options
            .resolve_content_type(ctx, &info, stream)
            .await?;
        tracing::debug!(content_type = %content_type, "Resolved upload options");

        let transforms = self.options.transforms();
        if resolved.should_transform && !transforms.is_empty() {
            let files = transform::fan_out(
                transforms,
                ctx,
                &info,
                &resolved,
                &content_type,
                body,
                Arc::clone(&self.store),
            )
            .await?;
            return Ok(UploadOutcome::Transformed(files));
        }

        if resolved.should_transform {
            tracing::debug!("No transforms configured, storing a single object");
        }

        let params = resolved.object_params(resolved.key.clone(), content_type);
        let file = store_object(self.store.as_ref(), params, body, &info).await?;
        Ok(UploadOutcome::Single(file))
    }
}

#[async_trait]
impl StorageEngine for S3StorageEngine {
    #[tracing::instrument(
        name = "engine.handle_file",
        skip(self, ctx, file),
        fields(
            request.id = %ctx.request_id,
            file.field = %file.info.field_name,
            file.name = %file.info.original_name,
            s3.bucket = tracing::field::Empty,
            s3.key = tracing::field::Empty
        ),
        err
    )]
    async fn handle_file(
        &self,
        ctx: &RequestContext,
        file: IncomingFile,
    ) -> Result<UploadOutcome, StorageError> {
        let start_time = Instant::now();
        let result = self.upload(ctx, file).await;

        match &result {
            Ok(outcome) => tracing::info!(
                objects = outcome.files().len(),
                duration_ms = start_time.elapsed().as_millis(),
                "File handled"
            ),
            Err(e) => metrics::record_error(e.kind()),
        }
        result
    }

    #[tracing::instrument(
        name = "engine.remove_file",
        skip(self, ctx, file),
        fields(request.id = %ctx.request_id, s3.bucket = %file.bucket, s3.key = %file.key),
        err
    )]
    async fn remove_file(&self, ctx: &RequestContext, file: &StoredFile) -> Result<(), StorageError> {
        self.remove_object(&file.bucket, &file.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionValue;
    use crate::s3::{MockObjectStore, StorageClientError, UploadOutput, UploadProgress};
    use crate::stream;
    use mockall::predicate::eq;

    fn stored(bucket: &str, key: &str) -> StoredFile {
        let params = ObjectParams {
            bucket: bucket.into(),
            key: key.into(),
            content_type: "text/plain".into(),
            acl: None,
            metadata: None,
            cache_control: None,
            content_disposition: None,
            content_encoding: None,
            storage_class: None,
            server_side_encryption: None,
            sse_kms_key_id: None,
        };
        StoredFile::new(
            &FileInfo::new("file", "a.txt"),
            params,
            UploadOutput {
                location: String::new(),
                etag: String::new(),
                version_id: None,
            },
            0,
        )
    }

    fn engine(store: MockObjectStore) -> S3StorageEngine {
        let options = StorageOptions::builder().bucket("bucket").build().unwrap();
        S3StorageEngine::new(options, Arc::new(store))
    }

    #[tokio::test]
    async fn test_remove_file_deletes_exactly_once() {
        let mut store = MockObjectStore::new();
        store
            .expect_delete_object()
            .with(eq("bucket"), eq("photos/cat.png"))
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = engine(store);
        engine
            .remove_file(&RequestContext::new(), &stored("bucket", "photos/cat.png"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_file_propagates_transport_error() {
        let mut store = MockObjectStore::new();
        store
            .expect_delete_object()
            .times(1)
            .returning(|_, _| Err(StorageClientError::RequestError("AccessDenied".into())));

        let err = engine(store)
            .remove_file(&RequestContext::new(), &stored("bucket", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transport(_)));
    }

    #[tokio::test]
    async fn test_remove_outcome_stops_at_first_failure() {
        let mut store = MockObjectStore::new();
        store
            .expect_delete_object()
            .times(1)
            .returning(|_, _| Err(StorageClientError::RequestError("boom".into())));

        let mut files = std::collections::BTreeMap::new();
        files.insert("a".to_string(), stored("bucket", "a"));
        files.insert("b".to_string(), stored("bucket", "b"));

        let result = engine(store)
            .remove_outcome(&RequestContext::new(), &UploadOutcome::Transformed(files))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_size_comes_from_last_progress_total() {
        let mut store = MockObjectStore::new();
        store.expect_upload().times(1).returning(|params, _body, progress| {
            progress(UploadProgress { loaded: 4, total: None, part: Some(1) });
            progress(UploadProgress { loaded: 9, total: Some(9), part: None });
            Ok(UploadOutput {
                location: format!("https://{}.s3.us-east-1.amazonaws.com/{}", params.bucket, params.key),
                etag: "\"e\"".into(),
                version_id: Some("v1".into()),
            })
        });

        let options = StorageOptions::builder()
            .bucket("bucket")
            .key("fixed")
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, Arc::new(store));
        let file = IncomingFile::new(FileInfo::new("f", "a.bin"), stream::from_bytes("123456789"));

        let outcome = engine.handle_file(&RequestContext::new(), file).await.unwrap();
        let stored = outcome.as_single().unwrap();
        assert_eq!(stored.size, 9);
        assert_eq!(stored.key, "fixed");
        assert_eq!(stored.version_id.as_deref(), Some("v1"));
        assert_eq!(stored.location, "https://bucket.s3.us-east-1.amazonaws.com/fixed");
    }

    #[tokio::test]
    async fn test_size_is_zero_without_progress() {
        let mut store = MockObjectStore::new();
        store.expect_upload().returning(|_, _, _| {
            Ok(UploadOutput {
                location: "loc".into(),
                etag: "e".into(),
                version_id: None,
            })
        });

        let outcome = engine(store)
            .handle_file(
                &RequestContext::new(),
                IncomingFile::new(FileInfo::new("f", "a"), stream::from_bytes("abc")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.as_single().unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_never_uploads() {
        let mut store = MockObjectStore::new();
        store.expect_upload().times(0);

        let options = StorageOptions::builder()
            .bucket(OptionValue::resolver(|_, _| async {
                Err::<String, crate::options::BoxError>("tenant lookup failed".into())
            }))
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, Arc::new(store));

        let err = engine
            .handle_file(
                &RequestContext::new(),
                IncomingFile::new(FileInfo::new("f", "a"), stream::from_bytes("abc")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Resolution { option: "bucket", .. }));
    }
}
