//! Transform Fan-out Integration Tests
//!
//! One source body, several derived objects, each uploaded under its own key.

mod common;

#[cfg(test)]
mod tests {
    use super::common::RecordingStore;
    use bytes::Bytes;
    use futures::StreamExt;
    use mizuchi_s3_engine::options::{BoxError, ContentTypeOption, OptionValue, StorageOptions};
    use mizuchi_s3_engine::stream::{self, FileStream};
    use mizuchi_s3_engine::upload::transform::{Transducer, TransformSpec};
    use mizuchi_s3_engine::{
        FileInfo, IncomingFile, RequestContext, S3StorageEngine, StorageEngine, StorageError,
    };
    use std::sync::Arc;

    /// Keeps every other byte
    fn halve(body: FileStream) -> FileStream {
        Box::pin(body.map(|chunk| {
            chunk.map(|bytes| bytes.iter().step_by(2).copied().collect::<Bytes>())
        }))
    }

    fn thumbnail_key() -> OptionValue<String> {
        OptionValue::resolver(|_, file| {
            let key = format!("thumbs/{}", file.original_name);
            async move { Ok(key) }
        })
    }

    fn incoming(body: Vec<u8>) -> IncomingFile {
        IncomingFile::new(FileInfo::new("image", "cat.png"), stream::from_bytes(body))
    }

    #[tokio::test]
    async fn test_original_and_thumbnail() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .content_type("image/png")
            .should_transform(true)
            .transform(TransformSpec::identity().id("original").key("media/original/cat.png"))
            .transform(
                TransformSpec::map(halve)
                    .id("thumbnail")
                    .key(thumbnail_key())
                    .content_type("image/jpeg"),
            )
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let outcome = engine
            .handle_file(&RequestContext::new(), incoming(body.clone()))
            .await
            .unwrap();

        let files = outcome.as_transformed().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["original"].key, "media/original/cat.png");
        assert_eq!(files["original"].content_type, "image/png");
        assert_eq!(files["original"].size, 10_000);
        assert_eq!(files["thumbnail"].key, "thumbs/cat.png");
        assert_eq!(files["thumbnail"].content_type, "image/jpeg");
        assert_eq!(files["thumbnail"].size, 5_000);

        let original = store.upload_for("media/original/cat.png").unwrap();
        assert_eq!(&original.body[..], &body[..]);
        let thumbnail = store.upload_for("thumbs/cat.png").unwrap();
        let expected: Vec<u8> = body.iter().step_by(2).copied().collect();
        assert_eq!(&thumbnail.body[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_transforms_share_resolved_options() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .key_prefix("variants/")
            .cache_control("max-age=600")
            .content_type(ContentTypeOption::Auto)
            .should_transform(true)
            .transform(TransformSpec::identity().id("a"))
            .transform(TransformSpec::identity().id("b"))
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let outcome = engine
            .handle_file(
                &RequestContext::new(),
                incoming(b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>".to_vec()),
            )
            .await
            .unwrap();

        let files = outcome.as_transformed().unwrap();
        assert_ne!(files["a"].key, files["b"].key);
        for upload in store.uploads() {
            assert_eq!(upload.params.bucket, "media");
            assert!(upload.params.key.starts_with("variants/"));
            assert_eq!(upload.params.cache_control.as_deref(), Some("max-age=600"));
            // No per-transform content type, so the sniffed one applies
            assert_eq!(upload.params.content_type, "image/svg+xml");
        }
    }

    #[tokio::test]
    async fn test_transform_disabled_stores_single_object() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(OptionValue::resolver(|ctx, _| {
                let enabled = ctx.field("variants") == Some("yes");
                async move { Ok(enabled) }
            }))
            .transform(TransformSpec::identity().id("original"))
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let outcome = engine
            .handle_file(&RequestContext::new(), incoming(vec![1, 2, 3]))
            .await
            .unwrap();
        assert!(outcome.as_single().is_some());

        let ctx = RequestContext::new().with_field("variants", "yes");
        let outcome = engine.handle_file(&ctx, incoming(vec![1, 2, 3])).await.unwrap();
        assert_eq!(outcome.as_transformed().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enabled_without_transforms_stores_single_object() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(true)
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let outcome = engine
            .handle_file(&RequestContext::new(), incoming(vec![9; 16]))
            .await
            .unwrap();
        assert_eq!(outcome.as_single().unwrap().size, 16);
    }

    #[tokio::test]
    async fn test_failing_transform_fails_the_file() {
        let store = Arc::new(RecordingStore::new().failing_on("thumbs/"));
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(true)
            .transform(TransformSpec::identity().id("original").key("media/cat.png"))
            .transform(TransformSpec::map(halve).id("thumbnail").key(thumbnail_key()))
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let err = engine
            .handle_file(&RequestContext::new(), incoming(vec![0; 2048]))
            .await
            .unwrap_err();

        match err {
            StorageError::Transform { id, source } => {
                assert_eq!(id, "thumbnail");
                assert!(matches!(*source, StorageError::Transport(_)));
            }
            other => panic!("expected a transform error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transducer_factory_failure() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(true)
            .transform(
                TransformSpec::new(|_, file| {
                    let name = file.original_name.clone();
                    async move {
                        if name.ends_with(".png") {
                            Err::<Transducer, BoxError>(format!("cannot transcode {}", name).into())
                        } else {
                            Ok(Box::new(|body: FileStream| body) as Transducer)
                        }
                    }
                })
                .id("webp"),
            )
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let err = engine
            .handle_file(&RequestContext::new(), incoming(vec![1]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Transform { ref id, .. } if id == "webp"));
        assert!(err.to_string().contains("webp"));
        assert!(store.uploads().is_empty());
    }

    fn assert_empty_resolution(err: StorageError, expected_id: &str, expected_option: &str) {
        match err {
            StorageError::Transform { id, source } => {
                assert_eq!(id, expected_id);
                match *source {
                    StorageError::Resolution { option, .. } => assert_eq!(option, expected_option),
                    other => panic!("expected a resolution error, got {:?}", other),
                }
            }
            other => panic!("expected a transform error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transform_key_resolving_empty_is_rejected() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(true)
            .transform(TransformSpec::identity().id("original").key("media/cat.png"))
            .transform(
                TransformSpec::identity()
                    .id("blank")
                    .key(OptionValue::<String>::resolver(|_, _| async { Ok(String::new()) })),
            )
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let err = engine
            .handle_file(&RequestContext::new(), incoming(vec![1, 2, 3]))
            .await
            .unwrap_err();

        assert_empty_resolution(err, "blank", "key");
        assert!(store.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_transform_content_type_resolving_empty_is_rejected() {
        let store = Arc::new(RecordingStore::new());
        let options = StorageOptions::builder()
            .bucket("media")
            .should_transform(true)
            .transform(
                TransformSpec::identity()
                    .id("untyped")
                    .key("media/cat.png")
                    .content_type(OptionValue::<String>::resolver(|_, _| async {
                        Ok(String::new())
                    })),
            )
            .build()
            .unwrap();
        let engine = S3StorageEngine::new(options, store.clone());

        let err = engine
            .handle_file(&RequestContext::new(), incoming(vec![1, 2, 3]))
            .await
            .unwrap_err();

        assert_empty_resolution(err, "untyped", "content_type");
        assert!(store.uploads().is_empty());
    }

    #[test]
    fn test_duplicate_transform_ids_rejected() {
        let result = StorageOptions::builder()
            .bucket("media")
            .transform(TransformSpec::identity().id("same"))
            .transform(TransformSpec::identity().id("same"))
            .build();
        assert!(result.is_err());
    }
}
