//! Common test infrastructure
//!
//! Provides an in-memory [`ObjectStore`] that records every request it sees.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use mizuchi_s3_engine::s3::{
    ObjectParams, ObjectStore, ProgressListener, StorageClientError, UploadOutput, UploadProgress,
};
use mizuchi_s3_engine::stream::{self, FileStream};
use std::collections::HashSet;
use std::sync::Mutex;

/// One recorded upload
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub params: ObjectParams,
    pub body: Bytes,
}

/// In-memory object store
#[derive(Default)]
pub struct RecordingStore {
    uploads: Mutex<Vec<RecordedUpload>>,
    deletes: Mutex<Vec<(String, String)>>,
    failing_prefixes: HashSet<String>,
    silent: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads whose key starts with `prefix` fail after the body is read
    pub fn failing_on(mut self, prefix: &str) -> Self {
        self.failing_prefixes.insert(prefix.to_string());
        self
    }

    /// Never emit progress events
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_for(&self, key: &str) -> Option<RecordedUpload> {
        self.uploads().into_iter().find(|u| u.params.key == key)
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }
}

pub fn location(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.us-east-1.amazonaws.com/{}", bucket, key)
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload(
        &self,
        params: ObjectParams,
        body: FileStream,
        progress: ProgressListener,
    ) -> Result<UploadOutput, StorageClientError> {
        let body = stream::collect(body).await?;

        if self
            .failing_prefixes
            .iter()
            .any(|prefix| params.key.starts_with(prefix.as_str()))
        {
            return Err(StorageClientError::RequestError(format!(
                "simulated failure for {}",
                params.key
            )));
        }

        if !self.silent {
            let size = body.len() as u64;
            progress(UploadProgress {
                loaded: size,
                total: Some(size),
                part: None,
            });
        }

        let output = UploadOutput {
            location: location(&params.bucket, &params.key),
            etag: format!("\"etag-{}\"", params.key),
            version_id: None,
        };
        self.uploads
            .lock()
            .unwrap()
            .push(RecordedUpload { params, body });
        Ok(output)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageClientError> {
        self.deletes
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }
}
