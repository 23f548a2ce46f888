//! Upload module
//!
//! The storage-engine contract handed to the multipart layer, and its S3
//! implementation.

use crate::file::{FileInfo, IncomingFile, RequestContext};
use crate::options::{Acl, BoxError, Metadata, ServerSideEncryption, StorageClass};
use crate::s3::{ObjectParams, StorageClientError, UploadOutput};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod engine;
pub mod key;
pub mod transform;

pub use engine::S3StorageEngine;

/// Upload errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to resolve {option}: {source}")]
    Resolution {
        option: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Failed to read upload body: {0}")]
    Sniff(#[source] std::io::Error),

    #[error("Storage error: {0}")]
    Transport(#[from] StorageClientError),

    #[error("Transform '{id}' failed: {source}")]
    Transform {
        id: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Transform '{id}' task failed: {reason}")]
    TaskFailed { id: String, reason: String },
}

impl StorageError {
    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Resolution { .. } => "resolution",
            StorageError::Sniff(_) => "sniff",
            StorageError::Transport(_) => "transport",
            StorageError::Transform { .. } => "transform",
            StorageError::TaskFailed { .. } => "task",
        }
    }
}

/// Descriptor of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub field_name: String,
    pub original_name: String,
    pub encoding: String,
    /// Bytes stored, as last reported by upload progress
    pub size: u64,
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<ServerSideEncryption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sse_kms_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub location: String,
    pub etag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl StoredFile {
    pub(crate) fn new(info: &FileInfo, params: ObjectParams, output: UploadOutput, size: u64) -> Self {
        Self {
            field_name: info.field_name.clone(),
            original_name: info.original_name.clone(),
            encoding: info.encoding.clone(),
            size,
            bucket: params.bucket,
            key: params.key,
            acl: params.acl,
            content_type: params.content_type,
            content_disposition: params.content_disposition,
            content_encoding: params.content_encoding,
            storage_class: params.storage_class,
            server_side_encryption: params.server_side_encryption,
            sse_kms_key_id: params.sse_kms_key_id,
            metadata: params.metadata,
            location: output.location,
            etag: output.etag,
            version_id: output.version_id,
        }
    }
}

/// What one file became in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Single(StoredFile),
    /// One object per transform, keyed by transform id
    Transformed(BTreeMap<String, StoredFile>),
}

impl UploadOutcome {
    pub fn as_single(&self) -> Option<&StoredFile> {
        match self {
            UploadOutcome::Single(file) => Some(file),
            UploadOutcome::Transformed(_) => None,
        }
    }

    pub fn as_transformed(&self) -> Option<&BTreeMap<String, StoredFile>> {
        match self {
            UploadOutcome::Single(_) => None,
            UploadOutcome::Transformed(files) => Some(files),
        }
    }

    /// Every stored object
    pub fn files(&self) -> Vec<&StoredFile> {
        match self {
            UploadOutcome::Single(file) => vec![file],
            UploadOutcome::Transformed(files) => files.values().collect(),
        }
    }
}

/// Storage engine called by the multipart layer for each file part
#[async_trait::async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store one file. Consumes its body.
    async fn handle_file(
        &self,
        ctx: &RequestContext,
        file: IncomingFile,
    ) -> Result<UploadOutcome, StorageError>;

    /// Delete a previously stored file
    async fn remove_file(&self, ctx: &RequestContext, file: &StoredFile) -> Result<(), StorageError>;
}
