//! Per-file option resolution
//!
//! Every storage option is configured as an [`OptionValue`]: a constant, an
//! async resolver of `(request, file)`, or unset. [`StorageOptionsBuilder::build`]
//! normalizes each one into a uniform [`Resolver`] once, so the upload path
//! only ever calls resolvers.
//!
//! Defaults for unset options:
//!
//! | Option | Default |
//! |--------|---------|
//! | `bucket` | none, building fails |
//! | `key` | `key_prefix` plus a name chosen by [`KeyNaming`], 32 random hex characters by default |
//! | `acl` | `private` |
//! | `content_type` | `application/octet-stream` |
//! | `storage_class` | `STANDARD` |
//! | `should_transform` | `false` |
//! | everything else | not sent |
//!
//! # Example
//!
//! ```
//! use mizuchi_s3_engine::options::{Acl, ContentTypeOption, OptionValue, StorageOptions};
//!
//! let options = StorageOptions::builder()
//!     .bucket("uploads")
//!     .acl(Acl::PublicRead)
//!     .content_type(ContentTypeOption::Auto)
//!     .key(OptionValue::resolver(|_ctx, file| {
//!         let key = format!("avatars/{}", file.original_name);
//!         async move { Ok(key) }
//!     }))
//!     .build()
//!     .unwrap();
//! assert!(options.transforms().is_empty());
//! ```

pub mod types;

pub use crate::upload::key::KeyNaming;
pub use types::{Acl, Metadata, ServerSideEncryption, StorageClass, UnknownVariant};

use crate::file::{FileInfo, RequestContext};
use crate::s3::ObjectParams;
use crate::sniff;
use crate::stream::FileStream;
use crate::upload::key::KeyGenerator;
use crate::upload::transform::{Transform, TransformSpec};
use crate::upload::StorageError;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error type resolvers report failures with
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a resolver
pub type ResolveFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Async function of the current request and file
pub type Resolver<T> = Arc<dyn Fn(&RequestContext, &FileInfo) -> ResolveFuture<T> + Send + Sync>;

/// Content-type resolver. Takes ownership of the body and hands back the
/// body to upload, which may be a substitute carrying the same bytes.
pub type ContentTypeResolver = Arc<
    dyn Fn(&RequestContext, &FileInfo, FileStream) -> BoxFuture<'static, Result<(String, FileStream), BoxError>>
        + Send
        + Sync,
>;

/// Errors raised while building options. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Expected {field} to be {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// How one option is configured
pub enum OptionValue<T> {
    Unset,
    Constant(T),
    Resolver(Resolver<T>),
}

impl<T> OptionValue<T> {
    /// Wrap an async function of the request and file
    pub fn resolver<F, Fut>(f: F) -> Self
    where
        F: Fn(&RequestContext, &FileInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        OptionValue::Resolver(Arc::new(move |ctx, file| f(ctx, file).boxed()))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, OptionValue::Unset)
    }
}

impl<T> Default for OptionValue<T> {
    fn default() -> Self {
        OptionValue::Unset
    }
}

impl<T> From<T> for OptionValue<T> {
    fn from(value: T) -> Self {
        OptionValue::Constant(value)
    }
}

impl From<&str> for OptionValue<String> {
    fn from(value: &str) -> Self {
        OptionValue::Constant(value.to_string())
    }
}

impl<T: fmt::Debug> fmt::Debug for OptionValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Unset => f.write_str("Unset"),
            OptionValue::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            OptionValue::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// How the content type of an upload is determined
#[derive(Default)]
pub enum ContentTypeOption {
    /// Always `application/octet-stream`
    #[default]
    Default,
    /// Sniff the first chunk of the body
    Auto,
    Constant(String),
    Resolver(ContentTypeResolver),
}

impl ContentTypeOption {
    /// Resolver that only computes a value; the body passes through untouched
    pub fn resolver<F, Fut>(f: F) -> Self
    where
        F: Fn(&RequestContext, &FileInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, BoxError>> + Send + 'static,
    {
        ContentTypeOption::Resolver(Arc::new(move |ctx, file, body| {
            let fut = f(ctx, file);
            async move { Ok((fut.await?, body)) }.boxed()
        }))
    }

    /// Resolver that consumes the body and returns a replacement for it
    pub fn body_resolver<F, Fut>(f: F) -> Self
    where
        F: Fn(&RequestContext, &FileInfo, FileStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(String, FileStream), BoxError>> + Send + 'static,
    {
        ContentTypeOption::Resolver(Arc::new(move |ctx, file, body| f(ctx, file, body).boxed()))
    }
}

impl From<&str> for ContentTypeOption {
    fn from(value: &str) -> Self {
        ContentTypeOption::Constant(value.to_string())
    }
}

impl From<String> for ContentTypeOption {
    fn from(value: String) -> Self {
        ContentTypeOption::Constant(value)
    }
}

impl fmt::Debug for ContentTypeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentTypeOption::Default => f.write_str("Default"),
            ContentTypeOption::Auto => f.write_str("Auto"),
            ContentTypeOption::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            ContentTypeOption::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

#[derive(Clone)]
enum ContentTypeSource {
    Fixed(String),
    Sniff,
    Resolver(ContentTypeResolver),
}

/// Resolver that yields `value`. Completion is always deferred to a later
/// poll, never returned synchronously.
pub(crate) fn constant<T>(value: T) -> Resolver<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |_, _| {
        let value = value.clone();
        async move {
            tokio::task::yield_now().await;
            Ok(value)
        }
        .boxed()
    })
}

fn optional<T>(value: OptionValue<T>, default: Option<T>) -> Resolver<Option<T>>
where
    T: Clone + Send + Sync + 'static,
{
    match value {
        OptionValue::Unset => constant(default),
        OptionValue::Constant(v) => constant(Some(v)),
        OptionValue::Resolver(f) => Arc::new(move |ctx, file| {
            let fut = f(ctx, file);
            async move { fut.await.map(Some) }.boxed()
        }),
    }
}

pub(crate) fn non_empty_constant(
    value: OptionValue<String>,
    field: &'static str,
) -> Result<OptionValue<String>, ConfigurationError> {
    match value {
        OptionValue::Constant(v) if v.trim().is_empty() => Err(ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: "must not be empty".into(),
        }),
        other => Ok(other),
    }
}

/// Immutable, normalized option set shared by every upload
#[derive(Clone)]
pub struct StorageOptions {
    bucket: Resolver<String>,
    key: Resolver<String>,
    acl: Resolver<Option<Acl>>,
    content_type: ContentTypeSource,
    metadata: Resolver<Option<Metadata>>,
    cache_control: Resolver<Option<String>>,
    content_disposition: Resolver<Option<String>>,
    content_encoding: Resolver<Option<String>>,
    storage_class: Resolver<Option<StorageClass>>,
    server_side_encryption: Resolver<Option<ServerSideEncryption>>,
    sse_kms_key_id: Resolver<Option<String>>,
    should_transform: Resolver<bool>,
    transforms: Vec<Transform>,
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageOptions")
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the options resolved for one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub bucket: String,
    pub key: String,
    pub acl: Option<Acl>,
    pub metadata: Option<Metadata>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub storage_class: Option<StorageClass>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub sse_kms_key_id: Option<String>,
    pub should_transform: bool,
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl ResolvedOptions {
    /// Request parameters for one object. Absent and empty values are left
    /// out so the service applies its own defaults.
    pub fn object_params(&self, key: String, content_type: String) -> ObjectParams {
        ObjectParams {
            bucket: self.bucket.clone(),
            key,
            content_type,
            acl: self.acl,
            metadata: self.metadata.clone().filter(|m| !m.is_empty()),
            cache_control: present(&self.cache_control),
            content_disposition: present(&self.content_disposition),
            content_encoding: present(&self.content_encoding),
            storage_class: self.storage_class,
            server_side_encryption: self.server_side_encryption,
            sse_kms_key_id: present(&self.sse_kms_key_id),
        }
    }
}

async fn run<T>(
    option: &'static str,
    resolver: &Resolver<T>,
    ctx: &RequestContext,
    file: &FileInfo,
) -> Result<T, StorageError> {
    resolver(ctx, file)
        .await
        .map_err(|source| StorageError::Resolution { option, source })
}

pub(crate) fn require_non_empty(option: &'static str, value: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::Resolution {
            option,
            source: "resolved to an empty value".into(),
        });
    }
    Ok(())
}

impl StorageOptions {
    pub fn builder() -> StorageOptionsBuilder {
        StorageOptionsBuilder::default()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Run every option resolver concurrently.
    ///
    /// The first failure aborts the whole resolution.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        file: &FileInfo,
    ) -> Result<ResolvedOptions, StorageError> {
        let (
            bucket,
            key,
            acl,
            metadata,
            cache_control,
            content_disposition,
            content_encoding,
            storage_class,
            server_side_encryption,
            sse_kms_key_id,
            should_transform,
        ) = tokio::try_join!(
            run("bucket", &self.bucket, ctx, file),
            run("key", &self.key, ctx, file),
            run("acl", &self.acl, ctx, file),
            run("metadata", &self.metadata, ctx, file),
            run("cache_control", &self.cache_control, ctx, file),
            run("content_disposition", &self.content_disposition, ctx, file),
            run("content_encoding", &self.content_encoding, ctx, file),
            run("storage_class", &self.storage_class, ctx, file),
            run("server_side_encryption", &self.server_side_encryption, ctx, file),
            run("sse_kms_key_id", &self.sse_kms_key_id, ctx, file),
            run("should_transform", &self.should_transform, ctx, file),
        )?;

        require_non_empty("bucket", &bucket)?;
        require_non_empty("key", &key)?;

        Ok(ResolvedOptions {
            bucket,
            key,
            acl,
            metadata,
            cache_control,
            content_disposition,
            content_encoding,
            storage_class,
            server_side_encryption,
            sse_kms_key_id,
            should_transform,
        })
    }

    /// Determine the content type, returning the body to upload
    pub async fn resolve_content_type(
        &self,
        ctx: &RequestContext,
        file: &FileInfo,
        body: FileStream,
    ) -> Result<(String, FileStream), StorageError> {
        match &self.content_type {
            ContentTypeSource::Fixed(content_type) => Ok((content_type.clone(), body)),
            ContentTypeSource::Sniff => {
                let (mime, body) = sniff::sniff(body).await.map_err(StorageError::Sniff)?;
                Ok((mime.to_string(), body))
            }
            ContentTypeSource::Resolver(f) => {
                let (content_type, body) =
                    f(ctx, file, body)
                        .await
                        .map_err(|source| StorageError::Resolution {
                            option: "content_type",
                            source,
                        })?;
                require_non_empty("content_type", &content_type)?;
                Ok((content_type, body))
            }
        }
    }
}

/// Builder for [`StorageOptions`]
#[derive(Debug, Default)]
pub struct StorageOptionsBuilder {
    bucket: OptionValue<String>,
    key: OptionValue<String>,
    key_prefix: Option<String>,
    key_naming: KeyNaming,
    acl: OptionValue<Acl>,
    content_type: ContentTypeOption,
    metadata: OptionValue<Metadata>,
    cache_control: OptionValue<String>,
    content_disposition: OptionValue<String>,
    content_encoding: OptionValue<String>,
    storage_class: OptionValue<StorageClass>,
    server_side_encryption: OptionValue<ServerSideEncryption>,
    sse_kms_key_id: OptionValue<String>,
    should_transform: OptionValue<bool>,
    transforms: Vec<TransformSpec>,
}

impl StorageOptionsBuilder {
    pub fn bucket(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.bucket = value.into();
        self
    }

    pub fn key(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.key = value.into();
        self
    }

    /// Prefix for generated keys. Has no effect when a key is configured.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// How generated keys are named. Cannot be combined with a configured key.
    pub fn key_naming(mut self, naming: KeyNaming) -> Self {
        self.key_naming = naming;
        self
    }

    pub fn acl(mut self, value: impl Into<OptionValue<Acl>>) -> Self {
        self.acl = value.into();
        self
    }

    pub fn content_type(mut self, value: impl Into<ContentTypeOption>) -> Self {
        self.content_type = value.into();
        self
    }

    pub fn metadata(mut self, value: impl Into<OptionValue<Metadata>>) -> Self {
        self.metadata = value.into();
        self
    }

    pub fn cache_control(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.cache_control = value.into();
        self
    }

    pub fn content_disposition(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.content_disposition = value.into();
        self
    }

    pub fn content_encoding(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.content_encoding = value.into();
        self
    }

    pub fn storage_class(mut self, value: impl Into<OptionValue<StorageClass>>) -> Self {
        self.storage_class = value.into();
        self
    }

    pub fn server_side_encryption(
        mut self,
        value: impl Into<OptionValue<ServerSideEncryption>>,
    ) -> Self {
        self.server_side_encryption = value.into();
        self
    }

    pub fn sse_kms_key_id(mut self, value: impl Into<OptionValue<String>>) -> Self {
        self.sse_kms_key_id = value.into();
        self
    }

    pub fn should_transform(mut self, value: impl Into<OptionValue<bool>>) -> Self {
        self.should_transform = value.into();
        self
    }

    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.transforms.push(spec);
        self
    }

    pub fn transforms(mut self, specs: impl IntoIterator<Item = TransformSpec>) -> Self {
        self.transforms.extend(specs);
        self
    }

    /// Validate and normalize every option
    pub fn build(self) -> Result<StorageOptions, ConfigurationError> {
        let bucket = match non_empty_constant(self.bucket, "bucket") {
            Ok(OptionValue::Unset) | Err(_) => return Err(ConfigurationError::MissingField("bucket")),
            Ok(OptionValue::Constant(bucket)) => constant(bucket),
            Ok(OptionValue::Resolver(f)) => f,
        };

        if let KeyNaming::FixedName(name) = &self.key_naming {
            if name.trim().is_empty() {
                return Err(ConfigurationError::InvalidValue {
                    field: "filename".into(),
                    reason: "must not be empty".into(),
                });
            }
        }
        if self.key_naming != KeyNaming::Random && !self.key.is_unset() {
            return Err(ConfigurationError::InvalidValue {
                field: "key".into(),
                reason: "cannot be combined with a key naming mode".into(),
            });
        }

        let key_generator = KeyGenerator::new(self.key_prefix).with_naming(self.key_naming);
        let key = match non_empty_constant(self.key, "key")? {
            OptionValue::Unset => key_generator.clone().into_resolver(),
            OptionValue::Constant(key) => constant(key),
            OptionValue::Resolver(f) => f,
        };

        let content_type = match self.content_type {
            ContentTypeOption::Default => {
                ContentTypeSource::Fixed(sniff::DEFAULT_CONTENT_TYPE.to_string())
            }
            ContentTypeOption::Auto => ContentTypeSource::Sniff,
            ContentTypeOption::Constant(v) if v.trim().is_empty() => {
                return Err(ConfigurationError::InvalidValue {
                    field: "content_type".into(),
                    reason: "must not be empty".into(),
                })
            }
            ContentTypeOption::Constant(v) => ContentTypeSource::Fixed(v),
            ContentTypeOption::Resolver(f) => ContentTypeSource::Resolver(f),
        };

        let should_transform = match self.should_transform {
            OptionValue::Unset => constant(false),
            OptionValue::Constant(flag) => constant(flag),
            OptionValue::Resolver(f) => f,
        };

        let transforms = self
            .transforms
            .into_iter()
            .enumerate()
            .map(|(index, spec)| spec.build(index, &key_generator.random()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for transform in &transforms {
            if !seen.insert(transform.id()) {
                return Err(ConfigurationError::InvalidValue {
                    field: "transforms".into(),
                    reason: format!("duplicate transform id '{}'", transform.id()),
                });
            }
        }

        Ok(StorageOptions {
            bucket,
            key,
            acl: optional(self.acl, Some(Acl::Private)),
            content_type,
            metadata: optional(self.metadata, None),
            cache_control: optional(self.cache_control, None),
            content_disposition: optional(self.content_disposition, None),
            content_encoding: optional(self.content_encoding, None),
            storage_class: optional(self.storage_class, Some(StorageClass::Standard)),
            server_side_encryption: optional(self.server_side_encryption, None),
            sse_kms_key_id: optional(self.sse_kms_key_id, None),
            should_transform,
            transforms,
        })
    }
}
