//! Transform fan-out
//!
//! A transform stores a derived variant of the upload (a thumbnail, a
//! re-encoded copy, the untouched original) under its own key. When
//! `should_transform` resolves true, every configured transform runs against
//! its own copy of the body, produced by [`crate::stream::tee`], and uploads
//! independently. Results are keyed by transform id.
//!
//! # Example
//!
//! ```
//! use mizuchi_s3_engine::options::{OptionValue, StorageOptions};
//! use mizuchi_s3_engine::upload::transform::TransformSpec;
//!
//! let options = StorageOptions::builder()
//!     .bucket("media")
//!     .should_transform(true)
//!     .transform(TransformSpec::identity().id("original").key("media/original"))
//!     .transform(
//!         TransformSpec::map(|body| body)
//!             .id("thumbnail")
//!             .key(OptionValue::resolver(|_, file| {
//!                 let key = format!("thumbs/{}", file.original_name);
//!                 async move { Ok(key) }
//!             }))
//!             .content_type("image/jpeg"),
//!     )
//!     .build()
//!     .unwrap();
//! assert_eq!(options.transforms().len(), 2);
//! ```

use super::engine::store_object;
use super::key::KeyGenerator;
use super::{StorageError, StoredFile};
use crate::file::{FileInfo, RequestContext};
use crate::metrics;
use crate::options::{
    constant, non_empty_constant, require_non_empty, BoxError, ConfigurationError, OptionValue,
    ResolveFuture, ResolvedOptions, Resolver,
};
use crate::s3::ObjectStore;
use crate::stream::{self, FileStream};
use futures::future::{try_join_all, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Stream transducer applied to one copy of the body
pub type Transducer = Box<dyn FnOnce(FileStream) -> FileStream + Send>;

/// Produces a fresh transducer for each upload
pub type TransducerFactory =
    Arc<dyn Fn(&RequestContext, &FileInfo) -> ResolveFuture<Transducer> + Send + Sync>;

/// Configuration of one transform, as passed to the options builder
pub struct TransformSpec {
    id: Option<String>,
    key: OptionValue<String>,
    content_type: OptionValue<String>,
    transducer: TransducerFactory,
}

impl TransformSpec {
    /// Transform whose transducer is produced per upload by `factory`
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(&RequestContext, &FileInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Transducer, BoxError>> + Send + 'static,
    {
        Self {
            id: None,
            key: OptionValue::Unset,
            content_type: OptionValue::Unset,
            transducer: Arc::new(move |ctx, file| factory(ctx, file).boxed()),
        }
    }

    /// Transform applying the same stream function to every upload
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(FileStream) -> FileStream + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |_, _| {
            let f = Arc::clone(&f);
            async move { Ok(Box::new(move |body| f(body)) as Transducer) }
        })
    }

    /// Transform that stores the body unchanged
    pub fn identity() -> Self {
        Self::map(|body| body)
    }

    /// Result key for this transform. Defaults to its position in the list.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Object key. Generated like the top-level key when unset.
    pub fn key(mut self, key: impl Into<OptionValue<String>>) -> Self {
        self.key = key.into();
        self
    }

    /// Content type. Falls back to the top-level content type when unset.
    pub fn content_type(mut self, content_type: impl Into<OptionValue<String>>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub(crate) fn build(
        self,
        index: usize,
        key_generator: &KeyGenerator,
    ) -> Result<Transform, ConfigurationError> {
        let id = match self.id {
            Some(id) if id.is_empty() => {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("transforms[{}].id", index),
                    reason: "must not be empty".into(),
                })
            }
            Some(id) => id,
            None => index.to_string(),
        };

        let key = match non_empty_constant(self.key, "transforms.key")? {
            OptionValue::Unset => key_generator.clone().into_resolver(),
            OptionValue::Constant(key) => constant(key),
            OptionValue::Resolver(f) => f,
        };

        let content_type = match non_empty_constant(self.content_type, "transforms.content_type")? {
            OptionValue::Unset => None,
            OptionValue::Constant(v) => Some(constant(v)),
            OptionValue::Resolver(f) => Some(f),
        };

        Ok(Transform {
            id,
            key,
            content_type,
            transducer: self.transducer,
        })
    }
}

impl fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformSpec")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Normalized transform, shared by every upload
#[derive(Clone)]
pub struct Transform {
    id: String,
    key: Resolver<String>,
    content_type: Option<Resolver<String>>,
    transducer: TransducerFactory,
}

impl Transform {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn failed(id: &str, source: StorageError) -> StorageError {
    StorageError::Transform {
        id: id.to_string(),
        source: Box::new(source),
    }
}

/// Per-file state shared by every transform task
struct FanOutContext {
    ctx: RequestContext,
    info: FileInfo,
    resolved: ResolvedOptions,
    content_type: String,
    store: Arc<dyn ObjectStore>,
}

async fn run_transform(
    transform: Transform,
    key: String,
    body: FileStream,
    shared: Arc<FanOutContext>,
) -> Result<StoredFile, StorageError> {
    let FanOutContext { ctx, info, .. } = shared.as_ref();
    let content_type = match &transform.content_type {
        Some(resolver) => {
            let content_type = resolver(ctx, info)
                .await
                .map_err(|source| StorageError::Resolution {
                    option: "content_type",
                    source,
                })?;
            require_non_empty("content_type", &content_type)?;
            content_type
        }
        None => shared.content_type.clone(),
    };

    let transducer = (transform.transducer)(ctx, info)
        .await
        .map_err(|source| StorageError::Resolution {
            option: "transducer",
            source,
        })?;

    let params = shared.resolved.object_params(key, content_type);
    store_object(shared.store.as_ref(), params, transducer(body), info).await
}

/// Upload every transform of one file.
///
/// Returns on the first failure. Transform uploads still in flight at that
/// point keep running detached; their results are discarded.
pub(crate) async fn fan_out(
    transforms: &[Transform],
    ctx: &RequestContext,
    info: &FileInfo,
    resolved: &ResolvedOptions,
    content_type: &str,
    body: FileStream,
    store: Arc<dyn ObjectStore>,
) -> Result<BTreeMap<String, StoredFile>, StorageError> {
    let keys = try_join_all(transforms.iter().map(|transform| async move {
        let key = (transform.key)(ctx, info).await.map_err(|source| {
            failed(
                &transform.id,
                StorageError::Resolution {
                    option: "key",
                    source,
                },
            )
        })?;
        require_non_empty("key", &key).map_err(|e| failed(&transform.id, e))?;
        Ok::<_, StorageError>(key)
    }))
    .await?;

    let bodies = stream::tee(body, transforms.len());
    let shared = Arc::new(FanOutContext {
        ctx: ctx.clone(),
        info: info.clone(),
        resolved: resolved.clone(),
        content_type: content_type.to_string(),
        store,
    });

    let mut pending: FuturesUnordered<_> = transforms
        .iter()
        .zip(keys)
        .zip(bodies)
        .map(|((transform, key), body)| {
            let id = transform.id.clone();
            let span = tracing::info_span!("engine.transform", transform.id = %id, s3.key = %key);
            let handle = tokio::spawn(
                run_transform(transform.clone(), key, body, Arc::clone(&shared)).instrument(span),
            );
            async move { (id, handle.await) }
        })
        .collect();

    let mut results = BTreeMap::new();
    while let Some((id, joined)) = pending.next().await {
        match joined {
            Ok(Ok(file)) => {
                metrics::record_transform_upload(&id, true);
                results.insert(id, file);
            }
            Ok(Err(e)) => {
                metrics::record_transform_upload(&id, false);
                if !pending.is_empty() {
                    tracing::warn!(
                        transform.id = %id,
                        in_flight = pending.len(),
                        "Transform failed, abandoning remaining transform uploads"
                    );
                }
                return Err(failed(&id, e));
            }
            Err(join_error) => {
                metrics::record_transform_upload(&id, false);
                return Err(StorageError::TaskFailed {
                    id,
                    reason: join_error.to_string(),
                });
            }
        }
    }

    Ok(results)
}
