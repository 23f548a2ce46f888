//! Content-type sniffing
//!
//! Classifies an upload from its first chunk and hands back a body that still
//! carries every byte. Signature matching is delegated to `infer`; SVG, which
//! has no byte signature, is detected by [`svg::is_svg`].
//!
//! Only the first chunk is inspected. Content whose distinguishing marker sits
//! beyond the first chunk is reported as [`DEFAULT_CONTENT_TYPE`].
//!
//! # Example
//!
//! ```
//! use mizuchi_s3_engine::sniff::{sniff, PNG_SIGNATURE};
//! use mizuchi_s3_engine::stream::{collect, from_bytes};
//!
//! # async fn example() -> std::io::Result<()> {
//! let (mime, body) = sniff(from_bytes(PNG_SIGNATURE.to_vec())).await?;
//! assert_eq!(mime, "image/png");
//! assert_eq!(&collect(body).await?[..], PNG_SIGNATURE);
//! # Ok(())
//! # }
//! ```

pub mod svg;

use crate::stream::{self, FileStream, ReplayStream};
use futures::StreamExt;
use std::io;

/// Fallback for content nothing recognises
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type reported for SVG documents
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// PNG file signature
pub const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Classify a leading chunk of content
pub fn classify(chunk: &[u8]) -> &'static str {
    match infer::get(chunk) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Text => kind.mime_type(),
        _ if svg::is_svg(chunk) => SVG_CONTENT_TYPE,
        Some(kind) => kind.mime_type(),
        None => DEFAULT_CONTENT_TYPE,
    }
}

/// Read the first chunk of `body`, classify it, and return the content type
/// together with a stream replaying the full body.
///
/// Empty chunks are skipped. An empty body classifies as
/// [`DEFAULT_CONTENT_TYPE`].
#[tracing::instrument(name = "sniff.content_type", skip(body), fields(sniff.mime = tracing::field::Empty), err)]
pub async fn sniff(mut body: FileStream) -> io::Result<(&'static str, FileStream)> {
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }

        let mime = classify(&chunk);
        tracing::Span::current().record("sniff.mime", mime);
        tracing::debug!(mime = mime, first_chunk_bytes = chunk.len(), "Sniffed content type");
        crate::metrics::record_sniffed_type(mime);

        return Ok((mime, Box::pin(ReplayStream::new(chunk, body))));
    }

    tracing::debug!("Empty body, using default content type");
    Ok((DEFAULT_CONTENT_TYPE, stream::from_bytes(bytes::Bytes::new())))
}
