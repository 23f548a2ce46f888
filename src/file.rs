//! Request and file descriptors handed over by the multipart layer

use crate::stream::FileStream;
use std::collections::HashMap;
use std::fmt;

/// Request-scoped data passed through to option resolvers.
///
/// The engine never inspects it; resolvers use it for per-request decisions
/// (tenant prefixes, user ids, form fields parsed ahead of the file).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub headers: HashMap<String, String>,
    pub fields: HashMap<String, String>,
}

impl RequestContext {
    /// Create a context with a fresh request id
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Header lookup, case-insensitive on the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Descriptor of one file part of a multipart request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Form field the file was submitted under
    pub field_name: String,
    /// File name as sent by the client
    pub original_name: String,
    /// Transfer encoding of the part
    pub encoding: String,
    /// MIME type declared by the client (not trusted for storage)
    pub mime_type: String,
}

impl FileInfo {
    pub fn new(field_name: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            original_name: original_name.into(),
            encoding: "7bit".to_string(),
            mime_type: crate::sniff::DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// A file part with its body still unread
pub struct IncomingFile {
    pub info: FileInfo,
    pub stream: FileStream,
}

impl IncomingFile {
    pub fn new(info: FileInfo, stream: FileStream) -> Self {
        Self { info, stream }
    }
}

impl fmt::Debug for IncomingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingFile")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let ctx = RequestContext::new().with_header("X-Tenant-Id", "acme");
        assert_eq!(ctx.header("x-tenant-id"), Some("acme"));
        assert_eq!(ctx.header("X-TENANT-ID"), Some("acme"));
        assert!(!ctx.request_id.is_empty());
    }
}
