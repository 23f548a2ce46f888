//! Classification of the raw `storage` section into engine options
//!
//! Every field is checked against its expected YAML type; a mismatch is a
//! [`ConfigurationError::TypeMismatch`] naming the field.

use crate::options::{
    Acl, ConfigurationError, ContentTypeOption, KeyNaming, Metadata, ServerSideEncryption,
    StorageClass, StorageOptions, StorageOptionsBuilder, UnknownVariant,
};
use serde_yaml::{Mapping, Value};
use std::str::FromStr;

const FIELDS: &[&str] = &[
    "bucket",
    "key",
    "key_prefix",
    "original_name",
    "filename",
    "acl",
    "content_type",
    "metadata",
    "cache_control",
    "content_disposition",
    "content_encoding",
    "storage_class",
    "server_side_encryption",
    "sse_kms_key_id",
    "should_transform",
];

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn mismatch(field: impl Into<String>, expected: &'static str, value: &Value) -> ConfigurationError {
    ConfigurationError::TypeMismatch {
        field: field.into(),
        expected,
        found: kind(value),
    }
}

struct Section<'a> {
    fields: &'a Mapping,
}

impl<'a> Section<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    fn string(&self, name: &str) -> Result<Option<String>, ConfigurationError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(mismatch(name, "a string", other)),
        }
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr<Err = UnknownVariant>,
    {
        self.string(name)?
            .map(|s| {
                s.parse().map_err(|e: UnknownVariant| ConfigurationError::InvalidValue {
                    field: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn boolean(&self, name: &str) -> Result<Option<bool>, ConfigurationError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(mismatch(name, "a boolean", other)),
        }
    }

    fn metadata(&self, name: &str) -> Result<Option<Metadata>, ConfigurationError> {
        let entries = match self.get(name) {
            None => return Ok(None),
            Some(Value::Mapping(entries)) => entries,
            Some(other) => return Err(mismatch(name, "a mapping", other)),
        };

        let mut metadata = Metadata::new();
        for (k, v) in entries {
            let k = match k {
                Value::String(k) => k,
                other => return Err(mismatch(format!("{}.<key>", name), "a string", other)),
            };
            match v {
                Value::String(v) => metadata.insert(k.clone(), v.clone()),
                other => return Err(mismatch(format!("{}.{}", name, k), "a string", other)),
            };
        }
        Ok(Some(metadata))
    }
}

/// Classify a raw `storage` section.
///
/// Returns a builder so callers can still attach resolvers and transforms
/// before building. A null section yields an empty builder.
pub fn storage_options(value: &Value) -> Result<StorageOptionsBuilder, ConfigurationError> {
    let fields = match value {
        Value::Null => return Ok(StorageOptions::builder()),
        Value::Mapping(fields) => fields,
        other => return Err(mismatch("storage", "a mapping", other)),
    };

    for name in fields.keys() {
        match name.as_str() {
            Some(name) if FIELDS.contains(&name) => {}
            Some(name) => {
                return Err(ConfigurationError::InvalidValue {
                    field: name.to_string(),
                    reason: "unknown storage option".into(),
                })
            }
            None => return Err(mismatch("storage.<key>", "a string", name)),
        }
    }

    let section = Section { fields };
    let mut builder = StorageOptions::builder();

    if let Some(bucket) = section.string("bucket")? {
        builder = builder.bucket(bucket);
    }
    if let Some(key) = section.string("key")? {
        builder = builder.key(key);
    }
    if let Some(prefix) = section.string("key_prefix")? {
        builder = builder.key_prefix(prefix);
    }
    let filename = section.string("filename")?;
    match (section.boolean("original_name")?, filename) {
        (Some(true), Some(_)) => {
            return Err(ConfigurationError::InvalidValue {
                field: "filename".into(),
                reason: "cannot be combined with original_name".into(),
            })
        }
        (Some(true), None) => builder = builder.key_naming(KeyNaming::OriginalName),
        (_, Some(name)) => builder = builder.key_naming(KeyNaming::FixedName(name)),
        (_, None) => {}
    }
    if let Some(acl) = section.parsed::<Acl>("acl")? {
        builder = builder.acl(acl);
    }
    if let Some(content_type) = section.string("content_type")? {
        builder = builder.content_type(match content_type.as_str() {
            "default" => ContentTypeOption::Default,
            "auto" => ContentTypeOption::Auto,
            _ => ContentTypeOption::Constant(content_type),
        });
    }
    if let Some(metadata) = section.metadata("metadata")? {
        builder = builder.metadata(metadata);
    }
    if let Some(v) = section.string("cache_control")? {
        builder = builder.cache_control(v);
    }
    if let Some(v) = section.string("content_disposition")? {
        builder = builder.content_disposition(v);
    }
    if let Some(v) = section.string("content_encoding")? {
        builder = builder.content_encoding(v);
    }
    if let Some(class) = section.parsed::<StorageClass>("storage_class")? {
        builder = builder.storage_class(class);
    }
    if let Some(sse) = section.parsed::<ServerSideEncryption>("server_side_encryption")? {
        builder = builder.server_side_encryption(sse);
    }
    if let Some(v) = section.string("sse_kms_key_id")? {
        builder = builder.sse_kms_key_id(v);
    }
    if let Some(flag) = section.boolean("should_transform")? {
        builder = builder.should_transform(flag);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileInfo, RequestContext};

    fn classify(yaml: &str) -> Result<StorageOptionsBuilder, ConfigurationError> {
        storage_options(&serde_yaml::from_str(yaml).unwrap())
    }

    #[tokio::test]
    async fn test_full_section() {
        let options = classify(
            r#"
bucket: uploads
key: fixed/key.bin
acl: public-read
storage_class: STANDARD_IA
server_side_encryption: aws:kms
sse_kms_key_id: key-1
cache_control: max-age=3600
metadata:
  owner: ops
should_transform: false
"#,
        )
        .unwrap()
        .build()
        .unwrap();

        let resolved = options
            .resolve(&RequestContext::new(), &FileInfo::new("f", "a"))
            .await
            .unwrap();
        assert_eq!(resolved.bucket, "uploads");
        assert_eq!(resolved.key, "fixed/key.bin");
        assert_eq!(resolved.acl, Some(Acl::PublicRead));
        assert_eq!(resolved.storage_class, Some(StorageClass::StandardIa));
        assert_eq!(resolved.server_side_encryption, Some(ServerSideEncryption::AwsKms));
        assert_eq!(resolved.sse_kms_key_id.as_deref(), Some("key-1"));
        assert_eq!(resolved.cache_control.as_deref(), Some("max-age=3600"));
        assert_eq!(resolved.metadata.unwrap()["owner"], "ops");
    }

    async fn key_for(yaml: &str, original_name: &str) -> String {
        classify(yaml)
            .unwrap()
            .build()
            .unwrap()
            .resolve(&RequestContext::new(), &FileInfo::new("f", original_name))
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn test_original_name_key() {
        let yaml = "bucket: b\nkey_prefix: incoming/\noriginal_name: true";
        assert_eq!(key_for(yaml, "cat.png").await, "incoming/cat.png");
    }

    #[tokio::test]
    async fn test_filename_keeps_original_extension() {
        let yaml = "bucket: b\nkey_prefix: avatars/\nfilename: avatar";
        assert_eq!(key_for(yaml, "me.jpeg").await, "avatars/avatar.jpeg");
        assert_eq!(key_for(yaml, "me").await, "avatars/avatar");
    }

    #[tokio::test]
    async fn test_original_name_false_keeps_random_keys() {
        let key = key_for("bucket: b\noriginal_name: false", "cat.png").await;
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn test_key_naming_conflicts() {
        let err = classify("bucket: b\noriginal_name: true\nfilename: avatar").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref field, .. } if field == "filename"));

        let err = classify("bucket: b\nkey: fixed.bin\noriginal_name: true")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref field, .. } if field == "key"));

        let err = classify("bucket: b\noriginal_name: \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::TypeMismatch { ref field, .. } if field == "original_name"));
    }

    #[test]
    fn test_numeric_bucket_is_type_mismatch() {
        let err = classify("bucket: 12").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::TypeMismatch {
                field: "bucket".into(),
                expected: "a string",
                found: "a number",
            }
        );
        assert_eq!(err.to_string(), "Expected bucket to be a string, found a number");
    }

    #[test]
    fn test_string_flag_is_type_mismatch() {
        let err = classify("bucket: b\nshould_transform: \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::TypeMismatch { ref field, .. } if field == "should_transform"));
    }

    #[test]
    fn test_metadata_values_must_be_strings() {
        let err = classify("bucket: b\nmetadata:\n  version: 2").unwrap_err();
        assert!(matches!(err, ConfigurationError::TypeMismatch { ref field, .. } if field == "metadata.version"));
    }

    #[test]
    fn test_unknown_acl() {
        let err = classify("bucket: b\nacl: everyone").unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for acl: unknown acl 'everyone'");
    }

    #[test]
    fn test_unknown_field() {
        let err = classify("bucket: b\nbukket: c").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref field, .. } if field == "bukket"));
    }

    #[test]
    fn test_null_section_requires_bucket_at_build() {
        let builder = storage_options(&Value::Null).unwrap();
        assert_eq!(builder.build().unwrap_err(), ConfigurationError::MissingField("bucket"));
    }

    #[test]
    fn test_non_mapping_section() {
        let err = classify("- bucket").unwrap_err();
        assert!(matches!(err, ConfigurationError::TypeMismatch { ref field, .. } if field == "storage"));
    }
}
