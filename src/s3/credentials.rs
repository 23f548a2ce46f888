//! S3 Credentials Module
//!
//! Static credentials come from the client configuration. When none are
//! configured the store falls back to the SDK's default provider chain.
//!
//! # Example
//!
//! ```
//! use mizuchi_s3_engine::s3::{Credentials, CredentialsProvider, S3ClientConfig};
//!
//! let mut config = S3ClientConfig::new("us-east-1");
//! config.access_key = Some("access-key".into());
//! config.secret_key = Some("secret-key".into());
//!
//! let creds = CredentialsProvider::from_config(&config).unwrap().unwrap();
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! ```

use super::S3ClientConfig;
use thiserror::Error;

/// Provider name reported to the SDK for configured credentials
const PROVIDER_NAME: &str = "mizuchi-config";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Credentials for AWS authentication
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            session_token: Some(session_token.into()),
            ..Self::new(access_key_id, secret_access_key)
        }
    }

    /// Get the access key ID
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Get the session token (if any)
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Convert into an SDK credentials provider
    pub fn into_provider(self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            self.access_key_id,
            self.secret_access_key,
            self.session_token,
            None,
            PROVIDER_NAME,
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Factory for configured credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from the client config.
    ///
    /// Returns `Ok(None)` when neither key is set. Setting only one of the
    /// pair is an error.
    pub fn from_config(config: &S3ClientConfig) -> Result<Option<Credentials>, CredentialsError> {
        match (&config.access_key, &config.secret_key) {
            (None, None) => Ok(None),
            (Some(access_key), Some(secret_key)) => {
                if access_key.is_empty() || secret_key.is_empty() {
                    return Err(CredentialsError::InvalidCredentials(
                        "access_key and secret_key must not be empty".into(),
                    ));
                }
                Ok(Some(match &config.session_token {
                    Some(token) => Credentials::with_session_token(access_key, secret_key, token),
                    None => Credentials::new(access_key, secret_key),
                }))
            }
            (None, Some(_)) => Err(CredentialsError::MissingCredentials(
                "access_key not set in config".into(),
            )),
            (Some(_), None) => Err(CredentialsError::MissingCredentials(
                "secret_key not set in config".into(),
            )),
        }
    }
}
