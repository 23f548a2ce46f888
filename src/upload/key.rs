//! Object key generation

use crate::file::FileInfo;
use crate::options::Resolver;
use futures::FutureExt;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;

/// Random bytes per generated key
pub const KEY_BYTES: usize = 16;

/// 16 cryptographically random bytes as 32 lowercase hex characters
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// How the name part of a generated key is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyNaming {
    /// A fresh random hex name per object
    #[default]
    Random,
    /// The file name the client sent, as is
    OriginalName,
    /// A fixed name, followed by the extension of the client's file name
    FixedName(String),
}

/// Key generator used when no key is configured
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    prefix: Option<String>,
    naming: KeyNaming,
}

impl KeyGenerator {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
            naming: KeyNaming::Random,
        }
    }

    pub fn with_naming(mut self, naming: KeyNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Same prefix, random names
    pub(crate) fn random(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            naming: KeyNaming::Random,
        }
    }

    pub fn generate(&self, file: &FileInfo) -> String {
        let name = match &self.naming {
            KeyNaming::Random => generate_key(),
            KeyNaming::OriginalName => file.original_name.clone(),
            KeyNaming::FixedName(name) => {
                match Path::new(&file.original_name).extension().and_then(|e| e.to_str()) {
                    Some(extension) => format!("{}.{}", name, extension),
                    None => name.clone(),
                }
            }
        };
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }

    pub(crate) fn into_resolver(self) -> Resolver<String> {
        Arc::new(move |_, file| {
            let key = self.generate(file);
            async move {
                tokio::task::yield_now().await;
                Ok(key)
            }
            .boxed()
        })
    }
}
