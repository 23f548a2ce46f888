//! Enumerated option values understood by S3

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// User-defined object metadata (`x-amz-meta-*`)
pub type Metadata = BTreeMap<String, String>;

/// Error for a string that names no known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! s3_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire value sent to S3
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

s3_enum! {
    /// Canned ACL applied to the stored object
    Acl, "acl" {
        Private => "private",
        PublicRead => "public-read",
        PublicReadWrite => "public-read-write",
        AwsExecRead => "aws-exec-read",
        AuthenticatedRead => "authenticated-read",
        BucketOwnerRead => "bucket-owner-read",
        BucketOwnerFullControl => "bucket-owner-full-control",
        LogDeliveryWrite => "log-delivery-write",
    }
}

s3_enum! {
    /// S3 storage class
    StorageClass, "storage class" {
        Standard => "STANDARD",
        ReducedRedundancy => "REDUCED_REDUNDANCY",
        StandardIa => "STANDARD_IA",
        OnezoneIa => "ONEZONE_IA",
        IntelligentTiering => "INTELLIGENT_TIERING",
        Glacier => "GLACIER",
        GlacierIr => "GLACIER_IR",
        DeepArchive => "DEEP_ARCHIVE",
        Outposts => "OUTPOSTS",
        ExpressOnezone => "EXPRESS_ONEZONE",
    }
}

s3_enum! {
    /// Server-side encryption mode
    ServerSideEncryption, "server-side encryption" {
        Aes256 => "AES256",
        AwsKms => "aws:kms",
        AwsKmsDsse => "aws:kms:dsse",
    }
}
