//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so they can appear
//! directly inside YAML and OCI JSON documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Lowercase 64-character hex SHA-256 digest, without an algorithm prefix.
    Sha256Digest
);

string_newtype!(
    /// Forward-slash relative path of a file inside an assembled package root.
    /// Doubles as the OCI `org.opencontainers.image.title` of the layer carrying it.
    LayerTitle
);

impl Sha256Digest {
    /// True when the value is exactly 64 lowercase hex characters.
    pub fn is_well_formed(&self) -> bool {
        is_sha256_hex(&self.0)
    }

    /// The OCI form, `sha256:<hex>`.
    pub fn to_oci(&self) -> String {
        format!("sha256:{}", self.0)
    }

    /// Parse an OCI `sha256:<hex>` digest. Returns `None` for other algorithms
    /// or malformed hex.
    pub fn from_oci(s: &str) -> Option<Self> {
        let hex = s.strip_prefix("sha256:")?;
        is_sha256_hex(hex).then(|| Self(hex.to_owned()))
    }
}

/// True when `s` is exactly 64 hex characters (either case).
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
