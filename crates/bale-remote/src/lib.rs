//! Fetching published bale packages.
//!
//! This crate provides the `Transport` abstraction over where a package's
//! root manifest and layer blobs live (an OCI image-layout directory or an
//! OCI distribution registry over HTTP), bounded retry around transport
//! calls, a concurrent selective `pull` that verifies every blob it writes,
//! and `PackageSource`, which loads a package from a tarball or OCI source
//! into a local directory and validates it.

pub mod config;
pub mod http;
pub mod oci_layout;
pub mod pull;
pub mod reference;
pub mod retry;
pub mod source;

pub use config::RemoteConfig;
pub use http::HttpTransport;
pub use oci_layout::OciLayoutTransport;
pub use pull::{pull, PullOptions, PullResult};
pub use reference::OciReference;
pub use retry::RetryPolicy;
pub use source::{LoadedPackage, PackageSource};

use bale_store::{LayerDescriptor, RootManifest};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(#[from] bale_store::StoreError),
    #[error("package definition error: {0}")]
    Schema(#[from] bale_schema::SchemaError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("invalid OCI reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("invalid OCI layout: {0}")]
    InvalidLayout(String),
    #[error("size mismatch for '{key}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("integrity failure for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<RemoteError>,
    },
}

impl RemoteError {
    /// True for failures a later attempt might not hit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Http(_) | Self::SizeMismatch { .. } | Self::IntegrityFailure { .. }
        )
    }

    /// True when the operation stopped because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Store(bale_store::StoreError::Cancelled))
    }
}

/// Where a published package's manifest and blobs are read from.
pub trait Transport: Send + Sync {
    /// Human-readable location, for logs and errors.
    fn location(&self) -> String;

    /// Fetch the package's root manifest.
    fn fetch_root(&self) -> Result<RootManifest, RemoteError>;

    /// Open a stream over the blob a descriptor points at.
    fn open_blob(&self, desc: &LayerDescriptor) -> Result<Box<dyn Read + Send>, RemoteError>;

    /// Read a whole blob into memory and check its digest.
    fn fetch_blob(&self, desc: &LayerDescriptor) -> Result<Vec<u8>, RemoteError> {
        let mut data = Vec::new();
        self.open_blob(desc)?
            .take(desc.size.saturating_add(1))
            .read_to_end(&mut data)?;
        let key = desc.title().unwrap_or(desc.digest.as_str()).to_owned();
        if data.len() as u64 != desc.size {
            return Err(RemoteError::SizeMismatch {
                key,
                expected: desc.size,
                actual: data.len() as u64,
            });
        }
        let actual = bale_store::bytes_digest(&data);
        if actual != desc.digest {
            return Err(RemoteError::IntegrityFailure {
                key,
                expected: desc.digest.to_string(),
                actual: actual.into_inner(),
            });
        }
        Ok(data)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Http("502".to_owned()).is_transient());
        assert!(!RemoteError::NotFound("x".to_owned()).is_transient());
        assert!(!RemoteError::Store(bale_store::StoreError::Cancelled).is_transient());
        assert!(RemoteError::Store(bale_store::StoreError::Cancelled).is_cancelled());
    }

    #[test]
    fn fetch_blob_checks_digest() {
        let mut mock = MockTransport::new(&[("bale.yaml", "metadata")]);
        let desc = mock.root.layers[0].clone();
        assert_eq!(mock.fetch_blob(&desc).unwrap(), b"metadata");

        mock.blobs.insert(desc.digest.to_string(), b"metadatX".to_vec());
        assert!(matches!(
            mock.fetch_blob(&desc),
            Err(RemoteError::IntegrityFailure { .. })
        ));
        mock.blobs.insert(desc.digest.to_string(), b"short".to_vec());
        assert!(matches!(
            mock.fetch_blob(&desc),
            Err(RemoteError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn retries_exhausted_display_names_last_error() {
        let e = RemoteError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RemoteError::Http("HTTP 503".to_owned())),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("HTTP 503"));
    }
}
