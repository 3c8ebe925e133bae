//! Package layout, checksums and OCI layer assembly for bale.
//!
//! This crate provides the on-disk side of a package: `PackageLayout` for the
//! directory structure, SHA-256 digests and the `checksums.txt` manifest with
//! its aggregate digest, deterministic component archives, and the mapping
//! from a package to the OCI layers that carry it (`assemble_layers`,
//! `select_layers`).

pub mod archive;
pub mod cancel;
pub mod checksums;
pub mod digest;
pub mod layers;
pub mod layout;

pub use archive::{pack_dir, unpack_archive, unpack_matching, unpack_reader, Compression};
pub use cancel::CancelToken;
pub use checksums::{
    generate_checksums, list_package_files, validate_checksums, ChecksumEntry, ChecksumManifest,
};
pub use digest::{bytes_digest, file_digest, reader_digest, verify_file};
pub use layers::{
    assemble_layers, layer_paths, media_type_for, package_annotations, select_layers,
    verify_layers, ImageCatalog, ImageIndex, ImageManifest, LayerDescriptor, LayersSelector,
    RootManifest, ANNOTATION_BASE_NAME, ANNOTATION_TITLE, MEDIA_TYPE_CONFIG, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST,
};
pub use layout::{
    component_archive_title, image_blob_title, is_safe_relative, PackageLayout, CHECKSUMS_FILE,
    COMPONENTS_DIR, IMAGES_DIR, IMAGE_BLOBS_DIR, IMAGE_INDEX, IMAGE_OCI_LAYOUT, MANIFEST_FILE,
    METADATA_FILES, SIGNATURE_FILE,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself is synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("file listed in checksums is missing: {0}")]
    MissingFile(String),
    #[error("file is not covered by checksums: {0}")]
    UnverifiedFile(String),
    #[error("not a regular file: {0}")]
    NotRegularFile(String),
    #[error("requested file was not validated: {0}")]
    IncompletePartialValidation(String),
    #[error("invalid checksum line: '{0}'")]
    InvalidChecksumLine(String),
    #[error("invalid aggregate checksum '{0}': expected 64 hex characters")]
    InvalidAggregate(String),
    #[error("package root is not a directory: {0}")]
    InvalidPackageRoot(String),
    #[error("path is outside the package root: {0}")]
    OutsidePackage(String),
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("layer not found: {0}")]
    LayerNotFound(String),
    #[error("invalid image layout: {0}")]
    InvalidImageLayout(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] bale_schema::SchemaError),
    #[error("operation cancelled")]
    Cancelled,
}
