use crate::archive::Compression;
use crate::StoreError;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_FILE: &str = "bale.yaml";
pub const CHECKSUMS_FILE: &str = "checksums.txt";
pub const SIGNATURE_FILE: &str = "bale.yaml.sig";
pub const COMPONENTS_DIR: &str = "components";
pub const IMAGES_DIR: &str = "images";
pub const IMAGE_INDEX: &str = "images/index.json";
pub const IMAGE_OCI_LAYOUT: &str = "images/oci-layout";
pub const IMAGE_BLOBS_DIR: &str = "images/blobs/sha256";

/// Files that are never listed in `checksums.txt` and are always fetched,
/// in the order they are pulled.
pub const METADATA_FILES: [&str; 3] = [MANIFEST_FILE, CHECKSUMS_FILE, SIGNATURE_FILE];

/// Directory layout of an assembled package.
///
/// Every path handed out is rooted at the package directory; relative forms
/// (used in `checksums.txt` and as layer titles) always use `/` separators.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    root: PathBuf,
}

impl PackageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    #[inline]
    pub fn checksums_path(&self) -> PathBuf {
        self.root.join(CHECKSUMS_FILE)
    }

    #[inline]
    pub fn signature_path(&self) -> PathBuf {
        self.root.join(SIGNATURE_FILE)
    }

    #[inline]
    pub fn components_dir(&self) -> PathBuf {
        self.root.join(COMPONENTS_DIR)
    }

    #[inline]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    #[inline]
    pub fn image_index_path(&self) -> PathBuf {
        self.root.join(IMAGE_INDEX)
    }

    #[inline]
    pub fn image_blob_path(&self, hex: &str) -> PathBuf {
        self.root.join(IMAGE_BLOBS_DIR).join(hex)
    }

    /// Absolute path for a package-relative `/`-separated path.
    pub fn path_of(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |p, s| p.join(s))
    }

    /// Create the package root and its component directory.
    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.components_dir())?;
        Ok(())
    }

    /// Package-relative path of `path`, with `/` separators.
    pub fn relative(&self, path: &Path) -> Result<String, StoreError> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::OutsidePackage(path.display().to_string()))?;
        let mut parts = Vec::new();
        for c in rel.components() {
            match c {
                Component::Normal(s) => parts.push(
                    s.to_str()
                        .ok_or_else(|| StoreError::NonUtf8Path(path.display().to_string()))?,
                ),
                _ => return Err(StoreError::OutsidePackage(path.display().to_string())),
            }
        }
        Ok(parts.join("/"))
    }
}

/// Package-relative path of a component archive.
pub fn component_archive_title(name: &str, compression: Compression) -> String {
    format!("{COMPONENTS_DIR}/{name}.{}", compression.extension())
}

/// Package-relative path of an image blob.
pub fn image_blob_title(hex: &str) -> String {
    format!("{IMAGE_BLOBS_DIR}/{hex}")
}

/// True when `rel` is a safe package-relative path: non-empty, not absolute,
/// and free of `.`/`..` segments.
pub fn is_safe_relative(rel: &str) -> bool {
    !rel.is_empty()
        && !rel.starts_with('/')
        && !rel.contains('\\')
        && rel.split('/').all(|s| !s.is_empty() && s != "." && s != "..")
}
