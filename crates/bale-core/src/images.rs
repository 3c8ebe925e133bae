//! Staging container images into a package.
//!
//! Images come from a local OCI image-layout directory (`index.json`,
//! `oci-layout`, `blobs/sha256/`), the form `skopeo copy` and `crane pull
//! --format=oci` produce. Each listed image is found through its
//! `org.opencontainers.image.base.name` annotation and copied with every blob
//! it references into the package's `images/` layout.

use crate::CoreError;
use bale_store::{
    verify_file, CancelToken, ImageCatalog, ImageIndex, LayerDescriptor, PackageLayout,
    StoreError, IMAGE_BLOBS_DIR, IMAGE_OCI_LAYOUT, MEDIA_TYPE_OCI_INDEX,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// A local OCI image layout images are copied from.
#[derive(Debug)]
pub struct ImageSource {
    root: PathBuf,
    catalog: ImageCatalog,
}

impl ImageSource {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        let index_path = root.join("index.json");
        let index_bytes = fs::read(&index_path).map_err(|e| {
            CoreError::Config(format!("cannot read image layout {}: {e}", index_path.display()))
        })?;
        let catalog = ImageCatalog::load(&index_bytes, |desc| {
            fs::read(blob_path(&root, desc)).map_err(|_| {
                StoreError::InvalidImageLayout(format!(
                    "manifest blob {} is missing from {}",
                    desc.digest.to_oci(),
                    root.display()
                ))
            })
        })?;
        Ok(Self { root, catalog })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `images` into `layout` and write the package's image index.
    /// Returns the number of blobs copied.
    pub fn stage(
        &self,
        images: &[String],
        layout: &PackageLayout,
        cancel: &CancelToken,
    ) -> Result<usize, CoreError> {
        let mut manifests: Vec<LayerDescriptor> = Vec::new();
        let mut blobs: BTreeSet<String> = BTreeSet::new();

        for image in images {
            let desc = self
                .catalog
                .find(image)?
                .ok_or_else(|| CoreError::MissingImage {
                    image: image.clone(),
                    reason: format!("not found in {}", self.root.display()),
                })?;
            if !manifests.iter().any(|m| m.digest == desc.digest) {
                manifests.push(desc.clone());
            }
            for title in self.catalog.blob_titles(image)? {
                if let Some(hex) = title.strip_prefix(IMAGE_BLOBS_DIR) {
                    blobs.insert(hex.trim_start_matches('/').to_owned());
                }
            }
        }

        fs::create_dir_all(layout.path_of(IMAGE_BLOBS_DIR))?;
        for hex in &blobs {
            cancel.check()?;
            let src = self.root.join("blobs/sha256").join(hex);
            let dst = layout.image_blob_path(hex);
            if dst.is_file() && verify_file(&dst, hex, hex).is_ok() {
                continue;
            }
            fs::copy(&src, &dst).map_err(|e| CoreError::MissingImage {
                image: format!("blob sha256:{hex}"),
                reason: e.to_string(),
            })?;
            verify_file(&dst, &format!("{IMAGE_BLOBS_DIR}/{hex}"), hex)?;
            debug!("copied blob sha256:{hex}");
        }

        let index = ImageIndex {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_owned()),
            manifests,
        };
        fs::write(layout.image_index_path(), serde_json::to_vec_pretty(&index)?)?;
        fs::write(layout.path_of(IMAGE_OCI_LAYOUT), OCI_LAYOUT_CONTENT)?;
        info!("staged {} images ({} blobs)", images.len(), blobs.len());
        Ok(blobs.len())
    }
}

fn blob_path(root: &Path, desc: &LayerDescriptor) -> PathBuf {
    root.join("blobs/sha256").join(desc.digest.as_str())
}

/// Every image listed by `components`, first occurrence order.
pub fn listed_images<'a>(
    components: impl IntoIterator<Item = &'a bale_schema::Component>,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut images = Vec::new();
    for component in components {
        for image in &component.images {
            if seen.insert(image.as_str()) {
                images.push(image.clone());
            }
        }
    }
    images
}
