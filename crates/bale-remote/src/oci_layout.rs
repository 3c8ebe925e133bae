use crate::{RemoteError, Transport};
use bale_store::{
    bytes_digest, ImageIndex, LayerDescriptor, PackageLayout, RootManifest, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const OCI_LAYOUT_MARKER: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Transport over a package published into an OCI image-layout directory.
///
/// The layout's `index.json` must list exactly one manifest: the package
/// root manifest. Blobs live under `blobs/sha256/<hex>`.
pub struct OciLayoutTransport {
    root: PathBuf,
}

impl OciLayoutTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hex: &str) -> PathBuf {
        self.root.join("blobs/sha256").join(hex)
    }

    /// The single manifest descriptor listed in `index.json`.
    pub fn root_descriptor(&self) -> Result<LayerDescriptor, RemoteError> {
        let index_path = self.root.join("index.json");
        let data = fs::read(&index_path).map_err(|e| {
            RemoteError::InvalidLayout(format!("cannot read {}: {e}", index_path.display()))
        })?;
        let index: ImageIndex = serde_json::from_slice(&data)
            .map_err(|e| RemoteError::InvalidLayout(format!("invalid index.json: {e}")))?;
        match index.manifests.as_slice() {
            [single] => Ok(single.clone()),
            [] => Err(RemoteError::InvalidLayout(
                "index.json lists no manifests".to_owned(),
            )),
            many => Err(RemoteError::InvalidLayout(format!(
                "index.json must list exactly one manifest, found {}",
                many.len()
            ))),
        }
    }

    fn write_blob(&self, data: &[u8]) -> Result<(), RemoteError> {
        let digest = bytes_digest(data);
        let dest = self.blob_path(&digest);
        if dest.exists() {
            return Ok(());
        }
        let dir = self.root.join("blobs/sha256");
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.persist(&dest).map_err(|e| RemoteError::Io(e.error))?;
        Ok(())
    }

    /// Publish a package directory into this layout, replacing any package
    /// previously published here. Layer files are copied by digest; blobs
    /// already present are kept.
    pub fn publish(
        &self,
        package: &PackageLayout,
        root: &RootManifest,
        config: &[u8],
    ) -> Result<LayerDescriptor, RemoteError> {
        if bytes_digest(config) != root.config.digest {
            return Err(RemoteError::IntegrityFailure {
                key: "config".to_owned(),
                expected: root.config.digest.to_string(),
                actual: bytes_digest(config).into_inner(),
            });
        }
        fs::create_dir_all(self.root.join("blobs/sha256"))?;
        for layer in &root.layers {
            let title = layer
                .title()
                .ok_or_else(|| RemoteError::InvalidLayout(format!("layer {} has no title", layer.digest)))?;
            let dest = self.blob_path(&layer.digest);
            if dest.exists() {
                continue;
            }
            let mut tmp = NamedTempFile::new_in(self.root.join("blobs/sha256"))?;
            let mut src = fs::File::open(package.path_of(title))?;
            std::io::copy(&mut src, &mut tmp)?;
            tmp.persist(&dest).map_err(|e| RemoteError::Io(e.error))?;
            debug!("published {title}");
        }
        self.write_blob(config)?;

        let manifest_bytes = root.to_json()?;
        self.write_blob(&manifest_bytes)?;
        let desc = LayerDescriptor {
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_owned(),
            digest: bytes_digest(&manifest_bytes),
            size: manifest_bytes.len() as u64,
            annotations: BTreeMap::new(),
        };
        let index = ImageIndex {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_owned()),
            manifests: vec![desc.clone()],
        };
        let index_bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        fs::write(self.root.join("index.json"), index_bytes)?;
        fs::write(self.root.join("oci-layout"), OCI_LAYOUT_MARKER)?;
        info!(
            "published {} layers to {}",
            root.layers.len(),
            self.root.display()
        );
        Ok(desc)
    }
}

impl Transport for OciLayoutTransport {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch_root(&self) -> Result<RootManifest, RemoteError> {
        let desc = self.root_descriptor()?;
        let data = self.fetch_blob(&desc)?;
        RootManifest::from_json(&data)
            .map_err(|e| RemoteError::Serialization(format!("invalid root manifest: {e}")))
    }

    fn open_blob(&self, desc: &LayerDescriptor) -> Result<Box<dyn Read + Send>, RemoteError> {
        let path = self.blob_path(&desc.digest);
        match fs::File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(desc.digest.to_oci()))
            }
            Err(e) => Err(RemoteError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_store::MEDIA_TYPE_CONFIG;

    fn put_blob(root: &Path, data: &[u8]) -> LayerDescriptor {
        let digest = bytes_digest(data);
        let dir = root.join("blobs/sha256");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(digest.as_str()), data).unwrap();
        LayerDescriptor {
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_owned(),
            digest,
            size: data.len() as u64,
            annotations: BTreeMap::new(),
        }
    }

    fn write_index(root: &Path, manifests: Vec<LayerDescriptor>) {
        let index = ImageIndex {
            schema_version: 2,
            media_type: None,
            manifests,
        };
        fs::write(root.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();
    }

    fn publish_fixture(root: &Path) -> RootManifest {
        let yaml = b"metadata:\n  name: demo\n";
        let layer = put_blob(root, yaml);
        let config = put_blob(root, b"{}");
        let manifest = RootManifest::new(
            LayerDescriptor {
                media_type: MEDIA_TYPE_CONFIG.to_owned(),
                ..config
            },
            vec![LayerDescriptor::for_file("bale.yaml", layer.digest, layer.size)],
            BTreeMap::new(),
        );
        let desc = put_blob(root, &manifest.to_json().unwrap());
        write_index(root, vec![desc]);
        manifest
    }

    #[test]
    fn fetch_root_and_blob() {
        let dir = tempfile::tempdir().unwrap();
        let published = publish_fixture(dir.path());
        let t = OciLayoutTransport::new(dir.path());
        let root = t.fetch_root().unwrap();
        assert_eq!(root, published);
        let yaml = t.fetch_blob(root.locate("bale.yaml").unwrap()).unwrap();
        assert_eq!(yaml, b"metadata:\n  name: demo\n");
    }

    #[test]
    fn publish_package_dir_roundtrip() {
        let pkg_dir = tempfile::tempdir().unwrap();
        fs::write(pkg_dir.path().join("bale.yaml"), "metadata:\n  name: demo\n").unwrap();
        let package = PackageLayout::new(pkg_dir.path());
        let layer = LayerDescriptor::from_package_file(&package, "bale.yaml").unwrap();
        let config = b"{\"kind\":\"BalePackageConfig\"}";
        let root = RootManifest::new(
            LayerDescriptor {
                media_type: MEDIA_TYPE_CONFIG.to_owned(),
                digest: bytes_digest(config),
                size: config.len() as u64,
                annotations: BTreeMap::new(),
            },
            vec![layer],
            BTreeMap::new(),
        );

        let out = tempfile::tempdir().unwrap();
        let t = OciLayoutTransport::new(out.path());
        t.publish(&package, &root, config).unwrap();
        assert!(out.path().join("oci-layout").is_file());
        assert_eq!(t.fetch_root().unwrap(), root);

        // Republishing replaces the index instead of appending to it.
        t.publish(&package, &root, config).unwrap();
        assert!(t.root_descriptor().is_ok());
    }

    #[test]
    fn publish_rejects_config_mismatch() {
        let pkg_dir = tempfile::tempdir().unwrap();
        let root = RootManifest::new(
            LayerDescriptor::for_file("config", bytes_digest(b"a"), 1),
            Vec::new(),
            BTreeMap::new(),
        );
        let out = tempfile::tempdir().unwrap();
        let err = OciLayoutTransport::new(out.path())
            .publish(&PackageLayout::new(pkg_dir.path()), &root, b"b")
            .unwrap_err();
        assert!(matches!(err, RemoteError::IntegrityFailure { .. }));
    }

    #[test]
    fn index_with_two_manifests_rejected() {
        let dir = tempfile::tempdir().unwrap();
        publish_fixture(dir.path());
        let a = put_blob(dir.path(), b"a");
        let b = put_blob(dir.path(), b"b");
        write_index(dir.path(), vec![a, b]);
        let err = OciLayoutTransport::new(dir.path()).fetch_root().unwrap_err();
        assert!(matches!(err, RemoteError::InvalidLayout(ref m) if m.contains("exactly one")));
    }

    #[test]
    fn empty_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), Vec::new());
        assert!(matches!(
            OciLayoutTransport::new(dir.path()).root_descriptor(),
            Err(RemoteError::InvalidLayout(_))
        ));
    }

    #[test]
    fn tampered_blob_fails_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let desc = put_blob(dir.path(), b"payload");
        fs::write(dir.path().join("blobs/sha256").join(desc.digest.as_str()), b"evil!!!").unwrap();
        let t = OciLayoutTransport::new(dir.path());
        assert!(matches!(
            t.fetch_blob(&desc),
            Err(RemoteError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let t = OciLayoutTransport::new(dir.path());
        let desc = LayerDescriptor::for_file("x", bytes_digest(b"x"), 1);
        assert!(matches!(t.open_blob(&desc), Err(RemoteError::NotFound(_))));
    }
}
