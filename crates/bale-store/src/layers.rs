//! Mapping between an assembled package and the OCI layers that carry it.
//!
//! Every file in a published package is one layer, addressed by its SHA-256
//! and named by the `org.opencontainers.image.title` annotation holding its
//! package-relative path. The root manifest lists those layers; consumers
//! locate a file by title and pull only the layers a component filter needs.

use crate::digest::file_digest;
use crate::layout::{
    component_archive_title, image_blob_title, PackageLayout, IMAGE_INDEX, IMAGE_OCI_LAYOUT,
    METADATA_FILES,
};
use crate::{Compression, StoreError};
use bale_schema::{ComponentFilter, ImageRef, Package, Sha256Digest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::debug;

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.bale.config.v1+json";
pub const MEDIA_TYPE_LAYER_ZSTD: &str = "application/vnd.bale.layer.v1.tar+zstd";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.bale.layer.v1.tar+gzip";
pub const MEDIA_TYPE_LAYER_YAML: &str = "application/vnd.bale.layer.v1.yaml";
pub const MEDIA_TYPE_LAYER_JSON: &str = "application/vnd.bale.layer.v1.json";
pub const MEDIA_TYPE_LAYER_BLOB: &str = "application/vnd.bale.layer.v1.blob";

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_BASE_NAME: &str = "org.opencontainers.image.base.name";
pub const ANNOTATION_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const ANNOTATION_URL: &str = "org.opencontainers.image.url";
pub const ANNOTATION_AUTHORS: &str = "org.opencontainers.image.authors";
pub const ANNOTATION_DOCUMENTATION: &str = "org.opencontainers.image.documentation";
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
pub const ANNOTATION_VENDOR: &str = "org.opencontainers.image.vendor";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

/// Media type for a layer, chosen by the extension of its title.
pub fn media_type_for(title: &str) -> &'static str {
    let name = title.rsplit('/').next().unwrap_or(title);
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("zst") => MEDIA_TYPE_LAYER_ZSTD,
        Some("gz") => MEDIA_TYPE_LAYER_GZIP,
        Some("yaml" | "yml") => MEDIA_TYPE_LAYER_YAML,
        Some("json") => MEDIA_TYPE_LAYER_JSON,
        _ => MEDIA_TYPE_LAYER_BLOB,
    }
}

mod oci_digest {
    use bale_schema::Sha256Digest;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Sha256Digest, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&d.to_oci())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Sha256Digest, D::Error> {
        let raw = String::deserialize(d)?;
        Sha256Digest::from_oci(&raw.to_ascii_lowercase())
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported digest '{raw}'")))
    }
}

/// A content-addressed unit of transfer, in OCI descriptor JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub media_type: String,
    #[serde(with = "oci_digest")]
    pub digest: Sha256Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl LayerDescriptor {
    /// Descriptor for a package file, titled with its relative path.
    pub fn for_file(title: &str, digest: Sha256Digest, size: u64) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_TITLE.to_owned(), title.to_owned());
        Self {
            media_type: media_type_for(title).to_owned(),
            digest,
            size,
            annotations,
        }
    }

    /// Digest and size a file inside the package root.
    pub fn from_package_file(layout: &PackageLayout, title: &str) -> Result<Self, StoreError> {
        let path = layout.path_of(title);
        if !path.is_file() {
            return Err(StoreError::LayerNotFound(title.to_owned()));
        }
        let size = fs::metadata(&path)?.len();
        let digest = file_digest(&path)?;
        Ok(Self::for_file(title, digest, size))
    }

    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }
}

/// The manifest published at a package reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: LayerDescriptor,
    pub layers: Vec<LayerDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl RootManifest {
    pub fn new(
        config: LayerDescriptor,
        layers: Vec<LayerDescriptor>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_owned(),
            config,
            layers,
            annotations,
        }
    }

    /// The layer whose title is `title`, if any.
    pub fn locate(&self, title: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.title() == Some(title))
    }

    /// Layers that carry the package definition, checksums and signature,
    /// in pull order. Absent metadata files are skipped.
    pub fn metadata_layers(&self) -> Vec<LayerDescriptor> {
        METADATA_FILES
            .iter()
            .filter_map(|t| self.locate(t).cloned())
            .collect()
    }

    /// The archive layer of a component, whatever its compression.
    pub fn component_layer(&self, name: &str) -> Option<&LayerDescriptor> {
        [Compression::None, Compression::Zstd, Compression::Gzip]
            .into_iter()
            .find_map(|c| self.locate(&component_archive_title(name, c)))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// OCI image index (`index.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<LayerDescriptor>,
}

/// OCI image manifest for a single container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: LayerDescriptor,
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
}

/// The images stored in a package, keyed by reference.
///
/// Built from `images/index.json` and the image manifests it points at.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    index: ImageIndex,
    manifests: BTreeMap<Sha256Digest, ImageManifest>,
}

impl ImageCatalog {
    /// Parse an index and load each image manifest through `fetch`, which is
    /// handed the manifest descriptor and returns the blob bytes.
    pub fn load<E>(
        index_bytes: &[u8],
        mut fetch: impl FnMut(&LayerDescriptor) -> Result<Vec<u8>, E>,
    ) -> Result<Self, E>
    where
        E: From<StoreError>,
    {
        let index: ImageIndex = serde_json::from_slice(index_bytes).map_err(StoreError::from)?;
        let mut manifests = BTreeMap::new();
        for desc in &index.manifests {
            if manifests.contains_key(&desc.digest) {
                continue;
            }
            let data = fetch(desc)?;
            let manifest: ImageManifest =
                serde_json::from_slice(&data).map_err(StoreError::from)?;
            manifests.insert(desc.digest.clone(), manifest);
        }
        Ok(Self { index, manifests })
    }

    /// Load the catalog of a package on disk. Returns `None` when the package
    /// has no image index.
    pub fn from_layout(layout: &PackageLayout) -> Result<Option<Self>, StoreError> {
        let index_path = layout.image_index_path();
        if !index_path.is_file() {
            return Ok(None);
        }
        let index_bytes = fs::read(index_path)?;
        let catalog = Self::load(&index_bytes, |desc| {
            let path = layout.image_blob_path(&desc.digest);
            fs::read(&path).map_err(|_| {
                StoreError::InvalidImageLayout(format!(
                    "manifest blob {} is missing",
                    desc.digest.to_oci()
                ))
            })
        })?;
        Ok(Some(catalog))
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    /// Manifest descriptor of `image`.
    ///
    /// Matches the fully-qualified reference, or for Docker Hub images the
    /// short form older packages recorded.
    pub fn find(&self, image: &str) -> Result<Option<&LayerDescriptor>, StoreError> {
        let r = ImageRef::parse(image)?;
        let short = r.docker_hub_short_form();
        Ok(self.index.manifests.iter().find(|m| {
            m.annotations
                .get(ANNOTATION_BASE_NAME)
                .is_some_and(|name| *name == r.reference || short.as_deref() == Some(name.as_str()))
        }))
    }

    /// Package-relative titles of every blob `image` needs: its manifest,
    /// config and layers.
    pub fn blob_titles(&self, image: &str) -> Result<Vec<String>, StoreError> {
        let desc = self
            .find(image)?
            .ok_or_else(|| StoreError::LayerNotFound(format!("image {image}")))?;
        let manifest = self.manifests.get(&desc.digest).ok_or_else(|| {
            StoreError::InvalidImageLayout(format!("no manifest loaded for {image}"))
        })?;
        let mut titles = vec![
            image_blob_title(&desc.digest),
            image_blob_title(&manifest.config.digest),
        ];
        titles.extend(manifest.layers.iter().map(|l| image_blob_title(&l.digest)));
        Ok(titles)
    }
}

/// Root manifest annotations derived from package metadata. Explicit
/// `metadata.annotations` entries take precedence.
pub fn package_annotations(pkg: &Package) -> BTreeMap<String, String> {
    let meta = &pkg.metadata;
    let mut annotations = BTreeMap::new();
    let mut put = |key: &str, value: &str| {
        if !value.is_empty() {
            annotations.insert(key.to_owned(), value.to_owned());
        }
    };
    put(ANNOTATION_TITLE, &meta.name);
    put(ANNOTATION_DESCRIPTION, &meta.description);
    put(ANNOTATION_URL, &meta.url);
    put(ANNOTATION_AUTHORS, &meta.authors);
    put(ANNOTATION_DOCUMENTATION, &meta.documentation);
    put(ANNOTATION_SOURCE, &meta.source);
    put(ANNOTATION_VENDOR, &meta.vendor);
    put(ANNOTATION_CREATED, &pkg.build.timestamp);
    for (k, v) in &meta.annotations {
        annotations.insert(k.clone(), v.clone());
    }
    annotations
}

/// Which layers a selection returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayersSelector {
    #[default]
    All,
    MetadataOnly,
}

/// Ordered, title-unique descriptor list.
#[derive(Default)]
struct LayerSet {
    layers: Vec<LayerDescriptor>,
    titles: BTreeSet<String>,
}

impl LayerSet {
    fn push(&mut self, desc: LayerDescriptor) {
        let key = desc
            .title()
            .map_or_else(|| desc.digest.to_oci(), str::to_owned);
        if self.titles.insert(key) {
            self.layers.push(desc);
        }
    }
}

/// Titles of the image files `images` need, index and layout marker first.
fn image_titles(
    catalog: Option<&ImageCatalog>,
    images: &[&str],
) -> Result<Vec<String>, StoreError> {
    if images.is_empty() {
        return Ok(Vec::new());
    }
    let catalog = catalog.ok_or_else(|| {
        StoreError::InvalidImageLayout("components list images but the package has no image index".to_owned())
    })?;
    let mut titles = vec![IMAGE_INDEX.to_owned(), IMAGE_OCI_LAYOUT.to_owned()];
    for image in images {
        titles.extend(catalog.blob_titles(image)?);
    }
    Ok(titles)
}

/// Compute the layer descriptors of a package on disk.
///
/// Emits each component's archive in package order, then (unless
/// `is_skeleton`) the image files its images need, then the metadata files.
/// No image layers are emitted when no component lists an image.
pub fn assemble_layers(
    layout: &PackageLayout,
    pkg: &Package,
    is_skeleton: bool,
) -> Result<Vec<LayerDescriptor>, StoreError> {
    let catalog = if is_skeleton {
        None
    } else {
        ImageCatalog::from_layout(layout)?
    };
    let mut set = LayerSet::default();

    for component in &pkg.components {
        let title = [Compression::None, Compression::Zstd, Compression::Gzip]
            .into_iter()
            .map(|c| component_archive_title(&component.name, c))
            .find(|t| layout.path_of(t).is_file())
            .ok_or_else(|| StoreError::LayerNotFound(format!("components/{}", component.name)))?;
        set.push(LayerDescriptor::from_package_file(layout, &title)?);

        if !is_skeleton {
            let images: Vec<&str> = component.images.iter().map(String::as_str).collect();
            for title in image_titles(catalog.as_ref(), &images)? {
                set.push(LayerDescriptor::from_package_file(layout, &title)?);
            }
        }
    }

    for title in METADATA_FILES {
        if layout.path_of(title).is_file() {
            set.push(LayerDescriptor::from_package_file(layout, title)?);
        }
    }

    debug!("assembled {} layers", set.layers.len());
    Ok(set.layers)
}

/// Select the layers needed to satisfy `filter`.
///
/// Metadata layers are always included. With an empty filter, or when the
/// package itself is a skeleton, `All` returns every layer of `root`.
/// Otherwise the filter picks components and their archive layers are
/// returned along with (unless `is_skeleton`) the image files their images
/// need.
pub fn select_layers(
    root: &RootManifest,
    pkg: &Package,
    filter: &ComponentFilter,
    is_skeleton: bool,
    catalog: Option<&ImageCatalog>,
    selector: LayersSelector,
) -> Result<Vec<LayerDescriptor>, StoreError> {
    let mut set = LayerSet::default();
    for desc in root.metadata_layers() {
        set.push(desc);
    }
    if selector == LayersSelector::MetadataOnly {
        return Ok(set.layers);
    }
    if filter.is_empty() || pkg.is_skeleton() {
        return Ok(root.layers.clone());
    }

    let selected = filter.select(&pkg.components)?;
    let mut images: Vec<&str> = Vec::new();
    for component in &selected {
        let desc = root
            .component_layer(&component.name)
            .ok_or_else(|| StoreError::LayerNotFound(format!("components/{}", component.name)))?;
        set.push(desc.clone());
        for image in &component.images {
            if !images.contains(&image.as_str()) {
                images.push(image);
            }
        }
    }

    if !is_skeleton {
        for title in image_titles(catalog, &images)? {
            let desc = root
                .locate(&title)
                .ok_or_else(|| StoreError::LayerNotFound(title.clone()))?;
            set.push(desc.clone());
        }
    }

    debug!(
        "selected {} of {} layers for {} components",
        set.layers.len(),
        root.layers.len(),
        selected.len()
    );
    Ok(set.layers)
}

/// Package-relative paths carried by `layers`, for subset validation.
pub fn layer_paths(layers: &[LayerDescriptor]) -> BTreeSet<String> {
    layers
        .iter()
        .filter_map(|l| l.title().map(str::to_owned))
        .collect()
}

/// Check that every layer's file exists in the package with the expected
/// size and digest.
pub fn verify_layers(layout: &PackageLayout, layers: &[LayerDescriptor]) -> Result<(), StoreError> {
    for layer in layers {
        let title = layer
            .title()
            .ok_or_else(|| StoreError::LayerNotFound(layer.digest.to_oci()))?;
        let path = layout.path_of(title);
        if !path.is_file() {
            return Err(StoreError::MissingFile(title.to_owned()));
        }
        let size = fs::metadata(&path)?.len();
        if size != layer.size {
            return Err(StoreError::ChecksumMismatch {
                path: title.to_owned(),
                expected: format!("{} bytes", layer.size),
                actual: format!("{size} bytes"),
            });
        }
        crate::digest::verify_file(&path, title, &layer.digest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::bytes_digest;
    use bale_schema::parse_package_str;

    const PKG: &str = r"
kind: BalePackageConfig
metadata:
  name: demo
components:
  - name: a
    required: true
    images: [nginx:1.25]
  - name: b
    images: [ghcr.io/org/app:2, nginx:1.25]
  - name: c
";

    fn desc(title: &str, body: &[u8]) -> LayerDescriptor {
        LayerDescriptor::for_file(title, bytes_digest(body), body.len() as u64)
    }

    #[test]
    fn media_types_by_extension() {
        assert_eq!(media_type_for("components/a.tar.zst"), MEDIA_TYPE_LAYER_ZSTD);
        assert_eq!(media_type_for("components/a.tar.gz"), MEDIA_TYPE_LAYER_GZIP);
        assert_eq!(media_type_for("bale.yaml"), MEDIA_TYPE_LAYER_YAML);
        assert_eq!(media_type_for("images/index.json"), MEDIA_TYPE_LAYER_JSON);
        assert_eq!(media_type_for("components/a.tar"), MEDIA_TYPE_LAYER_BLOB);
        assert_eq!(media_type_for("images/blobs/sha256/abcd"), MEDIA_TYPE_LAYER_BLOB);
    }

    #[test]
    fn descriptor_json_uses_oci_digest() {
        let d = desc("bale.yaml", b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"digest\":\"sha256:"));
        assert!(json.contains("\"mediaType\""));
        let back: LayerDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.title(), Some("bale.yaml"));
    }

    #[test]
    fn descriptor_rejects_non_sha256() {
        let json = r#"{"mediaType":"x","digest":"md5:abc","size":1}"#;
        assert!(serde_json::from_str::<LayerDescriptor>(json).is_err());
    }

    #[test]
    fn root_locate_and_component_layer() {
        let root = RootManifest::new(
            desc("config", b"{}"),
            vec![desc("components/a.tar.zst", b"a"), desc("bale.yaml", b"y")],
            BTreeMap::new(),
        );
        assert!(root.locate("bale.yaml").is_some());
        assert!(root.locate("missing").is_none());
        assert_eq!(
            root.component_layer("a").and_then(LayerDescriptor::title),
            Some("components/a.tar.zst")
        );
        assert_eq!(root.metadata_layers().len(), 1);
    }

    #[test]
    fn metadata_only_selector() {
        let pkg = parse_package_str(PKG).unwrap();
        let root = RootManifest::new(
            desc("config", b"{}"),
            vec![
                desc("components/a.tar", b"a"),
                desc("bale.yaml", b"y"),
                desc("checksums.txt", b"c"),
            ],
            BTreeMap::new(),
        );
        let layers = select_layers(
            &root,
            &pkg,
            &ComponentFilter::parse("c").unwrap(),
            false,
            None,
            LayersSelector::MetadataOnly,
        )
        .unwrap();
        let titles: Vec<_> = layers.iter().filter_map(LayerDescriptor::title).collect();
        assert_eq!(titles, vec!["bale.yaml", "checksums.txt"]);
    }

    #[test]
    fn empty_filter_returns_everything() {
        let pkg = parse_package_str(PKG).unwrap();
        let root = RootManifest::new(
            desc("config", b"{}"),
            vec![desc("components/c.tar", b"c"), desc("bale.yaml", b"y")],
            BTreeMap::new(),
        );
        let layers = select_layers(
            &root,
            &pkg,
            &ComponentFilter::all(),
            false,
            None,
            LayersSelector::All,
        )
        .unwrap();
        assert_eq!(layers, root.layers);
    }

    #[test]
    fn missing_catalog_with_images_is_error() {
        let pkg = parse_package_str(PKG).unwrap();
        let root = RootManifest::new(
            desc("config", b"{}"),
            vec![
                desc("components/a.tar", b"a"),
                desc("components/b.tar", b"b"),
                desc("bale.yaml", b"y"),
            ],
            BTreeMap::new(),
        );
        let err = select_layers(
            &root,
            &pkg,
            &ComponentFilter::parse("b").unwrap(),
            false,
            None,
            LayersSelector::All,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidImageLayout(_)));
    }

    #[test]
    fn catalog_matches_short_docker_hub_names() {
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: None,
            config: desc("cfg", b"cfg"),
            layers: vec![desc("l1", b"l1")],
        };
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let mut entry = LayerDescriptor {
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_owned(),
            digest: bytes_digest(&manifest_bytes),
            size: manifest_bytes.len() as u64,
            annotations: BTreeMap::new(),
        };
        entry
            .annotations
            .insert(ANNOTATION_BASE_NAME.to_owned(), "library/nginx:1.25".to_owned());
        let index = ImageIndex {
            schema_version: 2,
            media_type: None,
            manifests: vec![entry],
        };
        let index_bytes = serde_json::to_vec(&index).unwrap();
        let catalog =
            ImageCatalog::load::<StoreError>(&index_bytes, |_| Ok(manifest_bytes.clone())).unwrap();

        assert!(catalog.find("nginx:1.25").unwrap().is_some());
        assert!(catalog.find("nginx:1.26").unwrap().is_none());
        let titles = catalog.blob_titles("docker.io/library/nginx:1.25").unwrap();
        assert_eq!(titles.len(), 3);
        assert!(titles.iter().all(|t| t.starts_with("images/blobs/sha256/")));
    }

    #[test]
    fn annotations_from_metadata_with_overrides() {
        let mut pkg = parse_package_str(PKG).unwrap();
        pkg.metadata.description = "demo package".to_owned();
        pkg.build.timestamp = "2026-01-01T00:00:00Z".to_owned();
        pkg.metadata
            .annotations
            .insert(ANNOTATION_DESCRIPTION.to_owned(), "override".to_owned());
        let a = package_annotations(&pkg);
        assert_eq!(a.get(ANNOTATION_TITLE).map(String::as_str), Some("demo"));
        assert_eq!(a.get(ANNOTATION_DESCRIPTION).map(String::as_str), Some("override"));
        assert_eq!(
            a.get(ANNOTATION_CREATED).map(String::as_str),
            Some("2026-01-01T00:00:00Z")
        );
        assert!(!a.contains_key(ANNOTATION_VENDOR));
    }

    #[test]
    fn layer_paths_collects_titles() {
        let layers = vec![desc("bale.yaml", b"y"), desc("components/a.tar", b"a")];
        let paths = layer_paths(&layers);
        assert!(paths.contains("bale.yaml"));
        assert!(paths.contains("components/a.tar"));
    }

    #[test]
    fn verify_layers_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PackageLayout::new(dir.path());
        fs::write(dir.path().join("bale.yaml"), b"y").unwrap();
        let good = desc("bale.yaml", b"y");
        verify_layers(&layout, std::slice::from_ref(&good)).unwrap();

        fs::write(dir.path().join("bale.yaml"), b"z").unwrap();
        assert!(matches!(
            verify_layers(&layout, &[good]),
            Err(StoreError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            verify_layers(&layout, &[desc("checksums.txt", b"c")]),
            Err(StoreError::MissingFile(_))
        ));
    }
}
