use crate::{
    pull, HttpTransport, OciLayoutTransport, OciReference, PullOptions, PullResult, RemoteConfig,
    RemoteError, Transport,
};
use bale_schema::{parse_package_file, ComponentFilter, Package};
use bale_store::{
    select_layers, unpack_archive, unpack_matching, validate_checksums, CancelToken, ImageCatalog,
    LayersSelector, PackageLayout, RootManifest, IMAGE_INDEX, MANIFEST_FILE, METADATA_FILES,
};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a package is loaded from.
pub enum PackageSource {
    /// A package tarball (`.tar`, `.tar.zst` or `.tar.gz`).
    Tarball(PathBuf),
    /// A published package behind a transport.
    Oci(Box<dyn Transport>),
}

/// A package loaded into a local directory and validated.
#[derive(Debug)]
pub struct LoadedPackage {
    pub package: Package,
    pub layout: PackageLayout,
    /// Components whose content was loaded.
    pub components: Vec<String>,
    /// Set for OCI sources.
    pub pull: Option<PullResult>,
}

impl LoadedPackage {
    /// True when only part of the package's layers were fetched.
    pub fn is_partial(&self) -> bool {
        self.pull.as_ref().is_some_and(|p| p.partial)
    }
}

impl fmt::Debug for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tarball(path) => f.debug_tuple("Tarball").field(path).finish(),
            Self::Oci(t) => f.debug_tuple("Oci").field(&t.location()).finish(),
        }
    }
}

fn is_tarball(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    [".tar", ".tar.zst", ".tar.gz"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

impl PackageSource {
    /// Pick a source for `location`: an `oci://` reference, an OCI
    /// image-layout directory, or a package tarball.
    pub fn open(location: &str, config: &RemoteConfig) -> Result<Self, RemoteError> {
        if OciReference::is_oci(location) {
            let reference = OciReference::parse(location)?;
            return Ok(Self::Oci(Box::new(HttpTransport::new(
                reference,
                config.clone(),
            ))));
        }
        let path = Path::new(location);
        if path.is_dir() && path.join("index.json").is_file() {
            return Ok(Self::Oci(Box::new(OciLayoutTransport::new(path))));
        }
        if path.is_file() && is_tarball(path) {
            return Ok(Self::Tarball(path.to_path_buf()));
        }
        Err(RemoteError::Config(format!(
            "unsupported package source '{location}': expected oci://, an OCI layout directory, or a .tar/.tar.zst/.tar.gz file"
        )))
    }

    pub fn location(&self) -> String {
        match self {
            Self::Tarball(path) => path.display().to_string(),
            Self::Oci(t) => t.location(),
        }
    }

    /// Load only the package's metadata files into `dest` and parse its
    /// manifest. No component payload is fetched.
    pub fn load_metadata(
        &self,
        dest: &PackageLayout,
        opts: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<Package, RemoteError> {
        match self {
            Self::Tarball(path) => {
                let extracted =
                    unpack_matching(path, dest.root(), |p| METADATA_FILES.contains(&p))?;
                debug!("extracted {} metadata files from {}", extracted.len(), path.display());
            }
            Self::Oci(transport) => {
                let root = transport.fetch_root()?;
                pull_metadata(transport.as_ref(), &root, dest, opts, cancel)?;
            }
        }
        Ok(parse_package_file(dest.manifest_path())?)
    }

    /// Load the package into `dest` and validate it.
    ///
    /// A tarball is extracted whole and validated in full. An OCI source
    /// fetches only the layers `filter` needs; when that is fewer than the
    /// package has, validation runs in subset mode over the fetched paths.
    pub fn load_package(
        &self,
        dest: &PackageLayout,
        filter: &ComponentFilter,
        opts: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<LoadedPackage, RemoteError> {
        match self {
            Self::Tarball(path) => {
                info!("extracting {}", path.display());
                unpack_archive(path, dest.root())?;
                let package = parse_package_file(dest.manifest_path())?;
                validate_checksums(
                    dest,
                    &package.metadata.aggregate_checksum,
                    &BTreeSet::new(),
                    cancel,
                )?;
                let components = package.components.iter().map(|c| c.name.clone()).collect();
                Ok(LoadedPackage {
                    package,
                    layout: dest.clone(),
                    components,
                    pull: None,
                })
            }
            Self::Oci(transport) => load_from_transport(transport.as_ref(), dest, filter, opts, cancel),
        }
    }
}

fn pull_metadata(
    transport: &dyn Transport,
    root: &RootManifest,
    dest: &PackageLayout,
    opts: &PullOptions,
    cancel: &CancelToken,
) -> Result<(), RemoteError> {
    let layers = root.metadata_layers();
    if root.locate(MANIFEST_FILE).is_none() {
        return Err(RemoteError::NotFound(format!(
            "{} has no {MANIFEST_FILE} layer",
            transport.location()
        )));
    }
    pull(transport, root, &layers, dest, opts, cancel)?;
    Ok(())
}

fn load_from_transport(
    transport: &dyn Transport,
    dest: &PackageLayout,
    filter: &ComponentFilter,
    opts: &PullOptions,
    cancel: &CancelToken,
) -> Result<LoadedPackage, RemoteError> {
    let root = transport.fetch_root()?;
    pull_metadata(transport, &root, dest, opts, cancel)?;
    let package = parse_package_file(dest.manifest_path())?;

    let filtering = !filter.is_empty() && !package.is_skeleton();
    let needs_images = filtering && package.components.iter().any(|c| !c.images.is_empty());
    let catalog = match root.locate(IMAGE_INDEX) {
        Some(index) if needs_images => {
            let index_bytes = transport.fetch_blob(index)?;
            Some(ImageCatalog::load(&index_bytes, |desc| {
                transport.fetch_blob(desc)
            })?)
        }
        _ => None,
    };

    let layers = select_layers(
        &root,
        &package,
        filter,
        package.is_skeleton(),
        catalog.as_ref(),
        LayersSelector::All,
    )?;
    let result = pull(transport, &root, &layers, dest, opts, cancel)?;

    let subset = if result.partial {
        result.paths()
    } else {
        BTreeSet::new()
    };
    validate_checksums(dest, &package.metadata.aggregate_checksum, &subset, cancel)?;

    let components: Vec<String> = if filtering {
        filter
            .select(&package.components)?
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    } else {
        package.components.iter().map(|c| c.name.clone()).collect()
    };
    info!(
        "loaded {} ({} components{})",
        package.metadata.name,
        components.len(),
        if result.partial { ", partial" } else { "" }
    );
    Ok(LoadedPackage {
        package,
        layout: dest.clone(),
        components,
        pull: Some(result),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_schema::parse_package_str;
    use bale_store::{
        assemble_layers, bytes_digest, generate_checksums, pack_dir, package_annotations,
        Compression, LayerDescriptor, MEDIA_TYPE_CONFIG,
    };
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;

    const PKG: &str = r"
metadata:
  name: demo
  version: 1.0.0
components:
  - name: a
    required: true
  - name: b
  - name: c
";

    fn build_package(root: &Path) -> Package {
        for name in ["a", "b", "c"] {
            fs::create_dir_all(root.join("components")).unwrap();
            fs::write(
                root.join(format!("components/{name}.tar")),
                format!("archive {name}"),
            )
            .unwrap();
        }
        let layout = PackageLayout::new(root);
        let (_, aggregate) = generate_checksums(&layout, &CancelToken::new()).unwrap();
        let mut pkg = parse_package_str(PKG).unwrap();
        pkg.metadata.aggregate_checksum = aggregate.into_inner();
        pkg.write_to_file(layout.manifest_path()).unwrap();
        pkg
    }

    fn publish(pkg_root: &Path, pkg: &Package, out: &Path) {
        let layout = PackageLayout::new(pkg_root);
        let layers = assemble_layers(&layout, pkg, false).unwrap();
        let config = b"{}";
        let root = RootManifest::new(
            LayerDescriptor {
                media_type: MEDIA_TYPE_CONFIG.to_owned(),
                digest: bytes_digest(config),
                size: config.len() as u64,
                annotations: BTreeMap::new(),
            },
            layers,
            package_annotations(pkg),
        );
        OciLayoutTransport::new(out)
            .publish(&layout, &root, config)
            .unwrap();
    }

    fn opts() -> PullOptions {
        PullOptions {
            concurrency: 2,
            retry: crate::RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        }
    }

    #[test]
    fn open_picks_source_kind() {
        let dir = tempfile::tempdir().unwrap();
        let config = RemoteConfig::default();
        assert!(matches!(
            PackageSource::open("oci://reg.io/demo:1", &config).unwrap(),
            PackageSource::Oci(_)
        ));

        let tarball = dir.path().join("bale-package-demo-amd64.tar.zst");
        fs::write(&tarball, b"").unwrap();
        assert!(matches!(
            PackageSource::open(tarball.to_str().unwrap(), &config).unwrap(),
            PackageSource::Tarball(_)
        ));

        fs::write(dir.path().join("index.json"), "{}").unwrap();
        assert!(matches!(
            PackageSource::open(dir.path().to_str().unwrap(), &config).unwrap(),
            PackageSource::Oci(_)
        ));

        assert!(PackageSource::open("/definitely/not/here.zip", &config).is_err());
    }

    #[test]
    fn tarball_metadata_only() {
        let pkg_dir = tempfile::tempdir().unwrap();
        build_package(pkg_dir.path());
        let out = tempfile::tempdir().unwrap();
        let tarball = out.path().join("pkg.tar.zst");
        pack_dir(pkg_dir.path(), "", &tarball, Compression::Zstd).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let layout = PackageLayout::new(dest.path());
        let pkg = PackageSource::Tarball(tarball)
            .load_metadata(&layout, &opts(), &CancelToken::new())
            .unwrap();
        assert_eq!(pkg.metadata.name, "demo");
        assert!(layout.checksums_path().is_file());
        assert!(!layout.path_of("components/a.tar").exists());
    }

    #[test]
    fn tarball_full_load_validates() {
        let pkg_dir = tempfile::tempdir().unwrap();
        build_package(pkg_dir.path());
        let out = tempfile::tempdir().unwrap();
        let tarball = out.path().join("pkg.tar");
        pack_dir(pkg_dir.path(), "", &tarball, Compression::None).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let loaded = PackageSource::Tarball(tarball)
            .load_package(
                &PackageLayout::new(dest.path()),
                &ComponentFilter::all(),
                &opts(),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(loaded.components, vec!["a", "b", "c"]);
        assert!(!loaded.is_partial());
    }

    #[test]
    fn oci_partial_load_fetches_selected_components() {
        let pkg_dir = tempfile::tempdir().unwrap();
        let pkg = build_package(pkg_dir.path());
        let oci = tempfile::tempdir().unwrap();
        publish(pkg_dir.path(), &pkg, oci.path());

        let dest = tempfile::tempdir().unwrap();
        let layout = PackageLayout::new(dest.path());
        let source = PackageSource::Oci(Box::new(OciLayoutTransport::new(oci.path())));
        let loaded = source
            .load_package(
                &layout,
                &ComponentFilter::parse("b").unwrap(),
                &opts(),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(loaded.is_partial());
        assert_eq!(loaded.components, vec!["a", "b"]);
        assert!(layout.path_of("components/a.tar").is_file());
        assert!(layout.path_of("components/b.tar").is_file());
        assert!(!layout.path_of("components/c.tar").exists());
    }

    #[test]
    fn oci_full_load_is_not_partial() {
        let pkg_dir = tempfile::tempdir().unwrap();
        let pkg = build_package(pkg_dir.path());
        let oci = tempfile::tempdir().unwrap();
        publish(pkg_dir.path(), &pkg, oci.path());

        let dest = tempfile::tempdir().unwrap();
        let source = PackageSource::Oci(Box::new(OciLayoutTransport::new(oci.path())));
        let loaded = source
            .load_package(
                &PackageLayout::new(dest.path()),
                &ComponentFilter::all(),
                &opts(),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(!loaded.is_partial());
        assert_eq!(loaded.pull.as_ref().unwrap().layers.len(), 5);
    }

    #[test]
    fn oci_tampered_component_fails_validation() {
        let pkg_dir = tempfile::tempdir().unwrap();
        let pkg = build_package(pkg_dir.path());
        // The recorded checksum no longer matches the published archive.
        fs::write(pkg_dir.path().join("components/b.tar"), "archive B").unwrap();
        let oci = tempfile::tempdir().unwrap();
        publish(pkg_dir.path(), &pkg, oci.path());

        let dest = tempfile::tempdir().unwrap();
        let source = PackageSource::Oci(Box::new(OciLayoutTransport::new(oci.path())));
        let err = source
            .load_package(
                &PackageLayout::new(dest.path()),
                &ComponentFilter::parse("b").unwrap(),
                &opts(),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Store(bale_store::StoreError::ChecksumMismatch { ref path, .. })
                if path == "components/b.tar"
        ));
    }
}
