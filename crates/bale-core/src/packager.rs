//! Package create, publish, pull and inspect.

use crate::assets::package_component;
use crate::composer::{FsLoader, PackageLoader, Resolver, SkeletonFetcher};
use crate::config::BaleConfig;
use crate::differential::{prune_components, DifferentialIndex, PruneReport};
use crate::images::{listed_images, ImageSource};
use crate::CoreError;
use bale_remote::{
    pull as pull_layers, HttpTransport, LoadedPackage, OciLayoutTransport, OciReference,
    PackageSource, PullOptions, RemoteConfig, RemoteError, Transport,
};
use bale_schema::{parse_package_file, ComponentFilter, Package, Sha256Digest, SKELETON_ARCH};
use bale_store::{
    assemble_layers, bytes_digest, generate_checksums, pack_dir, package_annotations,
    unpack_archive, validate_checksums, CancelToken, Compression, LayerDescriptor, PackageLayout,
    RootManifest, MANIFEST_FILE, MEDIA_TYPE_CONFIG,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Architecture name of the running host, in the form packages record.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// `~/.cache/bale`, or a directory under the system temp dir without `HOME`.
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || std::env::temp_dir().join("bale-cache"),
        |home| PathBuf::from(home).join(".cache/bale"),
    )
}

/// File name of a package tarball:
/// `bale-package-<name>-<arch>[-<ref>-differential-<version> | -<version>].tar[.zst]`.
pub fn package_file_name(pkg: &Package) -> String {
    let mut name = format!(
        "bale-package-{}-{}",
        pkg.metadata.name,
        pkg.architecture()
    );
    if pkg.build.differential {
        name = format!(
            "{name}-{}-differential-{}",
            pkg.build.differential_package_version, pkg.metadata.version
        );
    } else if !pkg.metadata.version.is_empty() {
        name = format!("{name}-{}", pkg.metadata.version);
    }
    let compression = if pkg.metadata.uncompressed {
        Compression::None
    } else {
        Compression::Zstd
    };
    format!("{name}.{}", compression.extension())
}

/// Resolves `import.url` components from published skeleton packages.
///
/// Only the skeleton's metadata and the imported component's archive are
/// fetched. Archives are unpacked once into `<cache>/dirs/<digest>`.
pub struct OciSkeletonFetcher {
    cache_dir: PathBuf,
    remote: RemoteConfig,
    opts: PullOptions,
    cancel: CancelToken,
}

impl OciSkeletonFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, remote: RemoteConfig, cancel: CancelToken) -> Self {
        let opts = PullOptions::from_config(&remote);
        Self {
            cache_dir: cache_dir.into(),
            remote,
            opts,
            cancel,
        }
    }

    /// Fetch component `name` of the package behind `transport`; `url` keys
    /// the cache entry of components without an archive.
    pub fn fetch_from(
        &self,
        transport: &dyn Transport,
        url: &str,
        name: &str,
    ) -> Result<(Package, PathBuf), CoreError> {
        let root = transport.fetch_root()?;
        if root.locate(MANIFEST_FILE).is_none() {
            return Err(RemoteError::NotFound(format!("{url} has no {MANIFEST_FILE} layer")).into());
        }
        let scratch = tempfile::tempdir()?;
        let layout = PackageLayout::new(scratch.path());
        pull_layers(
            transport,
            &root,
            &root.metadata_layers(),
            &layout,
            &self.opts,
            &self.cancel,
        )?;
        let package = parse_package_file(layout.manifest_path())?;
        if !package.is_skeleton() {
            return Err(CoreError::ImportResolution {
                component: name.to_owned(),
                reason: format!("{url} is not a skeleton package"),
            });
        }

        let dirs = self.cache_dir.join("dirs");
        let Some(layer) = root.component_layer(name) else {
            let key = bytes_digest(format!("{url}{name}").as_bytes());
            let dir = dirs.join(key.as_str());
            fs::create_dir_all(&dir)?;
            debug!("component '{name}' of {url} has no archive");
            return Ok((package, dir));
        };

        let dir = dirs.join(layer.digest.as_str());
        if dir.is_dir() {
            debug!("using cached component '{name}' at {}", dir.display());
            return Ok((package, dir));
        }
        let title = layer.title().unwrap_or_default().to_owned();
        pull_layers(
            transport,
            &root,
            std::slice::from_ref(layer),
            &layout,
            &self.opts,
            &self.cancel,
        )?;
        validate_checksums(
            &layout,
            &package.metadata.aggregate_checksum,
            &BTreeSet::from([title.clone()]),
            &self.cancel,
        )?;
        let partial = dirs.join(format!("{}.partial", layer.digest));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&partial)?;
        unpack_archive(&layout.path_of(&title), &partial)?;
        fs::rename(&partial, &dir)?;
        info!("unpacked component '{name}' of {url}");
        Ok((package, dir))
    }
}

impl SkeletonFetcher for OciSkeletonFetcher {
    fn fetch(&self, url: &str, name: &str) -> Result<(Package, PathBuf), CoreError> {
        let reference = OciReference::parse(url)?;
        let transport = HttpTransport::new(reference, self.remote.clone());
        self.fetch_from(&transport, url, name)
    }
}

/// Inputs of a package build.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Directory holding `bale.yaml`.
    pub package_dir: PathBuf,
    /// Directory the tarball is written to.
    pub output_dir: PathBuf,
    /// Target architecture; the package's own or the host's when empty.
    pub architecture: String,
    pub flavor: String,
    pub skeleton: bool,
    /// Compression of component archives.
    pub compression: Compression,
    /// OCI image layout the listed images are copied from.
    pub images: Option<PathBuf>,
    /// Reference package for a differential build.
    pub differential: Option<String>,
    pub remote: RemoteConfig,
    pub cache_dir: PathBuf,
}

impl CreateOptions {
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        Self {
            package_dir: package_dir.into(),
            output_dir: PathBuf::from("."),
            architecture: String::new(),
            flavor: String::new(),
            skeleton: false,
            compression: Compression::None,
            images: None,
            differential: None,
            remote: RemoteConfig::default(),
            cache_dir: default_cache_dir(),
        }
    }

    /// Options seeded from a `bale-config.toml`.
    pub fn from_config(package_dir: impl Into<PathBuf>, config: &BaleConfig) -> Result<Self, CoreError> {
        let mut opts = Self::new(package_dir);
        opts.architecture.clone_from(&config.architecture);
        opts.flavor.clone_from(&config.flavor);
        if let Some(output) = &config.output {
            opts.output_dir.clone_from(output);
        }
        if let Some(compression) = config.compression()? {
            opts.compression = compression;
        }
        opts.images.clone_from(&config.images);
        opts.remote = config.remote_config()?;
        Ok(opts)
    }
}

/// Outcome of a package build.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    pub package: Package,
    pub tarball: PathBuf,
    pub aggregate: Sha256Digest,
    pub files: usize,
    pub images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<PruneReport>,
    /// Remote assets recorded but not packaged.
    pub remote_assets: Vec<String>,
}

fn build_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_owned())
}

fn build_terminal() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_owned())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Build a package tarball from the package definition in
/// `opts.package_dir`.
///
/// Imports are resolved, components incompatible with the target are
/// dropped, a differential build prunes what the reference package already
/// ships, each component's assets are archived, images are staged, and the
/// checksum manifest and its aggregate are recorded in `bale.yaml`.
pub fn create(opts: &CreateOptions, cancel: &CancelToken) -> Result<CreateResult, CoreError> {
    let definition = FsLoader.load(&opts.package_dir)?;
    definition.validate()?;

    let arch = if opts.skeleton {
        SKELETON_ARCH.to_owned()
    } else if !opts.architecture.is_empty() {
        opts.architecture.clone()
    } else if !definition.metadata.architecture.is_empty() {
        definition.metadata.architecture.clone()
    } else {
        host_architecture().to_owned()
    };
    info!(
        "creating package {} for {arch} from {}",
        definition.metadata.name,
        opts.package_dir.display()
    );

    let fetcher = OciSkeletonFetcher::new(&opts.cache_dir, opts.remote.clone(), cancel.clone());
    let resolver = Resolver::new(&FsLoader, &opts.package_dir, &arch)
        .with_flavor(&opts.flavor)
        .with_fetcher(&fetcher)
        .skeleton(opts.skeleton);
    let mut pkg = resolver.resolve_package(&definition, cancel)?;
    pkg.validate()?;

    let pruned = match &opts.differential {
        Some(_) if opts.skeleton => {
            return Err(CoreError::Differential(
                "skeleton packages cannot be differential".to_owned(),
            ));
        }
        Some(reference) => {
            let source = PackageSource::open(reference, &opts.remote)?;
            let scratch = tempfile::tempdir()?;
            let index = DifferentialIndex::load(
                &source,
                &PackageLayout::new(scratch.path()),
                &PullOptions::from_config(&opts.remote),
                cancel,
            )?;
            index.check_version(&pkg.metadata.version)?;
            let report = prune_components(&mut pkg.components, &index)?;
            info!(
                "differential build against {}: dropped {} images and {} repos",
                index.reference_version,
                report.images_dropped.len(),
                report.repos_dropped.len()
            );
            pkg.build.differential = true;
            pkg.build.differential_package_version = index.reference_version;
            Some(report)
        }
        None => None,
    };

    let work = tempfile::tempdir()?;
    let layout = PackageLayout::new(work.path().join("package"));
    layout.initialize()?;
    let staging = work.path().join("staging");

    let mut remote_assets = Vec::new();
    for component in &mut pkg.components {
        let packaged = package_component(
            component,
            &opts.package_dir,
            &staging,
            &layout,
            opts.compression,
            opts.skeleton,
            cancel,
        )?;
        remote_assets.extend(packaged.remote);
        *component = packaged.component;
    }

    let images = if opts.skeleton {
        0
    } else {
        let images = listed_images(&pkg.components);
        match (&opts.images, images.first()) {
            (_, None) => 0,
            (Some(dir), Some(_)) => {
                ImageSource::open(dir)?.stage(&images, &layout, cancel)?;
                images.len()
            }
            (None, Some(first)) => {
                return Err(CoreError::MissingImage {
                    image: first.clone(),
                    reason: "no image layout was given to copy images from".to_owned(),
                });
            }
        }
    };

    pkg.metadata.architecture.clone_from(&arch);
    pkg.build.architecture = arch;
    pkg.build.timestamp = chrono::Utc::now().to_rfc3339();
    pkg.build.user = build_user();
    pkg.build.terminal = build_terminal();
    pkg.build.version = env!("CARGO_PKG_VERSION").to_owned();

    let (manifest, aggregate) = generate_checksums(&layout, cancel)?;
    pkg.metadata.aggregate_checksum = aggregate.to_string();
    pkg.write_to_file(layout.manifest_path())?;

    fs::create_dir_all(&opts.output_dir)?;
    let tarball = opts.output_dir.join(package_file_name(&pkg));
    cancel.check()?;
    pack_dir(
        layout.root(),
        "",
        &tarball,
        Compression::from_path(&tarball),
    )?;
    info!("wrote {}", tarball.display());

    Ok(CreateResult {
        package: pkg,
        tarball,
        aggregate,
        files: manifest.len(),
        images,
        pruned,
        remote_assets,
    })
}

/// The package config blob of a published package.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageConfig<'a> {
    architecture: &'a str,
    oci_version: &'static str,
    annotations: &'a BTreeMap<String, String>,
}

/// Outcome of publishing a package.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub package: Package,
    pub manifest: LayerDescriptor,
    pub layers: Vec<LayerDescriptor>,
}

/// Publish a package tarball or package directory into the OCI image
/// layout at `dest`. The package is validated in full first.
pub fn publish(source: &Path, dest: &Path, cancel: &CancelToken) -> Result<PublishResult, CoreError> {
    let extracted;
    let layout = if source.is_dir() {
        PackageLayout::new(source)
    } else {
        extracted = tempfile::tempdir()?;
        unpack_archive(source, extracted.path())?;
        PackageLayout::new(extracted.path())
    };
    let pkg = parse_package_file(layout.manifest_path())?;
    validate_checksums(
        &layout,
        &pkg.metadata.aggregate_checksum,
        &BTreeSet::new(),
        cancel,
    )?;

    let layers = assemble_layers(&layout, &pkg, pkg.is_skeleton())?;
    let annotations = package_annotations(&pkg);
    let config = serde_json::to_vec(&PackageConfig {
        architecture: pkg.architecture(),
        oci_version: "1.1.0",
        annotations: &annotations,
    })?;
    let root = RootManifest::new(
        LayerDescriptor {
            media_type: MEDIA_TYPE_CONFIG.to_owned(),
            digest: bytes_digest(&config),
            size: config.len() as u64,
            annotations: BTreeMap::new(),
        },
        layers,
        annotations,
    );
    let manifest = OciLayoutTransport::new(dest).publish(&layout, &root, &config)?;
    info!(
        "published {} {} ({} layers) to {}",
        pkg.metadata.name,
        pkg.metadata.version,
        root.layers.len(),
        dest.display()
    );
    Ok(PublishResult {
        package: pkg,
        manifest,
        layers: root.layers,
    })
}

/// Inputs of a pull.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// `oci://` reference, OCI layout directory or package tarball.
    pub source: String,
    /// Directory the package is loaded into.
    pub dest: PathBuf,
    pub filter: ComponentFilter,
    pub remote: RemoteConfig,
    /// Directory to write a package tarball to after a complete pull.
    pub archive_to: Option<PathBuf>,
}

impl PullRequest {
    pub fn new(source: &str, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.to_owned(),
            dest: dest.into(),
            filter: ComponentFilter::all(),
            remote: RemoteConfig::default(),
            archive_to: None,
        }
    }
}

/// Load a package, fetching only the layers `request.filter` needs, and
/// validate what was fetched.
pub fn pull(request: &PullRequest, cancel: &CancelToken) -> Result<(LoadedPackage, Option<PathBuf>), CoreError> {
    let source = PackageSource::open(&request.source, &request.remote)?;
    let layout = PackageLayout::new(&request.dest);
    layout.initialize()?;
    let loaded = source.load_package(
        &layout,
        &request.filter,
        &PullOptions::from_config(&request.remote),
        cancel,
    )?;
    if let Some(result) = &loaded.pull {
        info!(
            "pulled {} layers ({} bytes), {} already present",
            result.layers_pulled, result.bytes_pulled, result.layers_skipped
        );
    }

    let tarball = match &request.archive_to {
        Some(_) if loaded.is_partial() => {
            warn!("partial pull of {} is not archived", request.source);
            None
        }
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let tarball = dir.join(package_file_name(&loaded.package));
            pack_dir(
                layout.root(),
                "",
                &tarball,
                Compression::from_path(&tarball),
            )?;
            Some(tarball)
        }
        None => None,
    };
    Ok((loaded, tarball))
}

/// A package's definition and, for published packages, its layers.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub source: String,
    pub package: Package,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<LayerDescriptor>>,
}

/// Read a package's definition without fetching component content.
pub fn inspect(location: &str, remote: &RemoteConfig, cancel: &CancelToken) -> Result<Inspection, CoreError> {
    let source = PackageSource::open(location, remote)?;
    let scratch = tempfile::tempdir()?;
    let package = source.load_metadata(
        &PackageLayout::new(scratch.path()),
        &PullOptions::from_config(remote),
        cancel,
    )?;
    let layers = match &source {
        PackageSource::Oci(transport) => Some(transport.fetch_root()?.layers),
        PackageSource::Tarball(_) => None,
    };
    Ok(Inspection {
        source: source.location(),
        package,
        layers,
    })
}
