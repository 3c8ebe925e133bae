use super::{json_pretty, GlobalOpts, EXIT_SUCCESS};
use bale_core::{
    default_cache_dir, host_architecture, BaleConfig, FsLoader, OciSkeletonFetcher, PackageLoader,
    Resolver,
};
use bale_schema::{Package, SKELETON_ARCH};
use bale_store::CancelToken;
use std::path::Path;

/// Target selection shared by `resolve` and `diff`.
#[derive(Debug, Default)]
pub struct Target {
    pub architecture: Option<String>,
    pub flavor: Option<String>,
    pub skeleton: bool,
}

/// Load the package definition in `dir` and flatten its imports for
/// `target`.
pub fn resolved_package(
    dir: &Path,
    target: &Target,
    config: &BaleConfig,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<Package, String> {
    let definition = FsLoader.load(dir).map_err(|e| e.to_string())?;
    definition.validate().map_err(|e| e.to_string())?;

    let arch = if target.skeleton {
        SKELETON_ARCH.to_owned()
    } else {
        [
            target.architecture.as_deref().unwrap_or_default(),
            config.architecture.as_str(),
            definition.metadata.architecture.as_str(),
        ]
        .into_iter()
        .find(|a| !a.is_empty())
        .map_or_else(|| host_architecture().to_owned(), str::to_owned)
    };
    let flavor = target.flavor.as_deref().unwrap_or(&config.flavor);

    let fetcher = OciSkeletonFetcher::new(
        default_cache_dir(),
        global.remote_config(config)?,
        cancel.clone(),
    );
    let mut pkg = Resolver::new(&FsLoader, dir, &arch)
        .with_flavor(flavor)
        .with_fetcher(&fetcher)
        .skeleton(target.skeleton)
        .resolve_package(&definition, cancel)
        .map_err(|e| e.to_string())?;
    pkg.metadata.architecture = arch;
    Ok(pkg)
}

pub fn run(
    dir: &Path,
    target: &Target,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let config = global.load_config(dir)?;
    let pkg = resolved_package(dir, target, &config, global, cancel)?;
    if global.json {
        println!("{}", json_pretty(&pkg)?);
    } else {
        print!("{}", pkg.to_yaml().map_err(|e| e.to_string())?);
    }
    Ok(EXIT_SUCCESS)
}
