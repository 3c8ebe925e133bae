use super::{colorize_change, json_pretty, spin_fail, spin_ok, spinner, GlobalOpts, EXIT_SUCCESS};
use bale_core::{create, CreateOptions};
use bale_store::{CancelToken, Compression};
use std::path::{Path, PathBuf};

/// Flags of `bale create`; unset values fall back to `bale-config.toml`.
#[derive(Debug, Default)]
pub struct CreateFlags {
    pub output: Option<PathBuf>,
    pub architecture: Option<String>,
    pub flavor: Option<String>,
    pub skeleton: bool,
    pub compression: Option<String>,
    pub images: Option<PathBuf>,
    pub differential: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

fn parse_compression(name: &str) -> Result<Compression, String> {
    match name {
        "zstd" => Ok(Compression::Zstd),
        "gzip" => Ok(Compression::Gzip),
        "none" => Ok(Compression::None),
        other => Err(format!(
            "unknown compression '{other}', expected zstd, gzip or none"
        )),
    }
}

pub fn run(
    package_dir: &Path,
    flags: CreateFlags,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let config = global.load_config(package_dir)?;
    let mut opts = CreateOptions::from_config(package_dir, &config).map_err(|e| e.to_string())?;
    opts.remote = global.remote_config(&config)?;
    if let Some(output) = flags.output {
        opts.output_dir = output;
    }
    if let Some(arch) = flags.architecture {
        opts.architecture = arch;
    }
    if let Some(flavor) = flags.flavor {
        opts.flavor = flavor;
    }
    if let Some(name) = flags.compression.as_deref() {
        opts.compression = parse_compression(name)?;
    }
    if flags.images.is_some() {
        opts.images = flags.images;
    }
    if let Some(cache) = flags.cache_dir {
        opts.cache_dir = cache;
    }
    opts.skeleton = flags.skeleton;
    opts.differential = flags.differential;

    let pb = spinner("creating package…", global.json);
    let result = create(&opts, cancel).map_err(|e| {
        spin_fail(&pb, "create failed");
        e.to_string()
    })?;
    spin_ok(&pb, "package created");

    if global.json {
        println!("{}", json_pretty(&result)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("package:    {}", result.tarball.display());
    println!(
        "components: {}",
        result
            .package
            .components
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("files:      {}", result.files);
    println!("images:     {}", result.images);
    println!("checksum:   {}", result.aggregate);
    for asset in &result.remote_assets {
        println!("remote:     {asset} (not packaged)");
    }
    if let Some(report) = &result.pruned {
        println!(
            "differential against {}:",
            result.package.build.differential_package_version
        );
        for dropped in report.images_dropped.iter().chain(&report.repos_dropped) {
            println!("  {}", colorize_change(false, dropped));
        }
    }
    Ok(EXIT_SUCCESS)
}
