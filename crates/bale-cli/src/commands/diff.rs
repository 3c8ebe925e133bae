use super::resolve::{resolved_package, Target};
use super::{colorize_change, json_pretty, GlobalOpts, EXIT_SUCCESS};
use bale_core::{prune_components, DifferentialIndex};
use bale_remote::{PackageSource, PullOptions};
use bale_store::{CancelToken, PackageLayout};
use std::path::Path;

/// Preview what a differential build against `reference` would leave out.
pub fn run(
    reference: &str,
    dir: &Path,
    target: &Target,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let config = global.load_config(dir)?;
    let mut pkg = resolved_package(dir, target, &config, global, cancel)?;
    let remote = global.remote_config(&config)?;

    let source = PackageSource::open(reference, &remote).map_err(|e| e.to_string())?;
    let scratch = tempfile::tempdir().map_err(|e| e.to_string())?;
    let index = DifferentialIndex::load(
        &source,
        &PackageLayout::new(scratch.path()),
        &PullOptions::from_config(&remote),
        cancel,
    )
    .map_err(|e| e.to_string())?;
    index
        .check_version(&pkg.metadata.version)
        .map_err(|e| e.to_string())?;
    let report = prune_components(&mut pkg.components, &index).map_err(|e| e.to_string())?;

    if global.json {
        let payload = serde_json::json!({
            "reference_version": index.reference_version,
            "version": pkg.metadata.version,
            "images_dropped": report.images_dropped,
            "repos_dropped": report.repos_dropped,
            "components": pkg.components.iter().map(|c| serde_json::json!({
                "name": c.name,
                "images": c.images,
                "repos": c.repos,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{} {} against {}:",
        pkg.metadata.name, pkg.metadata.version, index.reference_version
    );
    for dropped in report.images_dropped.iter().chain(&report.repos_dropped) {
        println!("  {}", colorize_change(false, dropped));
    }
    for c in &pkg.components {
        for kept in c.images.iter().chain(&c.repos) {
            println!("  {}", colorize_change(true, kept));
        }
    }
    if report.is_empty() {
        println!("nothing is shipped by the reference package");
    }
    Ok(EXIT_SUCCESS)
}
