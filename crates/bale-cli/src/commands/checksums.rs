use super::{json_pretty, GlobalOpts, EXIT_SUCCESS};
use bale_schema::parse_package_file;
use bale_store::{generate_checksums, validate_checksums, CancelToken, PackageLayout};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Serialize)]
struct GenerateReport<'a> {
    package_dir: &'a Path,
    files: usize,
    aggregate: String,
    manifest_updated: bool,
}

/// Write `checksums.txt` for a package directory and record the aggregate
/// in its `bale.yaml`, if it has one.
pub fn generate(dir: &Path, global: &GlobalOpts<'_>, cancel: &CancelToken) -> Result<u8, String> {
    let layout = PackageLayout::new(dir);
    let (manifest, aggregate) = generate_checksums(&layout, cancel).map_err(|e| e.to_string())?;

    let manifest_path = layout.manifest_path();
    let manifest_updated = manifest_path.is_file();
    if manifest_updated {
        let mut pkg = parse_package_file(&manifest_path).map_err(|e| e.to_string())?;
        pkg.metadata.aggregate_checksum = aggregate.to_string();
        pkg.write_to_file(&manifest_path).map_err(|e| e.to_string())?;
    }

    let report = GenerateReport {
        package_dir: dir,
        files: manifest.len(),
        aggregate: aggregate.into_inner(),
        manifest_updated,
    };
    if global.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("{} files, aggregate {}", report.files, report.aggregate);
    }
    Ok(EXIT_SUCCESS)
}

/// Validate a package directory against its checksums. With `paths`, only
/// those package-relative files are checked.
pub fn verify(
    dir: &Path,
    paths: &[String],
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let layout = PackageLayout::new(dir);
    let pkg = parse_package_file(layout.manifest_path()).map_err(|e| e.to_string())?;
    let subset: BTreeSet<String> = paths.iter().cloned().collect();
    validate_checksums(&layout, &pkg.metadata.aggregate_checksum, &subset, cancel)
        .map_err(|e| e.to_string())?;

    if global.json {
        let payload = serde_json::json!({
            "package_dir": dir,
            "aggregate": pkg.metadata.aggregate_checksum,
            "partial": !subset.is_empty(),
            "valid": true,
        });
        println!("{}", json_pretty(&payload)?);
    } else if subset.is_empty() {
        println!("package {} is intact", pkg.metadata.name);
    } else {
        println!(
            "{} of package {} verified",
            subset.len(),
            pkg.metadata.name
        );
    }
    Ok(EXIT_SUCCESS)
}
