use super::{json_pretty, spin_fail, spin_ok, spinner, GlobalOpts, EXIT_SUCCESS};
use bale_core::publish;
use bale_store::CancelToken;
use std::path::Path;

pub fn run(
    package: &Path,
    layout_dir: &Path,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let pb = spinner("publishing package…", global.json);
    let result = publish(package, layout_dir, cancel).map_err(|e| {
        spin_fail(&pb, "publish failed");
        e.to_string()
    })?;
    spin_ok(&pb, "package published");

    if global.json {
        println!("{}", json_pretty(&result)?);
    } else {
        println!(
            "published {} {} to {} ({} layers, manifest {})",
            result.package.metadata.name,
            result.package.metadata.version,
            layout_dir.display(),
            result.layers.len(),
            result.manifest.digest.to_oci(),
        );
    }
    Ok(EXIT_SUCCESS)
}
