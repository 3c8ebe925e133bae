use super::{json_pretty, GlobalOpts, EXIT_SUCCESS};
use bale_core::inspect;
use bale_store::CancelToken;
use std::path::Path;

pub fn run(location: &str, global: &GlobalOpts<'_>, cancel: &CancelToken) -> Result<u8, String> {
    let config = global.load_config(Path::new("."))?;
    let remote = global.remote_config(&config)?;
    let inspection = inspect(location, &remote, cancel).map_err(|e| e.to_string())?;

    if global.json {
        println!("{}", json_pretty(&inspection)?);
        return Ok(EXIT_SUCCESS);
    }

    let pkg = &inspection.package;
    println!("source:       {}", inspection.source);
    println!("name:         {}", pkg.metadata.name);
    println!("version:      {}", pkg.metadata.version);
    println!("architecture: {}", pkg.architecture());
    if !pkg.build.timestamp.is_empty() {
        println!("built:        {} by {}", pkg.build.timestamp, pkg.build.user);
    }
    if pkg.build.differential {
        println!(
            "differential: against {}",
            pkg.build.differential_package_version
        );
    }
    println!("checksum:     {}", pkg.metadata.aggregate_checksum);
    println!("components:");
    for c in &pkg.components {
        let marker = if c.required { " (required)" } else { "" };
        println!("  {}{marker}: {} images", c.name, c.images.len());
    }
    if let Some(layers) = &inspection.layers {
        println!("layers:");
        for layer in layers {
            println!(
                "  {} {:>10}  {}",
                &layer.digest.as_str()[..12],
                layer.size,
                layer.title().unwrap_or("-")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
