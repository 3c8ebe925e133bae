use super::{json_pretty, spin_fail, spin_ok, spinner, GlobalOpts, EXIT_SUCCESS};
use bale_core::{pull, PullRequest};
use bale_schema::ComponentFilter;
use bale_store::CancelToken;
use std::path::{Path, PathBuf};

pub fn run(
    source: &str,
    dest: &Path,
    components: Option<&str>,
    archive_to: Option<PathBuf>,
    global: &GlobalOpts<'_>,
    cancel: &CancelToken,
) -> Result<u8, String> {
    let config = global.load_config(Path::new("."))?;
    let filter = match components {
        Some(expr) => ComponentFilter::parse(expr).map_err(|e| e.to_string())?,
        None => ComponentFilter::all(),
    };
    let request = PullRequest {
        filter,
        remote: global.remote_config(&config)?,
        archive_to,
        ..PullRequest::new(source, dest)
    };

    let pb = spinner("pulling package…", global.json);
    let (loaded, archived) = pull(&request, cancel).map_err(|e| {
        spin_fail(&pb, "pull failed");
        e.to_string()
    })?;
    spin_ok(&pb, "pull complete");

    let (pulled, skipped, bytes) = loaded
        .pull
        .as_ref()
        .map_or((0, 0, 0), |r| (r.layers_pulled, r.layers_skipped, r.bytes_pulled));
    if global.json {
        let payload = serde_json::json!({
            "package": loaded.package.metadata.name,
            "version": loaded.package.metadata.version,
            "dest": dest,
            "components": loaded.components,
            "partial": loaded.is_partial(),
            "layers_pulled": pulled,
            "layers_skipped": skipped,
            "bytes_pulled": bytes,
            "archive": archived,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "pulled {} {} into {} ({} layers, {bytes} bytes; {skipped} already present)",
            loaded.package.metadata.name,
            loaded.package.metadata.version,
            dest.display(),
            pulled,
        );
        println!("components: {}", loaded.components.join(", "));
        if loaded.is_partial() {
            println!("partial package: only the selected components were fetched and verified");
        }
        if let Some(path) = archived {
            println!("archived to {}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
