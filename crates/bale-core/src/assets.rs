//! Component materialization: copying a component's local assets into a
//! staging directory and archiving it into the package.

use crate::CoreError;
use bale_schema::Component;
use bale_store::{
    component_archive_title, file_digest, pack_dir, CancelToken, Compression, PackageLayout,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of packaging one component.
#[derive(Debug, Clone)]
pub struct PackagedComponent {
    /// The component as recorded in the package manifest.
    pub component: Component,
    /// Package-relative path of the component archive.
    pub archive: String,
    /// Number of local assets copied.
    pub assets: usize,
    /// Remote assets that were recorded but not fetched.
    pub remote: Vec<String>,
}

fn is_remote(path: &str) -> bool {
    path.contains("://")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

struct Stager<'a> {
    component: &'a str,
    base_dir: &'a Path,
    dest: PathBuf,
    copied: usize,
    remote: Vec<String>,
}

impl Stager<'_> {
    fn asset_error(&self, path: &str, reason: impl Into<String>) -> CoreError {
        CoreError::Asset {
            component: self.component.to_owned(),
            path: path.to_owned(),
            reason: reason.into(),
        }
    }

    fn source(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// Copy `path` to `rel` inside the component directory. Returns the new
    /// component-relative path, or `None` for a remote asset.
    fn stage(&mut self, path: &str, rel: &str) -> Result<Option<String>, CoreError> {
        if is_remote(path) {
            warn!("component '{}': remote asset {path} is not fetched", self.component);
            self.remote.push(path.to_owned());
            return Ok(None);
        }
        let src = self.source(path);
        let dst = self.dest.join(rel);
        if src.is_dir() {
            copy_tree(&src, &dst).map_err(|e| self.asset_error(path, e.to_string()))?;
        } else if src.is_file() {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dst).map_err(|e| self.asset_error(path, e.to_string()))?;
        } else {
            return Err(self.asset_error(path, "no such file or directory"));
        }
        debug!("staged {path} as {rel}");
        self.copied += 1;
        Ok(Some(rel.to_owned()))
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), CoreError> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Stage every local asset of `component` under `staging/<name>` and archive
/// it into `layout` as `components/<name>.<ext>`.
///
/// Local paths in `component` are resolved against `base_dir`. For skeleton
/// builds the returned component points at the staged copies, so it can be
/// composed again from the unpacked archive.
pub fn package_component(
    component: &Component,
    base_dir: &Path,
    staging: &Path,
    layout: &PackageLayout,
    compression: Compression,
    skeleton: bool,
    cancel: &CancelToken,
) -> Result<PackagedComponent, CoreError> {
    cancel.check()?;
    let mut stager = Stager {
        component: &component.name,
        base_dir,
        dest: staging.join(&component.name),
        copied: 0,
        remote: Vec::new(),
    };
    fs::create_dir_all(&stager.dest)?;
    let mut staged = component.clone();

    for (i, file) in staged.files.iter_mut().enumerate() {
        let rel = format!("files/{i}/{}", file_name(&file.source));
        let Some(rel) = stager.stage(&file.source, &rel)? else {
            continue;
        };
        if !file.shasum.is_empty() {
            let actual = file_digest(stager.dest.join(&rel))?;
            if !actual.as_str().eq_ignore_ascii_case(&file.shasum) {
                return Err(stager.asset_error(
                    &file.source,
                    format!("shasum mismatch: expected {}, got {actual}", file.shasum),
                ));
            }
        }
        file.source = rel;
    }

    for chart in &mut staged.charts {
        if !chart.local_path.is_empty() {
            let rel = format!("charts/{}", chart.name);
            if let Some(rel) = stager.stage(&chart.local_path, &rel)? {
                chart.local_path = rel;
            }
        }
        for (i, values) in chart.values_files.iter_mut().enumerate() {
            let rel = format!("values/{}-{i}-{}", chart.name, file_name(values));
            if let Some(rel) = stager.stage(values, &rel)? {
                *values = rel;
            }
        }
    }

    for manifest in &mut staged.manifests {
        for (i, file) in manifest.files.iter_mut().enumerate() {
            let rel = format!("manifests/{}-{i}-{}", manifest.name, file_name(file));
            if let Some(rel) = stager.stage(file, &rel)? {
                *file = rel;
            }
        }
        for (i, kustomization) in manifest.kustomizations.iter_mut().enumerate() {
            if !stager.source(kustomization).exists() {
                // Remote kustomize references are left to the deploy side.
                stager.remote.push(kustomization.clone());
                continue;
            }
            let rel = format!("manifests/kustomize-{}-{i}", manifest.name);
            if let Some(rel) = stager.stage(kustomization, &rel)? {
                *kustomization = rel;
            }
        }
    }

    for (i, injection) in staged.data_injections.iter_mut().enumerate() {
        let rel = format!("data/{i}/{}", file_name(&injection.source));
        if let Some(rel) = stager.stage(&injection.source, &rel)? {
            injection.source = rel;
        }
    }

    let archive = component_archive_title(&component.name, compression);
    cancel.check()?;
    pack_dir(&stager.dest, "", &layout.path_of(&archive), compression)?;
    debug!(
        "component '{}': {} assets archived into {archive}",
        component.name, stager.copied
    );

    Ok(PackagedComponent {
        component: if skeleton { staged } else { component.clone() },
        archive,
        assets: stager.copied,
        remote: stager.remote,
    })
}
