use crate::CoreError;
use bale_remote::{PackageSource, PullOptions};
use bale_schema::{split_git_ref, Component, GitRef, ImageRef, Package};
use bale_store::{CancelToken, PackageLayout};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Tags that routinely move to new content and are never treated as
/// already shipped.
const VOLATILE_TAGS: [&str; 3] = [":latest", ":stable", ":nightly"];

/// Images and repos already shipped by a reference package.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DifferentialIndex {
    pub images: BTreeSet<String>,
    pub repos: BTreeSet<String>,
    pub reference_version: String,
}

/// What a prune removed, per kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub images_dropped: Vec<String>,
    pub repos_dropped: Vec<String>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.images_dropped.is_empty() && self.repos_dropped.is_empty()
    }
}

impl DifferentialIndex {
    /// Union the images and repos of every component of `reference`.
    pub fn from_package(reference: &Package) -> Self {
        let mut index = Self {
            reference_version: reference.metadata.version.clone(),
            ..Self::default()
        };
        for component in &reference.components {
            index.images.extend(component.images.iter().cloned());
            index.repos.extend(component.repos.iter().cloned());
        }
        index
    }

    /// Load the reference package definition from a tarball, an OCI layout
    /// or a registry and index it. Only the metadata files are fetched.
    pub fn load(
        source: &PackageSource,
        scratch: &PackageLayout,
        opts: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<Self, CoreError> {
        debug!("loading differential reference from {}", source.location());
        let reference = source.load_metadata(scratch, opts, cancel)?;
        let index = Self::from_package(&reference);
        info!(
            "reference package {} {} ships {} images and {} repos",
            reference.metadata.name,
            index.reference_version,
            index.images.len(),
            index.repos.len()
        );
        Ok(index)
    }

    /// Reject a build whose version cannot be told apart from the reference.
    pub fn check_version(&self, version: &str) -> Result<(), CoreError> {
        if self.reference_version.is_empty() || version.is_empty() {
            return Err(CoreError::Differential(
                "both the package and the reference package must have a version".to_owned(),
            ));
        }
        if self.reference_version == version {
            return Err(CoreError::Differential(format!(
                "package version {version} equals the reference version; increment it"
            )));
        }
        Ok(())
    }

    fn ships_image(&self, image: &str) -> Result<bool, CoreError> {
        let parsed = ImageRef::parse(image)?;
        if VOLATILE_TAGS.contains(&parsed.tag_or_digest.as_str()) {
            return Ok(false);
        }
        Ok(self.images.contains(image))
    }

    fn ships_repo(&self, repo: &str) -> Result<bool, CoreError> {
        let (_, raw_ref) = split_git_ref(repo)?;
        if !GitRef::classify(&raw_ref).is_pinned() {
            return Ok(false);
        }
        Ok(self.repos.contains(repo))
    }
}

/// Drop images and repos the reference package already ships from every
/// component. Order of the surviving entries is preserved.
pub fn prune_components(
    components: &mut [Component],
    index: &DifferentialIndex,
) -> Result<PruneReport, CoreError> {
    let mut report = PruneReport::default();
    for component in components.iter_mut() {
        let mut images = Vec::with_capacity(component.images.len());
        for image in component.images.drain(..) {
            if index.ships_image(&image)? {
                debug!("image {image} of '{}' is already in the reference package", component.name);
                report.images_dropped.push(image);
            } else {
                images.push(image);
            }
        }
        component.images = images;

        let mut repos = Vec::with_capacity(component.repos.len());
        for repo in component.repos.drain(..) {
            if index.ships_repo(&repo)? {
                debug!("repo {repo} of '{}' is already in the reference package", component.name);
                report.repos_dropped.push(repo);
            } else {
                repos.push(repo);
            }
        }
        component.repos = repos;
    }
    Ok(report)
}
