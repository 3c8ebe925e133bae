//! Component import resolution.
//!
//! A component may point at a component of another package through
//! `import.path` (a package directory relative to the importing package) or
//! `import.url` (a published skeleton package). Resolution follows the chain
//! of imports to a concrete component, rewrites the local paths of every
//! link so they stay valid relative to the top-level package, and folds the
//! chain back into one component: the importing side wins on identity
//! fields, asset lists accumulate.

use crate::CoreError;
use bale_schema::{
    compatible, parse_package_file, Action, ActionSet, Chart, Component, Constant, ManifestSet, Package,
    Variable,
};
use bale_store::{CancelToken, MANIFEST_FILE};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads a package definition from a package directory.
pub trait PackageLoader {
    fn load(&self, dir: &Path) -> Result<Package, CoreError>;
}

/// Loads `bale.yaml` from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl PackageLoader for FsLoader {
    fn load(&self, dir: &Path) -> Result<Package, CoreError> {
        Ok(parse_package_file(dir.join(MANIFEST_FILE))?)
    }
}

/// Fetches published skeleton packages for `import.url` references.
pub trait SkeletonFetcher {
    /// Fetch the package at `url` and unpack the content of its component
    /// `name`. Returns the package definition and the directory the
    /// component's local paths are relative to.
    fn fetch(&self, url: &str, name: &str) -> Result<(Package, PathBuf), CoreError>;
}

fn is_url(path: &str) -> bool {
    path.contains("://")
}

/// Lexically join two `/`-separated paths, folding `.` and `..` segments.
fn join_rel(prefix: &str, path: &str) -> String {
    let absolute = prefix.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in prefix.split('/').chain(path.split('/')) {
        match seg {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    match (absolute, parts.is_empty()) {
        (true, _) => format!("/{}", parts.join("/")),
        (false, true) => ".".to_owned(),
        (false, false) => parts.join("/"),
    }
}

fn relative_to(path: &str, prefix: &str) -> String {
    if path.is_empty() || is_url(path) || Path::new(path).is_absolute() {
        path.to_owned()
    } else {
        join_rel(prefix, path)
    }
}

fn fix_action_dirs(actions: &mut [Action], default_dir: &str, prefix: &str) {
    for action in actions {
        let dir = action.dir.as_deref().unwrap_or(default_dir);
        action.dir = Some(relative_to(dir, prefix));
    }
}

/// Rewrite the local asset paths of `component` so they resolve from the
/// package that imports it through `prefix`.
///
/// URLs and absolute paths are left alone. A kustomization is only rewritten
/// when the prefixed path exists under `base_dir`, since kustomizations may
/// also be remote references that do not look like URLs.
pub fn prefix_local_paths(component: &Component, prefix: &str, base_dir: &Path) -> Component {
    let mut c = component.clone();
    if prefix.is_empty() || prefix == "." {
        return c;
    }
    for file in &mut c.files {
        file.source = relative_to(&file.source, prefix);
    }
    for chart in &mut c.charts {
        chart.local_path = relative_to(&chart.local_path, prefix);
        for values in &mut chart.values_files {
            *values = relative_to(values, prefix);
        }
    }
    for manifest in &mut c.manifests {
        for file in &mut manifest.files {
            *file = relative_to(file, prefix);
        }
        for kustomization in &mut manifest.kustomizations {
            let composed = relative_to(kustomization, prefix);
            if base_dir.join(&composed).exists() {
                *kustomization = composed;
            }
        }
    }
    for injection in &mut c.data_injections {
        injection.source = relative_to(&injection.source, prefix);
    }
    c.cosign_key_path = relative_to(&c.cosign_key_path, prefix);

    let on_create = &mut c.actions.on_create;
    let default_dir = on_create.defaults.dir.clone();
    fix_action_dirs(&mut on_create.before, &default_dir, prefix);
    fix_action_dirs(&mut on_create.after, &default_dir, prefix);
    fix_action_dirs(&mut on_create.on_success, &default_dir, prefix);
    fix_action_dirs(&mut on_create.on_failure, &default_dir, prefix);
    c
}

fn merge_charts(base: &mut Vec<Chart>, over: &[Chart]) {
    for chart in over {
        if let Some(existing) = base.iter_mut().find(|c| c.name == chart.name) {
            if !chart.namespace.is_empty() {
                existing.namespace.clone_from(&chart.namespace);
            }
            if !chart.release_name.is_empty() {
                existing.release_name.clone_from(&chart.release_name);
            }
            if !chart.version.is_empty() {
                existing.version.clone_from(&chart.version);
            }
            if !chart.url.is_empty() {
                existing.url.clone_from(&chart.url);
            }
            existing.values_files.extend(chart.values_files.iter().cloned());
        } else {
            base.push(chart.clone());
        }
    }
}

fn merge_manifests(base: &mut Vec<ManifestSet>, over: &[ManifestSet]) {
    for manifest in over {
        if let Some(existing) = base.iter_mut().find(|m| m.name == manifest.name) {
            if !manifest.namespace.is_empty() {
                existing.namespace.clone_from(&manifest.namespace);
            }
            existing.files.extend(manifest.files.iter().cloned());
            existing
                .kustomizations
                .extend(manifest.kustomizations.iter().cloned());
        } else {
            base.push(manifest.clone());
        }
    }
}

fn merge_action_set(base: &mut ActionSet, over: &ActionSet) {
    base.defaults = over.defaults.clone();
    base.before.extend(over.before.iter().cloned());
    base.after.extend(over.after.iter().cloned());
    base.on_success.extend(over.on_success.iter().cloned());
    base.on_failure.extend(over.on_failure.iter().cloned());
}

/// Layer `over` (the importing component) on top of `base` (the imported
/// content) and return the result.
///
/// Identity fields (`name`, `default`, `required`, `group`) always come from
/// `over`; `description`, `cosignKeyPath` and the `only` clauses only when
/// `over` sets them. Asset lists are appended, `base` first, except charts
/// and manifests, which are merged by name. A `localOS` clause may not be
/// redefined.
pub fn merge_component(base: &Component, over: &Component) -> Result<Component, CoreError> {
    let mut c = base.clone();
    c.name.clone_from(&over.name);
    c.default = over.default;
    c.required = over.required;
    c.group.clone_from(&over.group);
    if !over.description.is_empty() {
        c.description.clone_from(&over.description);
    }
    if !over.cosign_key_path.is_empty() {
        c.cosign_key_path.clone_from(&over.cosign_key_path);
    }
    if !over.only.flavor.is_empty() {
        c.only.flavor.clone_from(&over.only.flavor);
    }
    if !over.only.cluster.architecture.is_empty() {
        c.only.cluster.architecture.clone_from(&over.only.cluster.architecture);
    }
    if !over.only.cluster.distros.is_empty() {
        c.only.cluster.distros.clone_from(&over.only.cluster.distros);
    }
    if !over.only.local_os.is_empty() {
        if !c.only.local_os.is_empty() {
            return Err(CoreError::ImportResolution {
                component: over.name.clone(),
                reason: format!(
                    "only.localOS '{}' cannot be redefined as '{}'",
                    c.only.local_os, over.only.local_os
                ),
            });
        }
        c.only.local_os.clone_from(&over.only.local_os);
    }

    c.data_injections.extend(over.data_injections.iter().cloned());
    c.files.extend(over.files.iter().cloned());
    c.images.extend(over.images.iter().cloned());
    c.repos.extend(over.repos.iter().cloned());
    merge_charts(&mut c.charts, &over.charts);
    merge_manifests(&mut c.manifests, &over.manifests);

    merge_action_set(&mut c.actions.on_create, &over.actions.on_create);
    merge_action_set(&mut c.actions.on_deploy, &over.actions.on_deploy);
    merge_action_set(&mut c.actions.on_remove, &over.actions.on_remove);

    c.import = None;
    Ok(c)
}

/// Append the entries of `from` whose names are not yet in `into`.
fn merge_by_name<T: Clone>(into: &mut Vec<T>, from: &[T], name: impl Fn(&T) -> &str) {
    for item in from {
        if !into.iter().any(|existing| name(existing) == name(item)) {
            into.push(item.clone());
        }
    }
}

#[derive(Debug, Clone)]
struct Link {
    component: Component,
    /// Path of this link's package relative to the head package, or the
    /// directory a remote skeleton component was unpacked into.
    prefix: String,
    /// `import.path` or `import.url` that led here, as written.
    location: String,
    remote: bool,
    variables: Vec<Variable>,
    constants: Vec<Constant>,
}

/// The chain of components an import leads through, head (the importing
/// component) first.
#[derive(Debug, Clone)]
pub struct ImportChain {
    links: Vec<Link>,
    base_dir: PathBuf,
}

impl ImportChain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Fold the chain into one component, tail first.
    pub fn compose(&self) -> Result<Component, CoreError> {
        let Some((tail, rest)) = self.links.split_last() else {
            return Err(CoreError::ImportResolution {
                component: String::new(),
                reason: "empty import chain".to_owned(),
            });
        };
        let mut composed = prefix_local_paths(&tail.component, &tail.prefix, &self.base_dir);
        composed.import = None;
        for link in rest.iter().rev() {
            let fixed = prefix_local_paths(&link.component, &link.prefix, &self.base_dir);
            composed = merge_component(&composed, &fixed)?;
        }
        Ok(composed)
    }

    /// Variables of every imported package, head-side first.
    fn variables(&self) -> impl Iterator<Item = &[Variable]> {
        self.links.iter().skip(1).map(|l| l.variables.as_slice())
    }

    fn constants(&self) -> impl Iterator<Item = &[Constant]> {
        self.links.iter().skip(1).map(|l| l.constants.as_slice())
    }
}

fn import_name(c: &Component) -> &str {
    match &c.import {
        Some(i) if !i.name.is_empty() => &i.name,
        _ => &c.name,
    }
}

impl fmt::Display for ImportChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(head) = self.links.first() else {
            return Ok(());
        };
        if self.links.len() == 1 && head.component.import.is_none() {
            return write!(f, "component \"{}\" imports nothing", head.component.name);
        }
        write!(f, "component \"{}\"", head.component.name)?;
        for (i, link) in self.links.iter().enumerate() {
            let Some(import) = &link.component.import else {
                break;
            };
            let location = if import.path.is_empty() {
                &import.url
            } else {
                &import.path
            };
            let sep = if i == 0 { " imports" } else { ", which imports" };
            write!(f, "{sep} \"{}\" in {location}", import_name(&link.component))?;
        }
        Ok(())
    }
}

/// Flattens component imports.
pub struct Resolver<'a> {
    loader: &'a dyn PackageLoader,
    fetcher: Option<&'a dyn SkeletonFetcher>,
    base_dir: PathBuf,
    arch: String,
    flavor: String,
    skeleton: bool,
}

impl<'a> Resolver<'a> {
    /// A resolver for the package in `base_dir`, building for `arch`.
    pub fn new(loader: &'a dyn PackageLoader, base_dir: impl Into<PathBuf>, arch: &str) -> Self {
        Self {
            loader,
            fetcher: None,
            base_dir: base_dir.into(),
            arch: arch.to_owned(),
            flavor: String::new(),
            skeleton: false,
        }
    }

    #[must_use]
    pub fn with_flavor(mut self, flavor: &str) -> Self {
        flavor.clone_into(&mut self.flavor);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: &'a dyn SkeletonFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Skeleton builds keep components of every architecture.
    #[must_use]
    pub fn skeleton(mut self, skeleton: bool) -> Self {
        self.skeleton = skeleton;
        self
    }

    fn admits(&self, c: &Component) -> bool {
        if self.skeleton {
            c.only.flavor.is_empty() || c.only.flavor == self.flavor
        } else {
            compatible(c, &self.arch, &self.flavor)
        }
    }

    fn fail(chain: &ImportChain, reason: impl fmt::Display) -> CoreError {
        let component = chain
            .links
            .first()
            .map(|l| l.component.name.clone())
            .unwrap_or_default();
        CoreError::ImportResolution {
            component,
            reason: format!("{reason} ({chain})"),
        }
    }

    /// Follow `component`'s imports to a concrete component.
    pub fn chain(&self, component: &Component, cancel: &CancelToken) -> Result<ImportChain, CoreError> {
        let mut chain = ImportChain {
            links: vec![Link {
                component: component.clone(),
                prefix: ".".to_owned(),
                location: ".".to_owned(),
                remote: false,
                variables: Vec::new(),
                constants: Vec::new(),
            }],
            base_dir: self.base_dir.clone(),
        };
        let mut visited: BTreeSet<(String, String)> = BTreeSet::new();
        visited.insert((".".to_owned(), component.name.clone()));

        loop {
            cancel.check()?;
            let Some(node) = chain.links.last() else {
                break;
            };
            let Some(import) = node.component.import.clone() else {
                break;
            };
            import
                .validate(&node.component.name)
                .map_err(|e| Self::fail(&chain, e))?;
            let name = import_name(&node.component).to_owned();
            let parent_remote = node.remote;
            let parent_prefix = node.prefix.clone();
            let parent_arch = node.component.only.cluster.architecture.clone();

            let (package, prefix, location, remote) = if import.path.is_empty() {
                if parent_remote {
                    return Err(Self::fail(
                        &chain,
                        "remote components cannot import other remote components",
                    ));
                }
                let fetcher = self
                    .fetcher
                    .ok_or_else(|| Self::fail(&chain, format!("cannot fetch {}: no remote configured", import.url)))?;
                debug!("fetching skeleton component '{name}' from {}", import.url);
                let (package, dir) = fetcher.fetch(&import.url, &name)?;
                (package, dir.display().to_string(), import.url.clone(), true)
            } else {
                if parent_remote {
                    return Err(Self::fail(
                        &chain,
                        "remote components cannot import local components",
                    ));
                }
                let prefix = join_rel(&parent_prefix, &import.path);
                if !visited.insert((prefix.clone(), name.clone())) {
                    return Err(CoreError::ImportCycle {
                        chain: format!("{chain}, which imports \"{name}\" in {prefix} again"),
                    });
                }
                let dir = self.base_dir.join(&prefix);
                if !dir.join(MANIFEST_FILE).is_file() {
                    return Err(Self::fail(
                        &chain,
                        format!("no {MANIFEST_FILE} in {prefix}"),
                    ));
                }
                debug!("loading '{name}' from {prefix}");
                let package = self.loader.load(&dir)?;
                (package, prefix, import.path.clone(), false)
            };

            let mut found = package.components.iter().filter(|c| {
                if c.name != name {
                    return false;
                }
                if parent_arch.is_empty() {
                    self.admits(c)
                } else {
                    let mut effective = (*c).clone();
                    effective.only.cluster.architecture.clone_from(&parent_arch);
                    self.admits(&effective)
                }
            });
            let Some(matched) = found.next() else {
                return Err(Self::fail(
                    &chain,
                    format!("no compatible component named '{name}' found in {location}"),
                ));
            };
            if found.next().is_some() {
                return Err(Self::fail(
                    &chain,
                    format!(
                        "multiple components named '{name}' found in {location} satisfying '{}'",
                        self.arch
                    ),
                ));
            }

            chain.links.push(Link {
                component: matched.clone(),
                prefix,
                location,
                remote,
                variables: package.variables.clone(),
                constants: package.constants.clone(),
            });
        }
        Ok(chain)
    }

    /// Resolve a single component.
    pub fn resolve_component(
        &self,
        component: &Component,
        cancel: &CancelToken,
    ) -> Result<Component, CoreError> {
        if component.import.is_none() {
            return Ok(component.clone());
        }
        self.chain(component, cancel)?.compose()
    }

    /// Resolve every import of `pkg`.
    ///
    /// Components incompatible with the target platform are dropped.
    /// Variables and constants of imported packages are appended when no
    /// entry of the same name exists yet.
    pub fn resolve_package(&self, pkg: &Package, cancel: &CancelToken) -> Result<Package, CoreError> {
        let mut resolved = pkg.clone();
        resolved.components.clear();
        let mut imports = 0usize;

        for component in &pkg.components {
            cancel.check()?;
            if !self.admits(component) {
                debug!(
                    "skipping component '{}': not for {}/{}",
                    component.name, self.arch, self.flavor
                );
                continue;
            }
            if component.import.is_none() {
                resolved.components.push(component.clone());
                continue;
            }
            let chain = self.chain(component, cancel)?;
            debug!("{chain}");
            let composed = chain.compose()?;
            for vars in chain.variables() {
                merge_by_name(&mut resolved.variables, vars, |v| v.name.as_str());
            }
            for consts in chain.constants() {
                merge_by_name(&mut resolved.constants, consts, |c| c.name.as_str());
            }
            resolved.components.push(composed);
            imports += 1;
        }

        let mut names = BTreeSet::new();
        for c in &resolved.components {
            if !names.insert(c.name.as_str()) {
                return Err(bale_schema::SchemaError::DuplicateComponent(c.name.clone()).into());
            }
        }
        if imports > 0 {
            info!(
                "resolved {imports} imports into {} components",
                resolved.components.len()
            );
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_schema::{parse_package_str, ComponentImport, PackageFile};
    use std::fs;

    fn write_pkg(dir: &Path, yaml: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), yaml).unwrap();
    }

    fn importing(name: &str, path: &str, import_name: &str) -> Component {
        Component {
            name: name.to_owned(),
            import: Some(ComponentImport {
                name: import_name.to_owned(),
                path: path.to_owned(),
                url: String::new(),
            }),
            ..Component::default()
        }
    }

    #[test]
    fn join_rel_folds_segments() {
        assert_eq!(join_rel(".", "a/b"), "a/b");
        assert_eq!(join_rel("a", "../b"), "b");
        assert_eq!(join_rel("../x", "./y/z"), "../x/y/z");
        assert_eq!(join_rel("a", ".."), ".");
        assert_eq!(join_rel("/cache/dir", "files/x"), "/cache/dir/files/x");
    }

    #[test]
    fn merge_override_wins_on_identity() {
        let child = Component {
            name: "b".to_owned(),
            description: "child".to_owned(),
            images: vec!["x".to_owned()],
            ..Component::default()
        };
        let parent = Component {
            name: "a".to_owned(),
            required: true,
            ..importing("a", "../b", "b")
        };
        let merged = merge_component(&child, &parent).unwrap();
        assert_eq!(merged.name, "a");
        assert!(merged.required);
        assert_eq!(merged.images, vec!["x"]);
        assert_eq!(merged.description, "child");
        assert!(merged.import.is_none());
    }

    #[test]
    fn merge_appends_lists_child_first() {
        let child = Component {
            name: "c".to_owned(),
            images: vec!["one".to_owned()],
            repos: vec!["https://git.example.com/a.git".to_owned()],
            ..Component::default()
        };
        let parent = Component {
            name: "c".to_owned(),
            images: vec!["two".to_owned()],
            ..Component::default()
        };
        let merged = merge_component(&child, &parent).unwrap();
        assert_eq!(merged.images, vec!["one", "two"]);
        assert_eq!(merged.repos.len(), 1);
    }

    #[test]
    fn merge_charts_by_name() {
        let child = Component {
            name: "c".to_owned(),
            charts: vec![Chart {
                name: "podinfo".to_owned(),
                namespace: "child-ns".to_owned(),
                values_files: vec!["child-values.yaml".to_owned()],
                ..Chart::default()
            }],
            ..Component::default()
        };
        let parent = Component {
            name: "c".to_owned(),
            charts: vec![
                Chart {
                    name: "podinfo".to_owned(),
                    namespace: "parent-ns".to_owned(),
                    values_files: vec!["parent-values.yaml".to_owned()],
                    ..Chart::default()
                },
                Chart {
                    name: "extra".to_owned(),
                    ..Chart::default()
                },
            ],
            ..Component::default()
        };
        let merged = merge_component(&child, &parent).unwrap();
        assert_eq!(merged.charts.len(), 2);
        assert_eq!(merged.charts[0].namespace, "parent-ns");
        assert_eq!(
            merged.charts[0].values_files,
            vec!["child-values.yaml", "parent-values.yaml"]
        );
        assert_eq!(merged.charts[1].name, "extra");
    }

    #[test]
    fn merge_rejects_local_os_redefinition() {
        let mut child = Component {
            name: "c".to_owned(),
            ..Component::default()
        };
        child.only.local_os = "linux".to_owned();
        let mut parent = child.clone();
        parent.only.local_os = "darwin".to_owned();
        assert!(matches!(
            merge_component(&child, &parent),
            Err(CoreError::ImportResolution { .. })
        ));
    }

    #[test]
    fn merge_actions_append_and_take_parent_defaults() {
        let mut child = Component {
            name: "c".to_owned(),
            ..Component::default()
        };
        child.actions.on_deploy.defaults.shell = "sh".to_owned();
        child.actions.on_deploy.before.push(Action {
            cmd: "child".to_owned(),
            ..Action::default()
        });
        let mut parent = child.clone();
        parent.actions.on_deploy.defaults.shell = "bash".to_owned();
        parent.actions.on_deploy.before = vec![Action {
            cmd: "parent".to_owned(),
            ..Action::default()
        }];
        let merged = merge_component(&child, &parent).unwrap();
        let cmds: Vec<_> = merged
            .actions
            .on_deploy
            .before
            .iter()
            .map(|a| a.cmd.as_str())
            .collect();
        assert_eq!(cmds, vec!["child", "parent"]);
        assert_eq!(merged.actions.on_deploy.defaults.shell, "bash");
    }

    #[test]
    fn prefix_rewrites_local_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/kustom")).unwrap();
        let mut c = Component {
            name: "c".to_owned(),
            files: vec![
                PackageFile {
                    source: "files/a.txt".to_owned(),
                    target: "/etc/a".to_owned(),
                    ..PackageFile::default()
                },
                PackageFile {
                    source: "https://example.com/b.txt".to_owned(),
                    target: "/etc/b".to_owned(),
                    ..PackageFile::default()
                },
                PackageFile {
                    source: "/abs/c.txt".to_owned(),
                    target: "/etc/c".to_owned(),
                    ..PackageFile::default()
                },
            ],
            manifests: vec![ManifestSet {
                name: "m".to_owned(),
                files: vec!["deploy.yaml".to_owned()],
                kustomizations: vec!["kustom".to_owned(), "github.com/org/repo//base".to_owned()],
                ..ManifestSet::default()
            }],
            cosign_key_path: "cosign.pub".to_owned(),
            ..Component::default()
        };
        c.actions.on_create.defaults.dir = "scripts".to_owned();
        c.actions.on_create.before.push(Action {
            cmd: "make".to_owned(),
            ..Action::default()
        });
        c.actions.on_create.after.push(Action {
            cmd: "ls".to_owned(),
            dir: Some("out".to_owned()),
            ..Action::default()
        });

        let fixed = prefix_local_paths(&c, "sub", dir.path());
        assert_eq!(fixed.files[0].source, "sub/files/a.txt");
        assert_eq!(fixed.files[1].source, "https://example.com/b.txt");
        assert_eq!(fixed.files[2].source, "/abs/c.txt");
        assert_eq!(fixed.manifests[0].files, vec!["sub/deploy.yaml"]);
        assert_eq!(
            fixed.manifests[0].kustomizations,
            vec!["sub/kustom", "github.com/org/repo//base"]
        );
        assert_eq!(fixed.cosign_key_path, "sub/cosign.pub");
        assert_eq!(
            fixed.actions.on_create.before[0].dir.as_deref(),
            Some("sub/scripts")
        );
        assert_eq!(fixed.actions.on_create.after[0].dir.as_deref(), Some("sub/out"));
    }

    #[test]
    fn resolves_parent_and_child() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            &dir.path().join("child"),
            r"
metadata:
  name: child
components:
  - name: b
    description: from child
    images: [x]
    files:
      - source: data.txt
        target: /data.txt
",
        );
        let mut parent = importing("a", "child", "b");
        parent.required = true;

        let resolver = Resolver::new(&FsLoader, dir.path(), "amd64");
        let resolved = resolver
            .resolve_component(&parent, &CancelToken::new())
            .unwrap();
        assert_eq!(resolved.name, "a");
        assert!(resolved.required);
        assert_eq!(resolved.images, vec!["x"]);
        assert_eq!(resolved.files[0].source, "child/data.txt");
        assert!(resolved.import.is_none());
    }

    #[test]
    fn chain_selects_architecture_match() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            &dir.path().join("child"),
            r"
metadata:
  name: child
components:
  - name: app
    only:
      cluster:
        architecture: arm64
    images: [app:arm]
  - name: app
    only:
      cluster:
        architecture: amd64
    images: [app:amd]
",
        );
        let parent = importing("app", "child", "");
        let resolved = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&parent, &CancelToken::new())
            .unwrap();
        assert_eq!(resolved.images, vec!["app:amd"]);

        let err = Resolver::new(&FsLoader, dir.path(), "s390x")
            .resolve_component(&parent, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ImportResolution { .. }));
    }

    #[test]
    fn parent_architecture_overrides_child_clause() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            &dir.path().join("child"),
            r"
metadata:
  name: child
components:
  - name: app
    only:
      cluster:
        architecture: arm64
    images: [app:1]
",
        );
        let mut parent = importing("app", "child", "");
        parent.only.cluster.architecture = "amd64".to_owned();
        let resolved = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&parent, &CancelToken::new())
            .unwrap();
        assert_eq!(resolved.images, vec!["app:1"]);
        assert_eq!(resolved.only.cluster.architecture, "amd64");
    }

    #[test]
    fn missing_child_package_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&importing("a", "nowhere", ""), &CancelToken::new())
            .unwrap_err();
        match err {
            CoreError::ImportResolution { component, reason } => {
                assert_eq!(component, "a");
                assert!(reason.contains("nowhere"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn absolute_import_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&importing("a", "/etc/pkg", ""), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ImportResolution { .. }));
    }

    #[test]
    fn self_import_is_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            dir.path(),
            r"
metadata:
  name: loop
components:
  - name: a
    import:
      path: .
",
        );
        let pkg = FsLoader.load(dir.path()).unwrap();
        let err = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_package(&pkg, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ImportCycle { .. }), "{err}");
    }

    #[test]
    fn url_import_without_fetcher_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = importing("a", "", "");
        if let Some(i) = c.import.as_mut() {
            i.url = "oci://reg.example.com/skeleton/a:1.0".to_owned();
        }
        let err = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&c, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ImportResolution { .. }));
    }

    #[test]
    fn remote_fetcher_supplies_skeleton_component() {
        struct Fixed(PathBuf);
        impl SkeletonFetcher for Fixed {
            fn fetch(&self, _url: &str, _name: &str) -> Result<(Package, PathBuf), CoreError> {
                let pkg = parse_package_str(
                    r"
metadata:
  name: remote
components:
  - name: a
    files:
      - source: files/0/app.conf
        target: /etc/app.conf
",
                )?;
                Ok((pkg, self.0.clone()))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fixed(PathBuf::from("/var/cache/bale/dirs/abc"));
        let mut c = importing("a", "", "");
        if let Some(i) = c.import.as_mut() {
            i.url = "oci://reg.example.com/skeleton/a:1.0".to_owned();
        }
        let resolved = Resolver::new(&FsLoader, dir.path(), "amd64")
            .with_fetcher(&fetcher)
            .resolve_component(&c, &CancelToken::new())
            .unwrap();
        assert_eq!(
            resolved.files[0].source,
            "/var/cache/bale/dirs/abc/files/0/app.conf"
        );
    }

    #[test]
    fn variables_merge_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            &dir.path().join("child"),
            r"
metadata:
  name: child
components:
  - name: a
variables:
  - name: DOMAIN
    default: child.example
  - name: REPLICAS
    default: '2'
constants:
  - name: VERSION
    value: '1'
",
        );
        let pkg = parse_package_str(
            r"
metadata:
  name: parent
components:
  - name: a
    import:
      path: child
variables:
  - name: DOMAIN
    default: parent.example
",
        )
        .unwrap();
        let resolved = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_package(&pkg, &CancelToken::new())
            .unwrap();
        let vars: Vec<_> = resolved
            .variables
            .iter()
            .map(|v| (v.name.as_str(), v.default.as_str()))
            .collect();
        assert_eq!(vars, vec![("DOMAIN", "parent.example"), ("REPLICAS", "2")]);
        assert_eq!(resolved.constants.len(), 1);
    }

    #[test]
    fn chain_display_names_every_hop() {
        let dir = tempfile::tempdir().unwrap();
        write_pkg(
            &dir.path().join("b"),
            r"
metadata:
  name: b
components:
  - name: b
    import:
      path: ../c
      name: c
",
        );
        write_pkg(
            &dir.path().join("c"),
            r"
metadata:
  name: c
components:
  - name: c
",
        );
        let chain = Resolver::new(&FsLoader, dir.path(), "amd64")
            .chain(&importing("a", "b", "b"), &CancelToken::new())
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.to_string(),
            "component \"a\" imports \"b\" in b, which imports \"c\" in ../c"
        );
        assert_eq!(chain.links[2].location, "../c");
        assert_eq!(chain.links[2].prefix, "c");
    }

    #[test]
    fn incompatible_components_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = parse_package_str(
            r"
metadata:
  name: p
components:
  - name: everywhere
  - name: arm-only
    only:
      cluster:
        architecture: arm64
  - name: flavored
    only:
      flavor: vanilla
",
        )
        .unwrap();
        let resolved = Resolver::new(&FsLoader, dir.path(), "amd64")
            .with_flavor("vanilla")
            .resolve_package(&pkg, &CancelToken::new())
            .unwrap();
        let names: Vec<_> = resolved.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["everywhere", "flavored"]);

        let skeleton = Resolver::new(&FsLoader, dir.path(), "amd64")
            .skeleton(true)
            .resolve_package(&pkg, &CancelToken::new())
            .unwrap();
        assert_eq!(skeleton.components.len(), 2);
    }

    #[test]
    fn cancelled_resolution_stops() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = Resolver::new(&FsLoader, dir.path(), "amd64")
            .resolve_component(&importing("a", "x", ""), &token)
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
