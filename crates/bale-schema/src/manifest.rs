use crate::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Architecture marker recorded for packages built without images.
pub const SKELETON_ARCH: &str = "skeleton";

/// Operating systems a component may restrict itself to. Empty means any.
pub const SUPPORTED_OS: &[&str] = &["linux", "darwin", "windows", ""];

/// Marker left by package templating; never valid inside an import reference.
pub const PACKAGE_TEMPLATE_PREFIX: &str = "###BALE_PKG_TMPL_";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Build::is_empty")]
    pub build: Build,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<Constant>,
}

fn default_kind() -> String {
    "BalePackageConfig".to_owned()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authors: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub documentation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub uncompressed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregate_checksum: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Facts recorded at package creation time.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub differential: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub differential_package_version: String,
}

impl Build {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Only::is_empty")]
    pub only: Only,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ComponentImport>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cosign_key_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PackageFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_injections: Vec<DataInjection>,
    #[serde(default, skip_serializing_if = "Actions::is_empty")]
    pub actions: Actions,
}

impl Component {
    /// True when this component is still a pointer into another package.
    pub fn is_import(&self) -> bool {
        self.import.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Only {
    #[serde(default, rename = "localOS", skip_serializing_if = "String::is_empty")]
    pub local_os: String,
    #[serde(default, skip_serializing_if = "OnlyCluster::is_empty")]
    pub cluster: OnlyCluster,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,
}

impl Only {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnlyCluster {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
}

impl OnlyCluster {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Pointer from a component to a component of another package.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentImport {
    /// Component name in the child package; defaults to the importing component's name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Directory of the child package, relative to the importing package.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// `oci://` reference of a published skeleton package.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl ComponentImport {
    /// Structural checks that need no filesystem access.
    pub fn validate(&self, component: &str) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidImport {
            component: component.to_owned(),
            reason: reason.to_owned(),
        };
        match (self.path.is_empty(), self.url.is_empty()) {
            (true, true) => return Err(invalid("neither a path nor a URL was provided")),
            (false, false) => return Err(invalid("both a path and a URL were provided")),
            _ => {}
        }
        if self.path.contains(PACKAGE_TEMPLATE_PREFIX) || self.url.contains(PACKAGE_TEMPLATE_PREFIX)
        {
            return Err(invalid("package templates are not supported in import references"));
        }
        if !self.path.is_empty() && Path::new(&self.path).is_absolute() {
            return Err(invalid(&format!("path '{}' must be relative", self.path)));
        }
        if !self.url.is_empty() && !self.url.starts_with("oci://") {
            return Err(invalid(&format!("URL '{}' is not an oci:// URL", self.url)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageFile {
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shasum: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extract_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSet {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomizations: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataInjection {
    pub source: String,
    pub target: InjectionTarget,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compress: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InjectionTarget {
    pub namespace: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Actions {
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_create: ActionSet,
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_deploy: ActionSet,
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_remove: ActionSet,
}

impl Actions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Mutable access to every action set, in declaration order.
    pub fn sets_mut(&mut self) -> [&mut ActionSet; 3] {
        [&mut self.on_create, &mut self.on_deploy, &mut self.on_remove]
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    #[serde(default, skip_serializing_if = "ActionDefaults::is_empty")]
    pub defaults: ActionDefaults,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Every action in the set, in before/after/onSuccess/onFailure order.
    pub fn actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.before
            .iter_mut()
            .chain(self.after.iter_mut())
            .chain(self.on_success.iter_mut())
            .chain(self.on_failure.iter_mut())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefaults {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shell: String,
}

impl ActionDefaults {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub prompt: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn lowercase_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    NAME_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

impl Package {
    /// True when the package was built without images and is meant to be
    /// re-assembled rather than consumed.
    pub fn is_skeleton(&self) -> bool {
        self.metadata.architecture == SKELETON_ARCH || self.build.architecture == SKELETON_ARCH
    }

    /// Architecture the package targets, preferring the build record.
    pub fn architecture(&self) -> &str {
        if self.build.architecture.is_empty() {
            &self.metadata.architecture
        } else {
            &self.build.architecture
        }
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Structural validation of a package definition.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !lowercase_name(&self.metadata.name) {
            return Err(SchemaError::InvalidPackageName(self.metadata.name.clone()));
        }
        if self.components.is_empty() {
            return Err(SchemaError::NoComponents);
        }

        let mut seen = HashSet::new();
        let mut group_defaults: HashMap<&str, &str> = HashMap::new();
        let mut group_sizes: BTreeMap<&str, usize> = BTreeMap::new();

        for c in &self.components {
            if !seen.insert(c.name.as_str()) {
                return Err(SchemaError::DuplicateComponent(c.name.clone()));
            }
            if !lowercase_name(&c.name) {
                return Err(SchemaError::InvalidComponentName(c.name.clone()));
            }
            if !SUPPORTED_OS.contains(&c.only.local_os.as_str()) {
                return Err(SchemaError::UnsupportedOs {
                    component: c.name.clone(),
                    os: c.only.local_os.clone(),
                });
            }
            if c.required && c.default {
                return Err(SchemaError::RequiredAndDefault(c.name.clone()));
            }
            if c.required && !c.group.is_empty() {
                return Err(SchemaError::RequiredAndGrouped(c.name.clone()));
            }
            if let Some(import) = &c.import {
                import.validate(&c.name)?;
            }

            let mut chart_names = HashSet::new();
            for chart in &c.charts {
                if !chart_names.insert(chart.name.as_str()) {
                    return Err(SchemaError::DuplicateChart {
                        component: c.name.clone(),
                        chart: chart.name.clone(),
                    });
                }
            }
            let mut manifest_names = HashSet::new();
            for m in &c.manifests {
                if !manifest_names.insert(m.name.as_str()) {
                    return Err(SchemaError::DuplicateManifest {
                        component: c.name.clone(),
                        manifest: m.name.clone(),
                    });
                }
            }

            if !c.group.is_empty() {
                *group_sizes.entry(c.group.as_str()).or_default() += 1;
                if c.default {
                    if let Some(first) = group_defaults.insert(c.group.as_str(), c.name.as_str()) {
                        return Err(SchemaError::GroupMultipleDefaults {
                            group: c.group.clone(),
                            first: first.to_owned(),
                            second: c.name.clone(),
                        });
                    }
                }
            }
        }

        if let Some((group, _)) = group_sizes.iter().find(|(_, n)| **n == 1) {
            return Err(SchemaError::GroupSingleComponent((*group).to_owned()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Atomically write the package definition as YAML.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SchemaError> {
        let path = path.as_ref();
        let content = self.to_yaml()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SchemaError::Io(e.error))?;
        Ok(())
    }
}

pub fn parse_package_str(input: &str) -> Result<Package, SchemaError> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn parse_package_file(path: impl AsRef<Path>) -> Result<Package, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_package_str(&content)
}
