//! Package manifest model and validation for bale.
//!
//! This crate defines the schema layer: the YAML package definition
//! (`Package`, `Component` and their asset lists), structural validation,
//! the component filter used by both package creation and partial pulls,
//! and parsers for image references and git URLs.

pub mod filter;
pub mod manifest;
pub mod reference;
pub mod types;

pub use filter::{compatible, ComponentFilter, SelectState};
pub use manifest::{
    parse_package_file, parse_package_str, Action, ActionDefaults, ActionSet, Actions, Build,
    Chart, Component, ComponentImport, Constant, DataInjection, InjectionTarget, ManifestSet,
    Metadata, Only, OnlyCluster, Package, PackageFile, Variable, PACKAGE_TEMPLATE_PREFIX,
    SKELETON_ARCH, SUPPORTED_OS,
};
pub use reference::{split_git_ref, GitRef, ImageRef};
pub use types::{is_sha256_hex, LayerTitle, Sha256Digest};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read package definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse package definition: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("invalid package name '{0}': use lowercase letters, digits and '-'")]
    InvalidPackageName(String),
    #[error("package must have at least one component")]
    NoComponents,
    #[error("component name '{0}' is not unique")]
    DuplicateComponent(String),
    #[error("invalid component name '{0}': use lowercase letters, digits and '-'")]
    InvalidComponentName(String),
    #[error("component '{component}' targets unsupported OS '{os}'")]
    UnsupportedOs { component: String, os: String },
    #[error("component '{0}' cannot be both required and default")]
    RequiredAndDefault(String),
    #[error("component '{0}' cannot be both required and grouped")]
    RequiredAndGrouped(String),
    #[error("chart '{chart}' is declared twice in component '{component}'")]
    DuplicateChart { component: String, chart: String },
    #[error("manifest '{manifest}' is declared twice in component '{component}'")]
    DuplicateManifest { component: String, manifest: String },
    #[error("group '{group}' has multiple defaults ('{first}', '{second}')")]
    GroupMultipleDefaults {
        group: String,
        first: String,
        second: String,
    },
    #[error("group '{0}' only contains one component")]
    GroupSingleComponent(String),
    #[error("invalid import in component '{component}': {reason}")]
    InvalidImport { component: String, reason: String },
    #[error("invalid component pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("cannot select both '{first}' and '{second}' from group '{group}'")]
    MultipleInGroup {
        group: String,
        first: String,
        second: String,
    },
    #[error("no default and no selection among grouped components: {0}")]
    NoGroupSelection(String),
    #[error("no compatible component matches '{request}' (similar: [{near}])")]
    UnmatchedComponent { request: String, near: String },
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageRef { reference: String, reason: String },
    #[error("invalid git URL: {0}")]
    InvalidGitUrl(String),
}
