//! Package build and consumption orchestration for bale.
//!
//! This crate ties the schema, store and remote layers together: the
//! component import resolver that flattens `import` chains into one
//! component list, the differential engine that drops images and repos
//! already shipped in a reference package, component materialization, and
//! the `create`, `publish` and `pull` operations built on top of them.

pub mod assets;
pub mod composer;
pub mod concurrency;
pub mod config;
pub mod differential;
pub mod images;
pub mod packager;

pub use composer::{
    merge_component, prefix_local_paths, FsLoader, ImportChain, PackageLoader,
    Resolver, SkeletonFetcher,
};
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use config::BaleConfig;
pub use differential::{prune_components, DifferentialIndex, PruneReport};
pub use packager::{
    create, default_cache_dir, host_architecture, inspect, package_file_name, publish, pull,
    CreateOptions, CreateResult, Inspection, OciSkeletonFetcher, PublishResult, PullRequest,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("package definition error: {0}")]
    Schema(#[from] bale_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] bale_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] bale_remote::RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cannot resolve import of component '{component}': {reason}")]
    ImportResolution { component: String, reason: String },
    #[error("import cycle detected: {chain}")]
    ImportCycle { chain: String },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("image '{image}' is not available: {reason}")]
    MissingImage { image: String, reason: String },
    #[error("cannot build a differential package: {0}")]
    Differential(String),
    #[error("asset '{path}' of component '{component}' cannot be packaged: {reason}")]
    Asset {
        component: String,
        path: String,
        reason: String,
    },
}

impl CoreError {
    /// True when the operation stopped because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Store(bale_store::StoreError::Cancelled) => true,
            Self::Remote(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_recognised_through_layers() {
        let direct = CoreError::Store(bale_store::StoreError::Cancelled);
        let remote = CoreError::Remote(bale_remote::RemoteError::Store(
            bale_store::StoreError::Cancelled,
        ));
        assert!(direct.is_cancelled());
        assert!(remote.is_cancelled());
        assert!(!CoreError::Config("x".to_owned()).is_cancelled());
    }

    #[test]
    fn import_errors_name_component() {
        let e = CoreError::ImportResolution {
            component: "web".to_owned(),
            reason: "no compatible component named 'web' found in ../web".to_owned(),
        };
        assert!(e.to_string().contains("'web'"));
    }
}
