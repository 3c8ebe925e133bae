use crate::CoreError;
use bale_remote::RemoteConfig;
use bale_store::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "bale-config.toml";

/// Build defaults read from `bale-config.toml`.
///
/// Every field is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BaleConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,
    /// Directory created packages are written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// `zstd`, `gzip` or `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// OCI image layout images are staged from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

impl BaleConfig {
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(format!("{CONFIG_FILE}: {e}")))?;
        config.compression()?;
        if config.concurrency == Some(0) {
            return Err(CoreError::Config(
                "concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Load `bale-config.toml` from `dir` if present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self, CoreError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// The configured archive compression, if any.
    pub fn compression(&self) -> Result<Option<Compression>, CoreError> {
        match self.compression.as_deref() {
            None => Ok(None),
            Some("zstd") => Ok(Some(Compression::Zstd)),
            Some("gzip") => Ok(Some(Compression::Gzip)),
            Some("none") => Ok(Some(Compression::None)),
            Some(other) => Err(CoreError::Config(format!(
                "unknown compression '{other}', expected zstd, gzip or none"
            ))),
        }
    }

    /// Remote settings: the `[remote]` table if present, otherwise the user
    /// config file.
    pub fn remote_config(&self) -> Result<RemoteConfig, CoreError> {
        let mut remote = match &self.remote {
            Some(r) => r.clone(),
            None => RemoteConfig::load_default()?,
        };
        if let Some(n) = self.concurrency {
            remote.concurrency = n;
        }
        Ok(remote)
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }
}
