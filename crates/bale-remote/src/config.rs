use crate::retry::RetryPolicy;
use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 3;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 5000;

/// Connection settings for OCI registries.
///
/// `url`, when non-empty, replaces the registry host of every reference
/// (a mirror or a local test registry). Requests use `http://` when
/// `plain_http` is set and `https://` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub plain_http: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_MS
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            plain_http: false,
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
        }
    }
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    /// Load config from `~/.config/bale/remote.json`, falling back to
    /// defaults when the file does not exist.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))?;
        config.url = config.url.trim_end_matches('/').to_owned();
        if config.concurrency == 0 {
            return Err(RemoteError::Config(
                "concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/bale/remote.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");

        let config = RemoteConfig::new("https://registry.example.com/")
            .with_token("secret123")
            .with_plain_http(true);
        config.save(&path).unwrap();

        let loaded = RemoteConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.url, "https://registry.example.com");
        assert_eq!(loaded.auth_token.as_deref(), Some("secret123"));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"url":"http://localhost:5000/"}"#).unwrap();
        let loaded = RemoteConfig::load(&path).unwrap();
        assert_eq!(loaded.url, "http://localhost:5000");
        assert_eq!(loaded.concurrency, 3);
        assert_eq!(loaded.retries, 3);
        assert_eq!(loaded.retry_delay_ms, 500);
        assert_eq!(loaded.max_retry_delay_ms, 5000);
        assert!(!loaded.plain_http);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"concurrency":0}"#).unwrap();
        assert!(matches!(
            RemoteConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RemoteConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn retry_policy_never_zero_attempts() {
        let mut config = RemoteConfig::default();
        config.retries = 0;
        assert_eq!(config.retry_policy().attempts, 1);
    }
}
