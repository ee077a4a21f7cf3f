//! Configuration loading and validation

use anyhow::{bail, Context, Result};
use li3ds_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the metadata API; dry run on the staging area when unset
    #[serde(default)]
    pub url: Option<String>,
    /// API key sent as `X-API-KEY`
    #[serde(default)]
    pub key: Option<String>,
    /// Ignore proxy environment variables
    #[serde(default)]
    pub no_proxy: bool,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            no_proxy: false,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request on connection errors
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff step in milliseconds, multiplied by the attempt number
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Data owner; defaults to the login name
    #[serde(default)]
    pub owner: Option<String>,
    /// Pretty-print indent of logged payloads
    #[serde(default)]
    pub indent: Option<usize>,
}

/// Command-line values taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub no_proxy: bool,
    pub owner: Option<String>,
    pub indent: Option<usize>,
}

impl Config {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.api_url {
            self.api.url = Some(url);
        }
        if let Some(key) = overrides.api_key {
            self.api.key = Some(key);
        }
        if overrides.no_proxy {
            self.api.no_proxy = true;
        }
        if let Some(owner) = overrides.owner {
            self.import.owner = Some(owner);
        }
        if overrides.indent.is_some() {
            self.import.indent = overrides.indent;
        }
    }

    /// Reject settings that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.api.url.is_some() && self.api.key.is_none() {
            bail!("no api key provided (use -k/--api-key or [api] key)");
        }
        if self.retry.max_attempts == 0 {
            bail!("[retry] max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_step: Duration::from_millis(self.retry.backoff_ms),
        }
    }

    /// Configured owner, else the login name from the environment
    pub fn owner(&self) -> String {
        self.import
            .owner
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Write a configuration file holding every default
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        api: ApiConfig::default(),
        retry: RetryConfig::default(),
        import: ImportConfig {
            owner: None,
            indent: Some(2),
        },
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("li3ds.toml")).unwrap();
        assert!(config.api.url.is_none());
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\nurl = \"http://localhost:5000/api/v1\"\nkey = \"secret\"\n\n[retry]\nbackoff_ms = 5\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.api.url.as_deref(), Some("http://localhost:5000/api/v1"));
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry_policy().backoff_step, Duration::from_millis(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_saved_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("li3ds.toml");
        save_default_config(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("max_attempts = 10"));
        assert!(!content.contains("url"));

        let config = load_config(&path).unwrap();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.import.indent, Some(2));
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[api\nurl = 1").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = Config::default();
        config.import.owner = Some("file-owner".to_string());
        config.apply(Overrides {
            api_url: Some("http://example.org/api".to_string()),
            owner: Some("alice".to_string()),
            indent: Some(2),
            ..Default::default()
        });
        assert_eq!(config.owner(), "alice");
        assert_eq!(config.import.indent, Some(2));
        assert!(config.validate().is_err());

        config.apply(Overrides {
            api_key: Some("k".to_string()),
            ..Default::default()
        });
        config.validate().unwrap();
    }
}
