use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub imap: ImapConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mailbox: default_mailbox(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ImapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Chunking, pacing and retry knobs for remote fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_rebuild_on_corruption")]
    pub rebuild_on_corruption: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            rebuild_on_corruption: default_rebuild_on_corruption(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_days")]
    pub default_days: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_days: default_days(),
        }
    }
}

fn default_host() -> String {
    "imap.gmail.com".to_string()
}

fn default_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    100
}

fn default_chunk_delay_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".gmail-search/cache.db")
}

fn default_rebuild_on_corruption() -> bool {
    true
}

fn default_days() -> u32 {
    365
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SearchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SearchError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SearchError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SearchError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SearchError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.imap.host.trim().is_empty() {
            return Err(SearchError::ConfigError(
                "imap.host cannot be empty".to_string(),
            ));
        }
        if self.imap.mailbox.trim().is_empty() {
            return Err(SearchError::ConfigError(
                "imap.mailbox cannot be empty".to_string(),
            ));
        }
        if self.imap.timeout_secs == 0 {
            return Err(SearchError::ConfigError(
                "imap.timeout_secs must be at least 1".to_string(),
            ));
        }

        // Gmail rejects very long UID sets
        if self.fetch.chunk_size == 0 {
            return Err(SearchError::ConfigError(
                "fetch.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.fetch.chunk_size > 1000 {
            return Err(SearchError::ConfigError(
                "fetch.chunk_size cannot exceed 1000".to_string(),
            ));
        }
        if self.fetch.max_attempts == 0 {
            return Err(SearchError::ConfigError(
                "fetch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.fetch.max_attempts > 10 {
            return Err(SearchError::ConfigError(
                "fetch.max_attempts cannot exceed 10".to_string(),
            ));
        }

        if self.search.default_days == 0 {
            return Err(SearchError::ConfigError(
                "search.default_days must be at least 1".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
