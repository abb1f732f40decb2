//! refdata.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::time::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceDataConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub effective_stream_cache: EffectiveStreamCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file. An in-memory store is used when absent.
    pub path: Option<PathBuf>,
    /// Age since last access after which a stream is purged.
    #[serde(default = "default_purge_age")]
    pub purge_age: String,
    /// Maximum number of idle buffers kept by the buffer pool.
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveStreamCacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_purge_age() -> String {
    "30d".to_string()
}

fn default_buffer_pool_size() -> usize {
    64
}

fn default_cache_ttl() -> String {
    "60s".to_string()
}

fn default_cache_max_entries() -> usize {
    1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            purge_age: default_purge_age(),
            buffer_pool_size: default_buffer_pool_size(),
        }
    }
}

impl Default for EffectiveStreamCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl StoreConfig {
    pub fn purge_age(&self) -> CoreResult<Duration> {
        parse_duration(&self.purge_age)
    }
}

impl EffectiveStreamCacheConfig {
    pub fn ttl(&self) -> CoreResult<Duration> {
        parse_duration(&self.ttl)
    }
}

impl ReferenceDataConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ReferenceDataConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration parses and limits are non-zero.
    pub fn validate(&self) -> CoreResult<()> {
        self.store.purge_age()?;
        self.effective_stream_cache.ttl()?;
        if self.effective_stream_cache.max_entries == 0 {
            return Err(CoreError::Config(
                "effective_stream_cache.max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ReferenceDataConfig::from_toml_str("").unwrap();
        assert!(config.store.path.is_none());
        assert_eq!(config.store.purge_age().unwrap(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.effective_stream_cache.ttl().unwrap(), Duration::from_secs(60));
        assert_eq!(config.effective_stream_cache.max_entries, 1024);
    }

    #[test]
    fn parse_full_document() {
        let toml_str = r#"
[store]
path = "/var/lib/refdata/store.redb"
purge_age = "12h"
buffer_pool_size = 8

[effective_stream_cache]
ttl = "5m"
max_entries = 10
"#;
        let config = ReferenceDataConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/var/lib/refdata/store.redb"))
        );
        assert_eq!(config.store.purge_age().unwrap(), Duration::from_secs(12 * 3600));
        assert_eq!(config.store.buffer_pool_size, 8);
        assert_eq!(config.effective_stream_cache.ttl().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let toml_str = r#"
[effective_stream_cache]
ttl = "soon"
"#;
        assert!(ReferenceDataConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn zero_cache_entries_is_rejected() {
        let toml_str = r#"
[effective_stream_cache]
max_entries = 0
"#;
        assert!(ReferenceDataConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let text = ReferenceDataConfig::default().to_toml_string().unwrap();
        assert!(text.contains("purge_age"));
        assert!(ReferenceDataConfig::from_toml_str(&text).is_ok());
    }
}
