//! refdata.toml for the CLI: store and cache settings plus the pipelines,
//! feeds and references the lookups run against.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use refdata_core::time::parse_instant_ms;
use refdata_core::{DocRef, PipelineReference, ReferenceDataConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub reference_data: ReferenceDataConfig,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    /// Tried in order for every lookup.
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
    /// Feed names lookups may not use.
    #[serde(default)]
    pub denied_feeds: Vec<String>,
    /// Context data attached to event streams, read by `Context` references.
    #[serde(default)]
    pub context_streams: Vec<ContextStreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Defaults to the name.
    pub uuid: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub uuid: Option<String>,
    #[serde(rename = "type", default = "default_stream_type")]
    pub stream_type: String,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: u64,
    /// RFC 3339 instant the stream takes effect.
    pub effective: String,
    /// JSON file holding the stream's maps.
    pub data: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStreamConfig {
    /// Id of the event stream the data belongs to.
    pub id: u64,
    pub data: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub pipeline: String,
    pub feed: String,
    #[serde(default = "default_stream_type")]
    pub stream_type: String,
}

fn default_stream_type() -> String {
    "Reference".to_string()
}

impl PipelineConfig {
    pub fn doc_ref(&self) -> DocRef {
        DocRef::pipeline(self.uuid.as_deref().unwrap_or(&self.name), &self.name)
    }
}

impl FeedConfig {
    pub fn doc_ref(&self) -> DocRef {
        DocRef::feed(self.uuid.as_deref().unwrap_or(&self.name), &self.name)
    }
}

impl StreamConfig {
    pub fn effective_ms(&self) -> anyhow::Result<i64> {
        parse_instant_ms(&self.effective)
            .with_context(|| format!("stream {} has a bad effective time", self.id))
    }
}

impl AppConfig {
    /// Load and validate; relative data paths resolve against the config
    /// file's directory.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_data_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_data_paths(&mut self, base: &Path) {
        for stream in self.feeds.iter_mut().flat_map(|feed| feed.streams.iter_mut()) {
            if stream.data.is_relative() {
                stream.data = base.join(&stream.data);
            }
        }
        for context in &mut self.context_streams {
            if context.data.is_relative() {
                context.data = base.join(&context.data);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.reference_data.validate()?;

        let mut stream_ids = HashSet::new();
        for feed in &self.feeds {
            for stream in &feed.streams {
                if !stream_ids.insert(stream.id) {
                    bail!("stream id {} is declared more than once", stream.id);
                }
                stream.effective_ms()?;
            }
        }
        for reference in &self.references {
            if self.pipeline(&reference.pipeline).is_none() {
                bail!("reference names unknown pipeline '{}'", reference.pipeline);
            }
            if self.feed(&reference.feed).is_none() {
                bail!("reference names unknown feed '{}'", reference.feed);
            }
        }
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn feed(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// The configured references, in lookup order.
    pub fn pipeline_references(&self) -> Vec<PipelineReference> {
        self.references
            .iter()
            .filter_map(|r| {
                let pipeline = self.pipeline(&r.pipeline)?;
                let feed = self.feed(&r.feed)?;
                Some(PipelineReference::new(
                    pipeline.doc_ref(),
                    feed.doc_ref(),
                    &r.stream_type,
                ))
            })
            .collect()
    }

    pub fn denied_feed_refs(&self) -> Vec<DocRef> {
        self.denied_feeds
            .iter()
            .filter_map(|name| self.feed(name).map(FeedConfig::doc_ref))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
denied_feeds = ["SECRETS"]

[store]
purge_age = "7d"

[effective_stream_cache]
ttl = "30s"

[[pipelines]]
name = "REFERENCE_LOADER"
version = "3"

[[feeds]]
name = "USER_NAMES"
uuid = "feed-1"

[[feeds.streams]]
id = 1
effective = "2008-01-01T09:47:00Z"
data = "streams/1.json"

[[feeds.streams]]
id = 2
effective = "2009-01-01T09:47:00Z"
data = "/abs/2.json"

[[feeds]]
name = "SECRETS"

[[references]]
pipeline = "REFERENCE_LOADER"
feed = "USER_NAMES"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.reference_data.store.purge_age, "7d");
        assert_eq!(config.reference_data.effective_stream_cache.ttl, "30s");
        assert_eq!(config.feeds[0].stream_type, "Reference");
        assert_eq!(config.feeds[0].streams.len(), 2);

        let refs = config.pipeline_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].feed.uuid, "feed-1");
        assert_eq!(refs[0].pipeline.uuid, "REFERENCE_LOADER");
        assert_eq!(config.denied_feed_refs()[0].name, "SECRETS");
    }

    #[test]
    fn test_data_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refdata.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        let streams = &config.feeds[0].streams;
        assert_eq!(streams[0].data, dir.path().join("streams/1.json"));
        assert_eq!(streams[1].data, PathBuf::from("/abs/2.json"));
    }

    #[test]
    fn test_duplicate_stream_ids_rejected() {
        let content = r#"
[[feeds]]
name = "A"
streams = [{ id = 1, effective = "2008-01-01T00:00:00Z", data = "a.json" }]

[[feeds]]
name = "B"
streams = [{ id = 1, effective = "2008-01-01T00:00:00Z", data = "b.json" }]
"#;
        let err = AppConfig::from_toml_str(content).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let content = r#"
[[references]]
pipeline = "MISSING"
feed = "ALSO_MISSING"
"#;
        assert!(AppConfig::from_toml_str(content).is_err());
    }
}
