//! File-backed stream data and the loader that feeds it to the store.
//!
//! ```json
//! {"maps": {"USER_TO_NAME": {"entries": {"user1": "Jane", "user2": null},
//!                           "ranges": [{"from": 2, "to": 30, "value": {"binary": "cafe"}}]}}}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use refdata_core::{KeyRange, MapDefinition, RefStreamDefinition, Value};
use refdata_lookup::{ContextDataLoader, ReferenceDataLoader, StreamContext};
use refdata_store::RefDataLoader;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct StreamData {
    #[serde(default)]
    pub maps: BTreeMap<String, MapData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MapData {
    #[serde(default)]
    pub entries: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ranges: Vec<RangeData>,
}

#[derive(Debug, Deserialize)]
pub struct RangeData {
    pub from: i64,
    pub to: i64,
    pub value: serde_json::Value,
}

impl StreamData {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading stream data {}", path.display()))?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("parsing stream data {}", path.display()))?;
        Ok(data)
    }

    /// Stage every entry of every map on `loader`. The session must
    /// already be initialised.
    pub fn put_all(&self, stream: &RefStreamDefinition, loader: &mut dyn RefDataLoader) -> anyhow::Result<()> {
        for (name, map) in &self.maps {
            let definition = MapDefinition::new(stream.clone(), name);
            for (key, value) in &map.entries {
                let value = to_value(value).with_context(|| format!("map {name}, key '{key}'"))?;
                loader.put(&definition, key, value)?;
            }
            for range in &map.ranges {
                let value = to_value(&range.value)
                    .with_context(|| format!("map {name}, range [{}, {})", range.from, range.to))?;
                loader.put_range(&definition, KeyRange::new(range.from, range.to), value)?;
            }
        }
        Ok(())
    }
}

/// JSON strings are text, `null` is null and `{"binary": "<hex>"}` is
/// binary. Numbers and booleans are taken as their text.
pub fn to_value(json: &serde_json::Value) -> anyhow::Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::String(s) => Ok(Value::text(s.clone())),
        serde_json::Value::Number(n) => Ok(Value::text(n.to_string())),
        serde_json::Value::Bool(b) => Ok(Value::text(b.to_string())),
        serde_json::Value::Object(obj) => match obj.get("binary") {
            Some(serde_json::Value::String(encoded)) if obj.len() == 1 => {
                let bytes = hex::decode(encoded).context("invalid hex in binary value")?;
                Ok(Value::Binary(bytes))
            }
            _ => bail!("objects must have the form {{\"binary\": \"<hex>\"}}"),
        },
        serde_json::Value::Array(_) => bail!("arrays are not reference data values"),
    }
}

/// Loads streams from the data files named in the config, by stream id.
#[derive(Debug, Clone, Default)]
pub struct FileStreamLoader {
    files: HashMap<u64, PathBuf>,
}

impl FileStreamLoader {
    pub fn new(files: impl IntoIterator<Item = (u64, PathBuf)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl ReferenceDataLoader for FileStreamLoader {
    fn load(&self, stream: &RefStreamDefinition, loader: &mut dyn RefDataLoader) -> anyhow::Result<()> {
        let Some(path) = self.files.get(&stream.stream_id) else {
            bail!("no data file configured for stream {}", stream.stream_id);
        };
        debug!(%stream, path = %path.display(), "loading stream data");
        let data = StreamData::from_file(path)?;
        loader.initialise(false)?;
        data.put_all(stream, loader)?;
        loader.complete_processing()?;
        Ok(())
    }
}

/// Loads context data by event stream id. Streams without a file have no
/// context data.
#[derive(Debug, Clone, Default)]
pub struct FileContextLoader {
    files: HashMap<u64, PathBuf>,
}

impl FileContextLoader {
    pub fn new(files: impl IntoIterator<Item = (u64, PathBuf)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl ContextDataLoader for FileContextLoader {
    fn load(
        &self,
        context: &StreamContext,
        stream: &RefStreamDefinition,
        loader: &mut dyn RefDataLoader,
    ) -> anyhow::Result<()> {
        let Some(path) = self.files.get(&context.stream_id) else {
            debug!(%stream, "no context data for event stream");
            return Ok(());
        };
        let data = StreamData::from_file(path)?;
        loader.initialise(false)?;
        data.put_all(stream, loader)?;
        loader.complete_processing()?;
        Ok(())
    }
}
