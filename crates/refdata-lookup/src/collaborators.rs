//! Capabilities the lookup service consumes from its host.

use std::collections::{HashMap, HashSet};

use refdata_core::{DocRef, RefStreamDefinition};
use refdata_store::RefDataLoader;

/// Populates a stream that is not loaded yet.
///
/// Implementations drive the whole session: `initialise`, the puts, and
/// `complete_processing`. Returning an error aborts the load and leaves
/// the stream unloaded.
pub trait ReferenceDataLoader: Send + Sync {
    fn load(&self, stream: &RefStreamDefinition, loader: &mut dyn RefDataLoader) -> anyhow::Result<()>;
}

impl<F> ReferenceDataLoader for F
where
    F: Fn(&RefStreamDefinition, &mut dyn RefDataLoader) -> anyhow::Result<()> + Send + Sync,
{
    fn load(&self, stream: &RefStreamDefinition, loader: &mut dyn RefDataLoader) -> anyhow::Result<()> {
        self(stream, loader)
    }
}

/// Access-control predicate over documents.
pub trait DocumentPermissions: Send + Sync {
    fn can_use(&self, doc: &DocRef) -> bool;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl DocumentPermissions for AllowAll {
    fn can_use(&self, _doc: &DocRef) -> bool {
        true
    }
}

/// Permits everything except the listed documents.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: HashSet<DocRef>,
}

impl DenyList {
    pub fn new(denied: impl IntoIterator<Item = DocRef>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
        }
    }
}

impl DocumentPermissions for DenyList {
    fn can_use(&self, doc: &DocRef) -> bool {
        !self.denied.contains(doc)
    }
}

/// Resolves the current version of a pipeline document.
pub trait PipelineVersionResolver: Send + Sync {
    fn pipeline_version(&self, pipeline: &DocRef) -> Option<String>;
}

/// Pipeline versions keyed by pipeline uuid.
#[derive(Debug, Clone, Default)]
pub struct StaticPipelineVersions {
    versions: HashMap<String, String>,
}

impl StaticPipelineVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pipeline_uuid: impl Into<String>, version: impl Into<String>) {
        self.versions.insert(pipeline_uuid.into(), version.into());
    }

    pub fn with(mut self, pipeline_uuid: impl Into<String>, version: impl Into<String>) -> Self {
        self.insert(pipeline_uuid, version);
        self
    }
}

impl PipelineVersionResolver for StaticPipelineVersions {
    fn pipeline_version(&self, pipeline: &DocRef) -> Option<String> {
        self.versions.get(&pipeline.uuid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_list_blocks_only_listed_documents() {
        let denied = DocRef::feed("f-1", "SECRET");
        let permissions = DenyList::new([denied.clone()]);
        assert!(!permissions.can_use(&denied));
        assert!(permissions.can_use(&DocRef::feed("f-2", "PUBLIC")));
        assert!(AllowAll.can_use(&denied));
    }

    #[test]
    fn static_versions_by_uuid() {
        let versions = StaticPipelineVersions::new().with("p-1", "7");
        assert_eq!(
            versions.pipeline_version(&DocRef::pipeline("p-1", "ANY_NAME")),
            Some("7".to_string())
        );
        assert_eq!(versions.pipeline_version(&DocRef::pipeline("p-2", "X")), None);
    }
}
