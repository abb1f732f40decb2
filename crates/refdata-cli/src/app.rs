//! Wires the store, the effective stream service and the file loader
//! together from an [`AppConfig`].

use std::sync::Arc;

use refdata_core::PipelineReference;
use refdata_effective::{EffectiveStreamService, StaticEffectiveStreams};
use refdata_lookup::{DenyList, ReferenceData, StaticPipelineVersions};
use refdata_store::{RedbRefDataStore, RefDataStore};
use tracing::info;

use crate::config::AppConfig;
use crate::data::{FileContextLoader, FileStreamLoader};

pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn RefDataStore>,
    pub reference_data: ReferenceData,
    pub references: Vec<PipelineReference>,
}

impl App {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn RefDataStore> =
            Arc::new(RedbRefDataStore::from_config(&config.reference_data.store)?);

        let streams = StaticEffectiveStreams::new();
        let mut files = Vec::new();
        for feed in &config.feeds {
            for stream in &feed.streams {
                streams.add(&feed.name, &feed.stream_type, stream.id, stream.effective_ms()?);
                files.push((stream.id, stream.data.clone()));
            }
        }
        let effective = EffectiveStreamService::from_config(
            Arc::new(streams),
            &config.reference_data.effective_stream_cache,
        )?;

        let mut versions = StaticPipelineVersions::new();
        for pipeline in &config.pipelines {
            versions.insert(pipeline.doc_ref().uuid, &pipeline.version);
        }

        let reference_data = ReferenceData::builder(
            store.clone(),
            Arc::new(effective),
            Arc::new(FileStreamLoader::new(files)),
        )
        .pipeline_versions(Arc::new(versions))
        .permissions(Arc::new(DenyList::new(config.denied_feed_refs())))
        .context_loader(Arc::new(FileContextLoader::new(
            config
                .context_streams
                .iter()
                .map(|context| (context.id, context.data.clone())),
        )))
        .build()?;

        let references = config.pipeline_references();
        info!(
            references = references.len(),
            feeds = config.feeds.len(),
            store = ?config.reference_data.store.path,
            "reference data ready"
        );
        Ok(Self {
            config,
            store,
            reference_data,
            references,
        })
    }
}
