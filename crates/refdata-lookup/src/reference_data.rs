//! The lookup service: resolves a (possibly chained) lookup across an
//! ordered list of pipeline references.
//!
//! For each hop, references are tried in declared order. A reference
//! yields a stream definition (pipeline, pipeline version, effective stream
//! id); the stream is loaded on first use through the host's
//! [`ReferenceDataLoader`] and then searched for the key, first as an exact
//! key and then, for numeric keys, as a range. The first reference that
//! produces a value wins.
//!
//! Additional read-only stores are consulted alongside the primary one,
//! even when the primary cannot load the stream. Context references
//! bypass effective time and read the data attached to the event stream
//! named by a [`StreamContext`].

use std::collections::BTreeSet;
use std::sync::Arc;

use refdata_core::time::format_instant_ms;
use refdata_core::{
    LookupIdentifier, MapDefinition, PipelineReference, RefStreamDefinition, Value, normalise_map_name,
};
use refdata_effective::EffectiveStreamService;
use refdata_store::{
    HeapRefDataStore, LoadBody, PurgeSummary, RefDataLoader, RefDataStore, RefDataStoreExt,
    StoreResult, ValueProxy,
};
use tracing::{debug, warn};

use crate::availability::{MapAvailability, MapNamesMemo};
use crate::collaborators::{AllowAll, DocumentPermissions, PipelineVersionResolver, ReferenceDataLoader};
use crate::context::{ContextDataLoader, StreamContext};
use crate::error::{LookupError, LookupResult};
use crate::result::ReferenceDataResult;

/// Reference data lookup service.
pub struct ReferenceData {
    store: Arc<dyn RefDataStore>,
    additional_stores: Vec<Arc<dyn RefDataStore>>,
    effective_streams: Arc<EffectiveStreamService>,
    loader: Arc<dyn ReferenceDataLoader>,
    permissions: Arc<dyn DocumentPermissions>,
    versions: Arc<dyn PipelineVersionResolver>,
    /// Union of the maps every store holds for a stream.
    map_names: MapNamesMemo,
    context_store: Arc<dyn RefDataStore>,
    context_loader: Option<Arc<dyn ContextDataLoader>>,
    context_map_names: MapNamesMemo,
}

/// Assembles a [`ReferenceData`].
pub struct ReferenceDataBuilder {
    store: Arc<dyn RefDataStore>,
    effective_streams: Arc<EffectiveStreamService>,
    loader: Arc<dyn ReferenceDataLoader>,
    additional_stores: Vec<Arc<dyn RefDataStore>>,
    permissions: Arc<dyn DocumentPermissions>,
    versions: Option<Arc<dyn PipelineVersionResolver>>,
    context_store: Option<Arc<dyn RefDataStore>>,
    context_loader: Option<Arc<dyn ContextDataLoader>>,
}

impl ReferenceDataBuilder {
    /// A read-only store consulted alongside the primary one. Values found
    /// in several stores are merged, primary first.
    pub fn additional_store(mut self, store: Arc<dyn RefDataStore>) -> Self {
        self.additional_stores.push(store);
        self
    }

    /// Loads context streams. Without one, context references miss.
    pub fn context_loader(mut self, loader: Arc<dyn ContextDataLoader>) -> Self {
        self.context_loader = Some(loader);
        self
    }

    /// Store for context streams. Defaults to a fresh heap store.
    pub fn context_store(mut self, store: Arc<dyn RefDataStore>) -> Self {
        self.context_store = Some(store);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn DocumentPermissions>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn pipeline_versions(mut self, versions: Arc<dyn PipelineVersionResolver>) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn build(self) -> LookupResult<ReferenceData> {
        let versions = self.versions.ok_or_else(|| {
            LookupError::Configuration("no pipeline version resolver configured".to_string())
        })?;
        Ok(ReferenceData {
            store: self.store,
            additional_stores: self.additional_stores,
            effective_streams: self.effective_streams,
            loader: self.loader,
            permissions: self.permissions,
            versions,
            map_names: MapNamesMemo::new(),
            context_store: self
                .context_store
                .unwrap_or_else(|| Arc::new(HeapRefDataStore::new())),
            context_loader: self.context_loader,
            context_map_names: MapNamesMemo::new(),
        })
    }
}

impl ReferenceData {
    pub fn builder(
        store: Arc<dyn RefDataStore>,
        effective_streams: Arc<EffectiveStreamService>,
        loader: Arc<dyn ReferenceDataLoader>,
    ) -> ReferenceDataBuilder {
        ReferenceDataBuilder {
            store,
            effective_streams,
            loader,
            additional_stores: Vec::new(),
            permissions: Arc::new(AllowAll),
            versions: None,
            context_store: None,
            context_loader: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn RefDataStore> {
        &self.store
    }

    pub fn effective_streams(&self) -> &EffectiveStreamService {
        &self.effective_streams
    }

    pub fn context_store(&self) -> &Arc<dyn RefDataStore> {
        &self.context_store
    }

    /// Resolve `lookup` against `pipeline_refs`, recording the value proxy
    /// (if any) and the diagnostic trail in `result`.
    ///
    /// A miss is not an error: `result` simply ends up without a value.
    /// Context references miss here; see
    /// [`ensure_reference_data_availability_in`](Self::ensure_reference_data_availability_in).
    pub fn ensure_reference_data_availability(
        &self,
        pipeline_refs: &[PipelineReference],
        lookup: &LookupIdentifier,
        result: &mut ReferenceDataResult,
    ) {
        self.resolve(pipeline_refs, lookup, None, result);
    }

    /// As [`ensure_reference_data_availability`](Self::ensure_reference_data_availability),
    /// with context references reading the context stream of `context`.
    pub fn ensure_reference_data_availability_in(
        &self,
        pipeline_refs: &[PipelineReference],
        lookup: &LookupIdentifier,
        context: &StreamContext,
        result: &mut ReferenceDataResult,
    ) {
        self.resolve(pipeline_refs, lookup, Some(context), result);
    }

    fn resolve(
        &self,
        pipeline_refs: &[PipelineReference],
        lookup: &LookupIdentifier,
        context: Option<&StreamContext>,
        result: &mut ReferenceDataResult,
    ) {
        result.set_value_proxy(None);
        let mut current = lookup.clone();
        loop {
            result.set_current_lookup(current.clone());
            let Some(proxy) = self.resolve_hop(pipeline_refs, &current, context, result) else {
                debug!(lookup = %current, "no reference data found");
                result.info(format!("No value found for {current}"));
                return;
            };

            if !current.is_map_nested() {
                result.set_value_proxy(Some(proxy));
                return;
            }

            let next_key = match proxy.supply_value() {
                Ok(Some(Value::Text(text))) => text,
                Ok(Some(other)) => {
                    result.error(format!(
                        "Value for {current} is {} and cannot key map '{}'",
                        other.value_type(),
                        current.secondary_map_name().unwrap_or_default()
                    ));
                    return;
                }
                Ok(None) => {
                    result.warn(format!("Value for {current} disappeared before the next hop"));
                    return;
                }
                Err(e) => {
                    result.error(format!("Failed to read value for {current}: {e}"));
                    return;
                }
            };
            match current.nested(next_key) {
                Some(next) => current = next,
                None => return,
            }
        }
    }

    /// Parse and resolve a lookup in one call.
    pub fn lookup(
        &self,
        pipeline_refs: &[PipelineReference],
        map_path: &str,
        key: &str,
        event_time_ms: i64,
    ) -> LookupResult<ReferenceDataResult> {
        let lookup = LookupIdentifier::parse(map_path, key, event_time_ms)?;
        let mut result = ReferenceDataResult::new(lookup.clone());
        self.ensure_reference_data_availability(pipeline_refs, &lookup, &mut result);
        Ok(result)
    }

    /// [`lookup`](Self::lookup) on behalf of the event stream in `context`.
    pub fn lookup_in_context(
        &self,
        pipeline_refs: &[PipelineReference],
        map_path: &str,
        key: &str,
        event_time_ms: i64,
        context: &StreamContext,
    ) -> LookupResult<ReferenceDataResult> {
        let lookup = LookupIdentifier::parse(map_path, key, event_time_ms)?;
        let mut result = ReferenceDataResult::new(lookup.clone());
        self.ensure_reference_data_availability_in(pipeline_refs, &lookup, context, &mut result);
        Ok(result)
    }

    /// Resolve and materialise the value.
    pub fn get_value(
        &self,
        pipeline_refs: &[PipelineReference],
        lookup: &LookupIdentifier,
    ) -> LookupResult<Option<Value>> {
        let mut result = ReferenceDataResult::new(lookup.clone());
        self.ensure_reference_data_availability(pipeline_refs, lookup, &mut result);
        Ok(result.supply_value()?)
    }

    /// Forget memoised map names, e.g. after a purge.
    pub fn clear_map_names(&self) {
        self.map_names.clear();
    }

    /// Drop the context data loaded for `context` once its event stream
    /// has been processed.
    pub fn release_context(&self, context: &StreamContext) -> StoreResult<PurgeSummary> {
        self.context_map_names.forget_stream_id(context.stream_id);
        self.context_store.purge_stream(context.stream_id)
    }

    /// One hop: try each reference in order, first match wins.
    fn resolve_hop(
        &self,
        pipeline_refs: &[PipelineReference],
        lookup: &LookupIdentifier,
        context: Option<&StreamContext>,
        result: &mut ReferenceDataResult,
    ) -> Option<ValueProxy> {
        for pipeline_ref in pipeline_refs {
            let found = if pipeline_ref.is_context() {
                self.resolve_context_reference(pipeline_ref, lookup, context, result)
            } else {
                self.resolve_reference(pipeline_ref, lookup, result)
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn resolve_reference(
        &self,
        pipeline_ref: &PipelineReference,
        lookup: &LookupIdentifier,
        result: &mut ReferenceDataResult,
    ) -> Option<ValueProxy> {
        let map_name = lookup.primary_map_name();
        let (stream, effective_time_ms) = self.effective_stream_for(pipeline_ref, lookup, result)?;
        result.add_effective_stream(pipeline_ref, &stream);

        if self.map_names.availability(&stream, map_name) == MapAvailability::Absent {
            debug!(%stream, map_name, "map known to be absent from stream");
            return None;
        }
        let loader = &self.loader;
        let loaded = load_stream(
            &self.store,
            &stream,
            effective_time_ms,
            &mut |session: &mut dyn RefDataLoader| loader.load(&stream, session),
            result,
        );
        match self.map_availability(&stream, map_name, loaded, result) {
            MapAvailability::Absent => {
                result.info(format!("Map '{map_name}' is not in {stream}"));
                return None;
            }
            // No store holds the stream.
            MapAvailability::Unknown if !loaded => return None,
            _ => {}
        }
        result.add_qualifying_stream(pipeline_ref, &stream);

        let map = MapDefinition::new(stream, map_name);
        let found = self.find(&map, lookup);
        report_find(&map, lookup, found, result)
    }

    /// Context references name no feed stream: the stream id is the event
    /// stream's own and the data lives in the context store.
    fn resolve_context_reference(
        &self,
        pipeline_ref: &PipelineReference,
        lookup: &LookupIdentifier,
        context: Option<&StreamContext>,
        result: &mut ReferenceDataResult,
    ) -> Option<ValueProxy> {
        if !self.check_reference(pipeline_ref, result) {
            return None;
        }
        let Some(context) = context else {
            result.info(format!("No stream context for context reference ({pipeline_ref})"));
            return None;
        };
        let Some(context_loader) = &self.context_loader else {
            result.warn(format!("No context data loader for context reference ({pipeline_ref})"));
            return None;
        };
        let version = self.pipeline_version(pipeline_ref, result)?;
        let stream = RefStreamDefinition::new(pipeline_ref.pipeline.clone(), version, context.stream_id);
        result.add_effective_stream(pipeline_ref, &stream);

        let map_name = lookup.primary_map_name();
        if self.context_map_names.availability(&stream, map_name) == MapAvailability::Absent {
            debug!(%stream, map_name, "map known to be absent from context stream");
            return None;
        }
        let loaded = load_stream(
            &self.context_store,
            &stream,
            lookup.event_time_ms(),
            &mut |session: &mut dyn RefDataLoader| context_loader.load(context, &stream, session),
            result,
        );
        if !loaded {
            return None;
        }
        if !self.context_map_names.is_known(&stream) {
            match self.context_store.map_names(&stream) {
                Ok(names) => self.context_map_names.remember(&stream, names),
                Err(e) => result.warn(format!("Could not list maps of {stream}: {e}")),
            }
        }
        if self.context_map_names.availability(&stream, map_name) == MapAvailability::Absent {
            result.info(format!("Map '{map_name}' is not in context {stream}"));
            return None;
        }
        result.add_qualifying_stream(pipeline_ref, &stream);

        let map = MapDefinition::new(stream, map_name);
        let found = find_in(&self.context_store, &map, lookup);
        report_find(&map, lookup, found, result)
    }

    /// Validation and permission checks shared by every reference kind.
    fn check_reference(&self, pipeline_ref: &PipelineReference, result: &mut ReferenceDataResult) -> bool {
        if let Err(reason) = pipeline_ref.validate() {
            warn!(%pipeline_ref, %reason, "skipping invalid pipeline reference");
            result.error(format!("Invalid pipeline reference: {reason}"));
            return false;
        }
        if !self.permissions.can_use(&pipeline_ref.pipeline) {
            result.warn(format!(
                "No permission to use pipeline '{}'",
                pipeline_ref.pipeline.name
            ));
            return false;
        }
        if !self.permissions.can_use(&pipeline_ref.feed) {
            result.warn(format!("No permission to use feed '{}'", pipeline_ref.feed.name));
            return false;
        }
        true
    }

    fn pipeline_version(
        &self,
        pipeline_ref: &PipelineReference,
        result: &mut ReferenceDataResult,
    ) -> Option<String> {
        let version = self.versions.pipeline_version(&pipeline_ref.pipeline);
        if version.is_none() {
            warn!(pipeline = %pipeline_ref.pipeline, "pipeline has no resolvable version");
            result.error(format!(
                "Pipeline '{}' has no resolvable version",
                pipeline_ref.pipeline.name
            ));
        }
        version
    }

    /// Validate the reference and pick its stream effective at the event
    /// time, along with that stream's effective time.
    fn effective_stream_for(
        &self,
        pipeline_ref: &PipelineReference,
        lookup: &LookupIdentifier,
        result: &mut ReferenceDataResult,
    ) -> Option<(RefStreamDefinition, i64)> {
        if !self.check_reference(pipeline_ref, result) {
            return None;
        }

        let meta = match self.effective_streams.determine_effective_stream(
            &pipeline_ref.feed.name,
            &pipeline_ref.stream_type,
            lookup.event_time_ms(),
        ) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                result.info(format!(
                    "No effective '{}' stream in feed '{}' for {}",
                    pipeline_ref.stream_type,
                    pipeline_ref.feed.name,
                    format_instant_ms(lookup.event_time_ms())
                ));
                return None;
            }
            Err(e) => {
                result.error(e.to_string());
                return None;
            }
        };

        let version = self.pipeline_version(pipeline_ref, result)?;
        let stream = RefStreamDefinition::new(pipeline_ref.pipeline.clone(), version, meta.id);
        debug!(%stream, effective = %meta, "effective stream");
        Some((stream, meta.effective_ms))
    }

    /// Whether `map_name` is in `stream` in any store. The primary store is
    /// only asked when it holds the stream. Only a complete listing that
    /// includes the primary is remembered.
    fn map_availability(
        &self,
        stream: &RefStreamDefinition,
        map_name: &str,
        primary_loaded: bool,
        result: &mut ReferenceDataResult,
    ) -> MapAvailability {
        if self.map_names.is_known(stream) {
            return self.map_names.availability(stream, map_name);
        }
        let primary = primary_loaded.then_some(&self.store);
        let mut names = BTreeSet::new();
        let mut listed_all = true;
        for store in primary.into_iter().chain(&self.additional_stores) {
            match store.map_names(stream) {
                Ok(found) => names.extend(found),
                Err(e) => {
                    result.warn(format!("Could not list maps of {stream}: {e}"));
                    listed_all = false;
                }
            }
        }

        let present = names.contains(&normalise_map_name(map_name));
        let complete_listing = listed_all && !names.is_empty();
        if primary_loaded && complete_listing {
            self.map_names.remember(stream, names);
        }
        if present {
            MapAvailability::Present
        } else if complete_listing {
            MapAvailability::Absent
        } else {
            MapAvailability::Unknown
        }
    }

    /// Exact key first, then range for numeric keys; additional stores are
    /// merged behind the primary.
    fn find(&self, map: &MapDefinition, lookup: &LookupIdentifier) -> StoreResult<Option<ValueProxy>> {
        let mut found = find_in(&self.store, map, lookup)?;
        for store in &self.additional_stores {
            if let Some(extra) = find_in(store, map, lookup)? {
                found = Some(match found {
                    Some(proxy) => proxy.merge(extra),
                    None => extra,
                });
            }
        }
        Ok(found)
    }
}

/// Load the stream into `store` unless it is already complete. Returns
/// false when the stream is not available afterwards.
fn load_stream(
    store: &Arc<dyn RefDataStore>,
    stream: &RefStreamDefinition,
    effective_time_ms: i64,
    body: &mut LoadBody<'_>,
    result: &mut ReferenceDataResult,
) -> bool {
    match store.with_loader_unless_complete(stream, effective_time_ms, body) {
        Ok(outcome) if outcome.is_available() => true,
        Ok(_) => {
            result.warn(format!("Load of {stream} did not complete"));
            false
        }
        Err(e) => {
            result.error(format!("Failed to load {stream}: {e}"));
            false
        }
    }
}

fn report_find(
    map: &MapDefinition,
    lookup: &LookupIdentifier,
    found: StoreResult<Option<ValueProxy>>,
    result: &mut ReferenceDataResult,
) -> Option<ValueProxy> {
    match found {
        Ok(Some(proxy)) => {
            debug!(%map, key = lookup.key(), "reference data found");
            result.info(format!("Found key '{}' in {map}", lookup.key()));
            Some(proxy)
        }
        Ok(None) => {
            result.info(format!("Key '{}' not found in {map}", lookup.key()));
            None
        }
        Err(e) => {
            warn!(%map, error = %e, "reference data lookup failed");
            result.error(format!("Lookup of key '{}' in {map} failed: {e}", lookup.key()));
            None
        }
    }
}

fn find_in(
    store: &Arc<dyn RefDataStore>,
    map: &MapDefinition,
    lookup: &LookupIdentifier,
) -> StoreResult<Option<ValueProxy>> {
    if let Some(proxy) = store.lookup(map, lookup.key())? {
        return Ok(Some(proxy));
    }
    match lookup.key_as_u64() {
        Some(key) => store.lookup_range(map, key),
        None => Ok(None),
    }
}
