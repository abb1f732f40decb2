//! Context data: reference data attached to the event stream being
//! processed.
//!
//! A reference whose stream type is
//! [`CONTEXT_STREAM_TYPE`](refdata_core::PipelineReference::CONTEXT_STREAM_TYPE)
//! is not resolved by effective time. Its data belongs to one event
//! stream, is loaded into a process-local store on first use and is
//! released once that stream has been processed.

use refdata_core::RefStreamDefinition;
use refdata_store::RefDataLoader;

/// The event stream a lookup is made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamContext {
    pub stream_id: u64,
}

impl StreamContext {
    pub fn new(stream_id: u64) -> Self {
        Self { stream_id }
    }
}

/// Populates the context stream of one event stream.
///
/// `stream` carries the referencing pipeline and version with the event
/// stream's id. An implementation with no context data for the stream
/// returns `Ok(())` without initialising the session; the lookup then
/// misses.
pub trait ContextDataLoader: Send + Sync {
    fn load(
        &self,
        context: &StreamContext,
        stream: &RefStreamDefinition,
        loader: &mut dyn RefDataLoader,
    ) -> anyhow::Result<()>;
}

impl<F> ContextDataLoader for F
where
    F: Fn(&StreamContext, &RefStreamDefinition, &mut dyn RefDataLoader) -> anyhow::Result<()>
        + Send
        + Sync,
{
    fn load(
        &self,
        context: &StreamContext,
        stream: &RefStreamDefinition,
        loader: &mut dyn RefDataLoader,
    ) -> anyhow::Result<()> {
        self(context, stream, loader)
    }
}
