//! Outcome of a reference data lookup, with its diagnostic trail.

use std::fmt;

use refdata_core::{LookupIdentifier, MapDefinition, PipelineReference, RefStreamDefinition, Value};
use refdata_store::{StoreResult, ValueProxy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMessage {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for ResultMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// A stream examined while resolving a lookup, and the reference that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVisit {
    pub pipeline_reference: PipelineReference,
    pub stream: RefStreamDefinition,
}

/// Mutable accumulator filled by `ensure_reference_data_availability`.
///
/// Holds at most one value proxy. Every stream consulted and every
/// problem met on the way is recorded so callers can explain a miss.
#[derive(Debug)]
pub struct ReferenceDataResult {
    current_lookup: LookupIdentifier,
    value: Option<ValueProxy>,
    effective_streams: Vec<StreamVisit>,
    qualifying_streams: Vec<StreamVisit>,
    messages: Vec<ResultMessage>,
}

impl ReferenceDataResult {
    pub fn new(lookup: LookupIdentifier) -> Self {
        Self {
            current_lookup: lookup,
            value: None,
            effective_streams: Vec::new(),
            qualifying_streams: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// The hop being (or last) resolved.
    pub fn current_lookup(&self) -> &LookupIdentifier {
        &self.current_lookup
    }

    pub(crate) fn set_current_lookup(&mut self, lookup: LookupIdentifier) {
        self.current_lookup = lookup;
    }

    pub fn value_proxy(&self) -> Option<&ValueProxy> {
        self.value.as_ref()
    }

    pub fn take_value_proxy(&mut self) -> Option<ValueProxy> {
        self.value.take()
    }

    pub(crate) fn set_value_proxy(&mut self, proxy: Option<ValueProxy>) {
        self.value = proxy;
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Materialise the found value, if any.
    pub fn supply_value(&self) -> StoreResult<Option<Value>> {
        match &self.value {
            Some(proxy) => proxy.supply_value(),
            None => Ok(None),
        }
    }

    /// The map that satisfied the lookup.
    pub fn satisfied_by(&self) -> Option<&MapDefinition> {
        self.value
            .as_ref()
            .and_then(|proxy| proxy.map_definitions().next())
    }

    pub fn effective_streams(&self) -> &[StreamVisit] {
        &self.effective_streams
    }

    pub(crate) fn add_effective_stream(&mut self, pipeline_reference: &PipelineReference, stream: &RefStreamDefinition) {
        self.effective_streams.push(StreamVisit {
            pipeline_reference: pipeline_reference.clone(),
            stream: stream.clone(),
        });
    }

    /// Streams known to contain the requested map.
    pub fn qualifying_streams(&self) -> &[StreamVisit] {
        &self.qualifying_streams
    }

    pub(crate) fn add_qualifying_stream(&mut self, pipeline_reference: &PipelineReference, stream: &RefStreamDefinition) {
        self.qualifying_streams.push(StreamVisit {
            pipeline_reference: pipeline_reference.clone(),
            stream: stream.clone(),
        });
    }

    pub fn messages(&self) -> &[ResultMessage] {
        &self.messages
    }

    pub fn log(&mut self, severity: Severity, message: impl Into<String>) {
        self.messages.push(ResultMessage {
            severity,
            message: message.into(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.messages.iter().map(|m| m.severity).max()
    }

    pub fn has_errors(&self) -> bool {
        self.max_severity() == Some(Severity::Error)
    }
}
