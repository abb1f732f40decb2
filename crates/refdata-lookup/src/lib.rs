//! refdata-lookup — resolve keys against time-versioned reference data.
//!
//! A [`ReferenceData`] service takes an ordered list of
//! [`PipelineReference`](refdata_core::PipelineReference)s and a
//! [`LookupIdentifier`](refdata_core::LookupIdentifier), works out which
//! stream of each referenced feed was effective at the event time, loads
//! that stream on first use, and searches it for the key. Nested map paths
//! feed each hop's text value into the next map. Context references read
//! the data attached to the event stream being processed instead.

pub mod availability;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod reference_data;
pub mod result;

pub use availability::{MapAvailability, MapNamesMemo};
pub use collaborators::{
    AllowAll, DenyList, DocumentPermissions, PipelineVersionResolver, ReferenceDataLoader,
    StaticPipelineVersions,
};
pub use context::{ContextDataLoader, StreamContext};
pub use error::{LookupError, LookupResult};
pub use reference_data::{ReferenceData, ReferenceDataBuilder};
pub use result::{ReferenceDataResult, ResultMessage, Severity, StreamVisit};
