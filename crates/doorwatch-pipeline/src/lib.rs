//! Access-event orchestration.
//!
//! Composes the core matcher and the analytics engines into a single
//! decision flow, and defines the persistence seam the daemon plugs a
//! backend into.

pub mod pipeline;
pub mod store;

pub use pipeline::{
    AccessRequest, EventPipeline, PipelineConfig, PipelineError, PipelineOutcome,
    DEFAULT_MIN_CONFIDENCE,
};
pub use store::{
    AccessRecord, AccessStore, AnomalyRecord, AuditRecord, MemoryStore, StoreError,
};
