//! Application layer - orchestration of a sync run
//!
//! Wires the pure domain services to the remote catalog: the backend seam,
//! the chunked dispatcher and the end-to-end pipeline.

pub mod backend;
pub mod dispatcher;
pub mod sync_pipeline;

// Re-export commonly used items
pub use backend::{CatalogBackend, DryRunBackend, SnapshotPage};
pub use dispatcher::{BatchDispatcher, DispatchConfig, DispatchReport};
pub use sync_pipeline::{RunMode, RunResult, RunSummary, SyncPipeline};
