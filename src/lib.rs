//! Catalog Sync - supplier feed to storefront reconciliation
//!
//! Classifies feed products with a deterministic, priority-ordered keyword
//! rule table, then computes and applies the minimal set of create/update
//! mutations against the remote catalog under a shared rate limit.

// Module declarations
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the entry points used by the binary
pub use application::{RunMode, RunSummary, SyncPipeline};
pub use cli::Cli;
