//! Domain module - catalog records, category rules and sync decisions
//!
//! Pure types and services. Nothing in here performs I/O; the
//! infrastructure and application layers feed data in and act on the results.

pub mod category;
pub mod delta;
pub mod dispatch;
pub mod errors;
pub mod product;
pub mod services;

// Re-export commonly used items for convenience
pub use category::{
    CategoryRef, CategoryRule, ClassificationResult, ClassifiedProduct, Confidence,
    GlobalKeywordSet, RuleSet,
};
pub use delta::{DeltaDecision, DeltaEntry, DeltaPlan, DesiredProduct, RemoteProduct, RemoteSnapshot};
pub use dispatch::{DispatchOutcome, DispatchState, Mutation, MutationKind};
pub use errors::{FailureClass, RemoteError, SyncError};
pub use product::{ExternalKey, Language, ProductRecord, ProductStatus};
