//! Domain services
//!
//! Classification passes and the delta diff. All deterministic, all
//! single-threaded.

pub mod classifier;
pub mod delta_calculator;
pub mod population_enforcer;
pub mod skip_filter;
pub mod text_normalizer;

pub use classifier::Classifier;
pub use delta_calculator::DeltaCalculator;
pub use population_enforcer::{EnforcementReport, PopulationEnforcer};
pub use skip_filter::{SkipFilter, SkipReason, SkippedProduct};
