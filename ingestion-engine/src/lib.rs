//! Normalization and reconcile pipeline: row normalization, the validating upsert
//! engine, and the chunked batch scheduler that drives both while keeping
//! memory bounded.

pub mod batch;
pub mod errors;
pub mod normalize;
pub mod reconcile;
pub mod stats;

pub use batch::{BatchScheduler, NullReporter, ProgressReporter};
pub use errors::{Result, RunError};
pub use reconcile::{Outcome, ReconcileEngine, SkipReason};
pub use stats::{BatchStats, RowErrorDetail};
