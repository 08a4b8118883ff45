//! Report-gap reconciliation for csrledger.
//!
//! This crate ties the ledger, the tracker, the archive and the strategy
//! chain together:
//! - [`gap`]: which years of an entity still need a lookup
//! - [`reconcile`]: per-entity lookup and year-map merge
//! - [`batch`]: batch selection, population and refresh passes
//! - [`pipeline`]: bootstrap and the full run

pub mod batch;
pub mod gap;
pub mod pipeline;
pub mod reconcile;

#[cfg(test)]
mod testing;

pub use batch::{BatchCoordinator, PassSummary, RefreshSummary, prune_tracker, select_batch};
pub use gap::{GapAnalyzer, Gaps, missing_years};
pub use pipeline::{ProgressReporter, RunSummary, Runtime, SilentProgress, bootstrap};
pub use reconcile::{Reconciliation, ReconciliationEngine};
