//! The reconciliation engine: applying classes and collecting their leftovers.

pub mod apply;
pub mod gc;
pub mod reconcile;

pub use apply::{Applier, ApplyError, ApplyReport};
pub use gc::{CleanupReport, GarbageCollector};
pub use reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
