//! Differential sync: diff-and-patch of fetched batches into a document store.

mod engine;
mod store;

pub use engine::{DifferentialSync, PreviousState, ReconcileSummary, SyncPlan};
pub use store::{BulkWriteResult, DocumentStore, WriteFailure, WriteOp};
