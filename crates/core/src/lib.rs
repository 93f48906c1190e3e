//! Security Master Core - canonical security registry.
//!
//! This crate holds the differential sync engine, per-provider source
//! tracking, symbol merging and fact sync. It is database-agnostic and
//! defines the store traits implemented by the `storage-sqlite` crate.

pub mod constants;
pub mod context;
pub mod documents;
pub mod errors;
pub mod facts;
pub mod symbols;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{Clock, RunBudget, SyncConfig, SyncContext, SystemClock};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
