//! SQLite storage implementation for the security master.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the store traits defined in `securitymaster-core`:
//! - Database connection pooling and the single-writer actor
//! - Diesel migrations
//! - The document store backing source collections and fact collections
//! - The merged-symbol repository with its slot index
//!
//! # Architecture
//!
//! This crate is the only place where Diesel dependencies exist. The core
//! crate is database-agnostic and works with traits.
//!
//! ```text
//!        core (sync, symbols, facts)
//!                  │
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!              SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod schema;
pub mod utils;

// Repository implementations
pub mod documents;
pub mod symbols;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};

pub use documents::DocumentRepository;
pub use symbols::MergedSymbolRepository;

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

// Re-export from securitymaster-core for convenience
pub use securitymaster_core::errors::{DatabaseError, Error, Result};
