//! Document storage traits.
//!
//! This module defines the storage interface the differential sync engine
//! writes through. Implementations handle the actual persistence; the engine
//! only ever sees documents, field lookups and one bulk write per call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::documents::{Document, DocumentPatch};
use crate::errors::Result;

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document. The document must carry its `id`.
    Insert { document: Document },
    /// Patch an existing document by key.
    Update { id: String, patch: DocumentPatch },
    /// Find by key, then set the given fields, inserting the document if missing.
    Upsert { id: String, set: Document },
}

impl WriteOp {
    /// Key of the document the operation targets.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteOp::Insert { document } => crate::documents::document_id(document),
            WriteOp::Update { id, .. } | WriteOp::Upsert { id, .. } => Some(id),
        }
    }
}

/// A failed sub-operation of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the operation in the submitted batch.
    pub index: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Aggregate outcome of one unordered bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub updated: usize,
    pub upserted: usize,
    /// Operations that matched a document but changed nothing.
    pub unchanged: usize,
    pub failures: Vec<WriteFailure>,
}

impl BulkWriteResult {
    pub fn attempted(&self) -> usize {
        self.inserted + self.updated + self.upserted + self.unchanged + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Storage interface for document collections.
///
/// # Design Notes
///
/// - Every document carries a string `id` unique within its collection
/// - The store stamps `updated_at` on every effective write and never on a
///   write that leaves the document unchanged
/// - `bulk_write` is unordered: each operation is attempted independently and
///   failures are reported per operation, never as an early abort
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns documents of `collection` whose top-level `field` equals one of
    /// `values`.
    fn find_by_field(&self, collection: &str, field: &str, values: &[Value])
        -> Result<Vec<Document>>;

    /// Returns every document of `collection`, optionally only those written
    /// at or after `since`.
    fn scan(&self, collection: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Document>>;

    /// Applies all operations as one unordered batch.
    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<BulkWriteResult>;
}
