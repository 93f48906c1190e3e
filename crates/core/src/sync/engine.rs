//! Differential sync engine.
//!
//! Turns a freshly fetched batch of documents into the minimal set of writes
//! against a collection:
//!
//! ```text
//! new batch ──► identity index ──► match previous ──► diff ──► WriteOp batch
//!                                   (given or fetched)           (one bulk write)
//! ```
//!
//! Unchanged documents produce no operation at all, so reconciling the same
//! upstream data twice issues zero writes the second time.

use log::{debug, error, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::store::{BulkWriteResult, DocumentStore, WriteFailure, WriteOp};
use crate::constants::{DOCUMENT_ID_FIELD, SELF_FETCH_SCAN_THRESHOLD};
use crate::documents::{
    derive_document_id, diff_documents, document_id, identity_of, to_document, Document,
    IdentityKey, KeyedDocuments,
};
use crate::errors::{Error, Result};

/// Where the previous state of a collection comes from.
#[derive(Debug, Clone)]
pub enum PreviousState {
    /// The caller already holds the previous documents.
    Provided(Vec<Document>),
    /// The engine fetches them itself.
    Fetch,
}

/// Planned writes for one reconcile call.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub collection: String,
    pub ops: Vec<WriteOp>,
    /// Matched documents whose diff was empty.
    pub unchanged: usize,
    /// New documents dropped because their identity was incomplete.
    pub skipped: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drops every planned operation for which `keep` returns false.
    /// Dropped operations are counted as unchanged.
    pub fn retain_ops<F>(&mut self, mut keep: F)
    where
        F: FnMut(&WriteOp) -> bool,
    {
        let before = self.ops.len();
        self.ops.retain(|op| keep(op));
        self.unchanged += before - self.ops.len();
    }
}

/// Outcome of applying a [`SyncPlan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub collection: String,
    pub planned: usize,
    pub inserted: usize,
    pub updated: usize,
    pub upserted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failures: Vec<WriteFailure>,
}

impl ReconcileSummary {
    fn from_parts(plan_collection: String, planned: usize, unchanged: usize, skipped: usize) -> Self {
        Self {
            collection: plan_collection,
            planned,
            unchanged,
            skipped,
            ..Default::default()
        }
    }

    fn absorb(&mut self, result: BulkWriteResult) {
        self.inserted += result.inserted;
        self.updated += result.updated;
        self.upserted += result.upserted;
        self.unchanged += result.unchanged;
        self.failures.extend(result.failures);
    }

    /// Number of documents actually written.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.upserted
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts recorded sub-operation failures into an error.
    pub fn into_result(self) -> Result<Self> {
        match self.failures.first() {
            None => Ok(self),
            Some(first) => Err(Error::BulkWrite {
                collection: self.collection.clone(),
                failed: self.failures.len(),
                attempted: self.planned,
                first_error: first.message.clone(),
            }),
        }
    }
}

/// Generic diff-and-patch synchronization over a [`DocumentStore`].
#[derive(Clone)]
pub struct DifferentialSync {
    store: Arc<dyn DocumentStore>,
    scan_threshold: usize,
}

impl DifferentialSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            scan_threshold: SELF_FETCH_SCAN_THRESHOLD,
        }
    }

    /// Overrides the batch size above which self-fetch scans the collection.
    pub fn with_scan_threshold(mut self, scan_threshold: usize) -> Self {
        self.scan_threshold = scan_threshold;
        self
    }

    /// Reconciles typed records into `collection`.
    pub async fn reconcile_records<T: Serialize>(
        &self,
        collection: &str,
        records: &[T],
        previous: PreviousState,
        key_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        let documents = records.iter().map(to_document).collect::<Result<Vec<_>>>()?;
        self.reconcile(collection, documents, previous, key_fields)
            .await
    }

    /// Plans and applies the writes turning the stored state into `new_documents`.
    pub async fn reconcile(
        &self,
        collection: &str,
        new_documents: Vec<Document>,
        previous: PreviousState,
        key_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        let plan = self.plan(collection, new_documents, previous, key_fields)?;
        self.apply(plan).await
    }

    /// Computes the write plan without touching the store for writes.
    pub fn plan(
        &self,
        collection: &str,
        new_documents: Vec<Document>,
        previous: PreviousState,
        key_fields: &[&str],
    ) -> Result<SyncPlan> {
        if key_fields.is_empty() {
            return Err(Error::Config(
                "differential sync needs at least one identity field".to_string(),
            ));
        }

        let mut plan = SyncPlan {
            collection: collection.to_string(),
            ..Default::default()
        };

        let keyed = dedupe_by_identity(collection, new_documents, key_fields, &mut plan.skipped);
        if keyed.is_empty() {
            return Ok(plan);
        }

        let previous = match previous {
            PreviousState::Provided(documents) => documents,
            PreviousState::Fetch => self.fetch_previous(collection, &keyed, key_fields)?,
        };

        if previous.is_empty() {
            debug!(
                "{}: no previous state, planning {} blind inserts",
                collection,
                keyed.len()
            );
            for (_, document) in keyed {
                if let Some(op) = insert_op(collection, document, key_fields) {
                    plan.ops.push(op);
                } else {
                    plan.skipped += 1;
                }
            }
            return Ok(plan);
        }

        let previous = KeyedDocuments::index(previous, key_fields);
        for (key, mut document) in keyed {
            match previous.get(&key) {
                Some(existing) => {
                    let Some(existing_id) = document_id(existing) else {
                        error!(
                            "{}: stored document for key {} has no id, skipping",
                            collection, key
                        );
                        plan.skipped += 1;
                        continue;
                    };
                    let existing_id = existing_id.to_string();
                    document.insert(
                        DOCUMENT_ID_FIELD.to_string(),
                        Value::String(existing_id.clone()),
                    );
                    let patch = diff_documents(existing, &document);
                    if patch.is_empty() {
                        plan.unchanged += 1;
                    } else {
                        plan.ops.push(WriteOp::Update {
                            id: existing_id,
                            patch,
                        });
                    }
                }
                None => match insert_op(collection, document, key_fields) {
                    Some(op) => plan.ops.push(op),
                    None => plan.skipped += 1,
                },
            }
        }

        Ok(plan)
    }

    /// Submits a plan as one unordered bulk write.
    ///
    /// A plan without operations is a success and never reaches the store.
    pub async fn apply(&self, plan: SyncPlan) -> Result<ReconcileSummary> {
        let mut summary =
            ReconcileSummary::from_parts(plan.collection.clone(), plan.ops.len(), plan.unchanged, plan.skipped);
        if plan.ops.is_empty() {
            debug!("{}: nothing to write", plan.collection);
            return Ok(summary);
        }

        let result = self.store.bulk_write(&plan.collection, plan.ops).await?;
        if !result.is_success() {
            warn!(
                "{}: {} of {} operations failed, first: {}",
                plan.collection,
                result.failures.len(),
                summary.planned,
                result.failures[0].message
            );
        }
        summary.absorb(result);
        debug!(
            "{}: inserted={} updated={} unchanged={} skipped={}",
            summary.collection, summary.inserted, summary.updated, summary.unchanged, summary.skipped
        );
        Ok(summary)
    }

    /// Upsert-only variant for immutable fact data.
    ///
    /// Skips fetch-and-diff entirely: every document becomes a find-by-key
    /// upsert keyed by its natural composite key.
    pub async fn upsert_all(
        &self,
        collection: &str,
        new_documents: Vec<Document>,
        key_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        let mut skipped = 0;
        let keyed = dedupe_by_identity(collection, new_documents, key_fields, &mut skipped);

        let mut ops = Vec::with_capacity(keyed.len());
        for (_, mut document) in keyed {
            let id = match document_id(&document) {
                Some(id) => id.to_string(),
                None => match derive_document_id(&document, key_fields) {
                    Some(id) => id,
                    None => {
                        skipped += 1;
                        continue;
                    }
                },
            };
            document.insert(DOCUMENT_ID_FIELD.to_string(), Value::String(id.clone()));
            ops.push(WriteOp::Upsert { id, set: document });
        }

        self.apply(SyncPlan {
            collection: collection.to_string(),
            ops,
            unchanged: 0,
            skipped,
        })
        .await
    }

    /// Loads the stored counterparts of `keyed`. Small batches look up the
    /// first key field only; documents that share it but differ on a later
    /// field are filtered out by identity.
    fn fetch_previous(
        &self,
        collection: &str,
        keyed: &[(IdentityKey, Document)],
        key_fields: &[&str],
    ) -> Result<Vec<Document>> {
        if keyed.len() > self.scan_threshold {
            debug!(
                "{}: scanning collection for {} new documents",
                collection,
                keyed.len()
            );
            return self.store.scan(collection, None);
        }

        let field = key_fields[0];
        let values: Vec<Value> = keyed
            .iter()
            .filter_map(|(_, document)| document.get(field).cloned())
            .collect();
        let found = self.store.find_by_field(collection, field, &values)?;
        if key_fields.len() == 1 {
            return Ok(found);
        }
        let wanted: HashSet<&IdentityKey> = keyed.iter().map(|(key, _)| key).collect();
        Ok(found
            .into_iter()
            .filter(|document| {
                identity_of(document, key_fields).is_some_and(|key| wanted.contains(&key))
            })
            .collect())
    }
}

/// Indexes new documents by identity, preserving first-seen order.
/// Later duplicates replace earlier ones; incomplete identities are skipped.
fn dedupe_by_identity(
    collection: &str,
    documents: Vec<Document>,
    key_fields: &[&str],
    skipped: &mut usize,
) -> Vec<(IdentityKey, Document)> {
    let mut out: Vec<(IdentityKey, Document)> = Vec::with_capacity(documents.len());
    let mut positions: HashMap<IdentityKey, usize> = HashMap::with_capacity(documents.len());

    for document in documents {
        let Some(key) = identity_of(&document, key_fields) else {
            error!(
                "{}: dropping document without identity fields {:?}",
                collection, key_fields
            );
            *skipped += 1;
            continue;
        };
        match positions.get(&key) {
            Some(&pos) => {
                warn!("{}: duplicate identity {} in batch, keeping last", collection, key);
                out[pos].1 = document;
                *skipped += 1;
            }
            None => {
                positions.insert(key.clone(), out.len());
                out.push((key, document));
            }
        }
    }
    out
}

fn insert_op(collection: &str, mut document: Document, key_fields: &[&str]) -> Option<WriteOp> {
    if document_id(&document).is_none() {
        let Some(id) = derive_document_id(&document, key_fields) else {
            error!("{}: cannot derive an id for new document", collection);
            return None;
        };
        document.insert(DOCUMENT_ID_FIELD.to_string(), Value::String(id));
    }
    Some(WriteOp::Insert { document })
}
