//! Per-provider snapshot tracking.
//!
//! Reconciles a fresh provider snapshot into that provider's collection:
//! matched records are patched in place, new ones inserted, and records
//! missing from the snapshot are disabled, never deleted.

use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::match_cascade::{match_records, MatchKey};
use super::source_store::SourceSymbolStore;
use super::symbols_model::SourceRecord;
use crate::constants::{DOCUMENT_ID_FIELD, ENABLED_FIELD};
use crate::context::SyncContext;
use crate::documents::{to_document, Document, DocumentPatch};
use crate::errors::Result;
use crate::sync::{DifferentialSync, DocumentStore, PreviousState, WriteOp};

/// Outcome of one tracker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub provider: String,
    /// Records in the fresh snapshot.
    pub fresh: usize,
    /// Invalid or duplicate records dropped before matching.
    pub dropped: usize,
    pub matched_by_key: BTreeMap<MatchKey, usize>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub disabled: usize,
    pub failed: usize,
}

impl TrackerSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn matched(&self) -> usize {
        self.matched_by_key.values().sum()
    }
}

/// Keeps one provider's collection in step with its latest snapshot.
pub struct SourceSymbolTracker {
    ctx: SyncContext,
    source: SourceSymbolStore,
    sync: DifferentialSync,
}

impl SourceSymbolTracker {
    pub fn new(ctx: SyncContext, store: Arc<dyn DocumentStore>, provider: &str) -> Self {
        let sync = DifferentialSync::new(store.clone()).with_scan_threshold(ctx.config.scan_threshold);
        Self {
            source: SourceSymbolStore::new(store, provider),
            ctx,
            sync,
        }
    }

    pub fn provider(&self) -> &str {
        self.source.provider()
    }

    /// Reconciles `fresh` into the provider collection.
    pub async fn reconcile(&self, fresh: Vec<SourceRecord>) -> Result<TrackerSummary> {
        let provider = self.source.provider().to_string();
        let collection = self.source.collection().to_string();
        let mut summary = TrackerSummary {
            provider: provider.clone(),
            fresh: fresh.len(),
            ..Default::default()
        };

        if fresh.is_empty() {
            warn!(
                "{}: empty snapshot, treating provider as offline and writing nothing",
                provider
            );
            return Ok(summary);
        }

        let mut fresh = self.prepare(fresh, &mut summary.dropped);
        let previous = self.source.load_all()?;
        let previous_records: Vec<SourceRecord> =
            previous.iter().map(|(r, _)| r.clone()).collect();

        let matches = match_records(&self.ctx.config.match_cascade, &fresh, &previous_records);
        let mut matched_previous = vec![false; previous_records.len()];
        let mut assigned: Vec<Option<String>> = vec![None; fresh.len()];
        for m in &matches {
            matched_previous[m.previous] = true;
            assigned[m.fresh] = Some(previous_records[m.previous].id.clone());
            *summary.matched_by_key.entry(m.key).or_default() += 1;
        }

        let mut taken: HashSet<String> = previous_records.iter().map(|r| r.id.clone()).collect();
        for (record, id) in fresh.iter_mut().zip(assigned) {
            record.id = match id {
                Some(id) => id,
                None => {
                    let id = unique_id(&record.local_id, &taken);
                    if id != record.local_id {
                        debug!(
                            "{}: id '{}' already held, storing new record as '{}'",
                            provider, record.local_id, id
                        );
                    }
                    taken.insert(id.clone());
                    id
                }
            };
        }

        let documents = fresh.iter().map(to_document).collect::<Result<Vec<Document>>>()?;
        let previous_documents: Vec<Document> = previous.iter().map(|(_, d)| d.clone()).collect();
        let mut plan = self.sync.plan(
            &collection,
            documents,
            PreviousState::Provided(previous_documents),
            &[DOCUMENT_ID_FIELD],
        )?;

        if self.ctx.config.skip_enabled_only_writes {
            plan.retain_ops(|op| match op {
                WriteOp::Update { patch, .. } => !patch.touches_only(&[ENABLED_FIELD]),
                _ => true,
            });
        }

        let first_disable = plan.ops.len();
        for (record, matched) in previous_records.iter().zip(&matched_previous) {
            if !matched && record.is_enabled() {
                plan.ops.push(WriteOp::Update {
                    id: record.id.clone(),
                    patch: DocumentPatch::set_field(ENABLED_FIELD, Value::Bool(false)),
                });
            }
        }
        let planned_disables = plan.ops.len() - first_disable;

        let reconciled = self.sync.apply(plan).await?;
        let failed_disables = reconciled
            .failures
            .iter()
            .filter(|f| f.index >= first_disable)
            .count();
        for failure in &reconciled.failures {
            error!(
                "{}: write of '{}' failed: {}",
                provider,
                failure.id.as_deref().unwrap_or("?"),
                failure.message
            );
        }

        summary.disabled = planned_disables - failed_disables;
        summary.inserted = reconciled.inserted;
        summary.updated = reconciled.updated.saturating_sub(summary.disabled);
        summary.unchanged = reconciled.unchanged;
        summary.failed = reconciled.failures.len();

        info!(
            "{}: {} fresh, {} matched, {} inserted, {} updated, {} disabled, {} unchanged, {} dropped, {} failed",
            provider,
            summary.fresh,
            summary.matched(),
            summary.inserted,
            summary.updated,
            summary.disabled,
            summary.unchanged,
            summary.dropped,
            summary.failed
        );
        Ok(summary)
    }

    /// Drops invalid records and keeps the last occurrence of each local id.
    fn prepare(&self, fresh: Vec<SourceRecord>, dropped: &mut usize) -> Vec<SourceRecord> {
        let provider = self.source.provider();
        let mut out: Vec<SourceRecord> = Vec::with_capacity(fresh.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(fresh.len());

        for mut record in fresh {
            if let Err(e) = record.validate() {
                error!("{}: dropping record '{}': {}", provider, record.local_id, e);
                *dropped += 1;
                continue;
            }
            // Keys are assigned by the tracker, never taken from the fetch.
            record.id.clear();
            match positions.get(&record.local_id) {
                Some(&pos) => {
                    warn!(
                        "{}: duplicate local id '{}' in snapshot, keeping last",
                        provider, record.local_id
                    );
                    out[pos] = record;
                    *dropped += 1;
                }
                None => {
                    positions.insert(record.local_id.clone(), out.len());
                    out.push(record);
                }
            }
        }
        out
    }
}

/// `base` if free, otherwise `base~2`, `base~3`, ...
fn unique_id(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}~{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
