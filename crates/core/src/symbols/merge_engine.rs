//! Merged-symbol maintenance.
//!
//! For every source record written since a point in time, finds or creates
//! the canonical symbol it belongs to and recomputes which provider is
//! authoritative for it.
//!
//! # Resolution order
//!
//! 1. A slot already holds this record's document key (known mapping)
//! 2. A slot of another provider shares the ticker (cross-provider attach)
//! 3. A slot of another provider shares the display name
//! 4. Otherwise a new symbol is created
//!
//! Each symbol is written individually under a version guard. A lost guard
//! re-reads and retries the step.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;

use super::merge_watermark::MergeWatermarks;
use super::source_store::SourceSymbolStore;
use super::symbols_model::{MergedSymbol, ProviderPriority, SourceRecord};
use super::symbols_traits::{MergedSymbolRepositoryTrait, SlotLookup};
use crate::constants::MERGE_CONFLICT_RETRIES;
use crate::context::{RunBudget, SyncContext};
use crate::errors::{Error, Result};
use crate::sync::DocumentStore;

/// Outcome of one merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub processed: usize,
    pub created: usize,
    pub attached: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// The run budget ran out before every record was processed.
    pub timed_out: bool,
}

impl MergeSummary {
    pub fn is_success(&self) -> bool {
        self.conflicts == 0 && self.failed == 0 && !self.timed_out
    }
}

/// What a single merge step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Attached,
    Updated,
    Unchanged,
}

/// How an existing symbol was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Known,
    Attach,
}

pub struct SymbolMergeEngine {
    ctx: SyncContext,
    documents: Arc<dyn DocumentStore>,
    repository: Arc<dyn MergedSymbolRepositoryTrait>,
}

impl SymbolMergeEngine {
    pub fn new(
        ctx: SyncContext,
        documents: Arc<dyn DocumentStore>,
        repository: Arc<dyn MergedSymbolRepositoryTrait>,
    ) -> Self {
        Self {
            ctx,
            documents,
            repository,
        }
    }

    /// Merges every source record written at or after `since` (all records
    /// when `None`), from `provider_filter` only or from every configured
    /// provider.
    pub async fn merge(
        &self,
        since: Option<DateTime<Utc>>,
        provider_filter: Option<&str>,
    ) -> Result<MergeSummary> {
        let budget = self.ctx.start_budget();
        self.merge_within(since, provider_filter, &budget).await
    }

    /// Same as [`merge`](Self::merge) under an existing run budget.
    pub async fn merge_within(
        &self,
        since: Option<DateTime<Utc>>,
        provider_filter: Option<&str>,
        budget: &RunBudget,
    ) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        for provider in self.providers(provider_filter) {
            self.merge_provider(&provider, since, budget, &mut summary)
                .await?;
            if summary.timed_out {
                return Ok(summary);
            }
        }
        log_summary(&summary);
        Ok(summary)
    }

    /// Merges each provider's records written since its watermark, then
    /// moves the watermark of every provider whose pass ran clean.
    ///
    /// Records left behind by a timed out or failed pass stay in the next
    /// run's window even when their source documents are never written again.
    pub async fn merge_pending(
        &self,
        provider_filter: Option<&str>,
        budget: &RunBudget,
    ) -> Result<MergeSummary> {
        let watermarks = MergeWatermarks::new(self.documents.clone());
        let mut summary = MergeSummary::default();
        for provider in self.providers(provider_filter) {
            let since = watermarks.get(&provider)?;
            let scanned_at = self.ctx.now();
            let clean = self
                .merge_provider(&provider, since, budget, &mut summary)
                .await?;
            if clean {
                watermarks.advance(&provider, scanned_at).await?;
            } else if summary.timed_out {
                return Ok(summary);
            } else {
                warn!("{}: merge watermark held at {:?}", provider, since);
            }
        }
        log_summary(&summary);
        Ok(summary)
    }

    fn providers(&self, provider_filter: Option<&str>) -> Vec<String> {
        let priority = &self.ctx.config.provider_priority;
        match provider_filter {
            Some(provider) => vec![provider.to_string()],
            None => priority
                .sorted(priority.providers().iter().map(String::as_str))
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// One provider's pass. Returns true when every record merged without a
    /// conflict or failure and the budget held.
    async fn merge_provider(
        &self,
        provider: &str,
        since: Option<DateTime<Utc>>,
        budget: &RunBudget,
        summary: &mut MergeSummary,
    ) -> Result<bool> {
        let setbacks = summary.conflicts + summary.failed;
        let records = SourceSymbolStore::new(self.documents.clone(), provider).load_since(since)?;
        debug!("{}: merging {} records", provider, records.len());

        for record in records {
            if budget.is_exhausted() {
                warn!(
                    "Merge budget exhausted after {:?}, {} records processed",
                    budget.elapsed(),
                    summary.processed
                );
                summary.timed_out = true;
                return Ok(false);
            }
            self.merge_with_retry(provider, &record, summary).await?;
            summary.processed += 1;
        }
        Ok(summary.conflicts + summary.failed == setbacks)
    }

    async fn merge_with_retry(
        &self,
        provider: &str,
        record: &SourceRecord,
        summary: &mut MergeSummary,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.merge_record(provider, record).await {
                Ok(outcome) => {
                    match outcome {
                        MergeOutcome::Created => summary.created += 1,
                        MergeOutcome::Attached => summary.attached += 1,
                        MergeOutcome::Updated => summary.updated += 1,
                        MergeOutcome::Unchanged => summary.unchanged += 1,
                    }
                    return Ok(());
                }
                Err(Error::Conflict(msg)) if attempt < MERGE_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!("{}: retrying '{}' after conflict: {}", provider, record.id, msg);
                }
                Err(Error::Conflict(msg)) => {
                    warn!("{}: giving up on '{}': {}", provider, record.id, msg);
                    summary.conflicts += 1;
                    return Ok(());
                }
                Err(e) if e.is_store_unavailable() => return Err(e),
                Err(e) => {
                    error!("{}: failed to merge '{}': {}", provider, record.id, e);
                    summary.failed += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Runs one merge step for `record` of `provider`.
    pub async fn merge_record(&self, provider: &str, record: &SourceRecord) -> Result<MergeOutcome> {
        let now = self.ctx.now();
        let Some((symbol, resolution)) = self.resolve(provider, record)? else {
            return self.create(provider, record, now).await;
        };
        // A disabled listing never claims an empty slot, so a detached
        // provider stays detached when its record is merged again.
        if resolution == Resolution::Attach && !record.is_enabled() {
            debug!(
                "{}: not attaching disabled '{}' to '{}'",
                provider, record.id, symbol.id
            );
            return Ok(MergeOutcome::Unchanged);
        }

        let Some(next) = apply_record(
            &symbol,
            provider,
            record,
            &self.ctx.config.provider_priority,
            now,
        ) else {
            return Ok(MergeOutcome::Unchanged);
        };

        if !self.repository.update(&next, symbol.version).await? {
            return Err(Error::Conflict(format!(
                "merged symbol '{}' changed since version {}",
                symbol.id, symbol.version
            )));
        }
        if next.main_source != symbol.main_source {
            info!(
                "Symbol '{}': authority {} -> {}",
                symbol.id, symbol.main_source, next.main_source
            );
        }
        Ok(match resolution {
            Resolution::Known => MergeOutcome::Updated,
            Resolution::Attach => MergeOutcome::Attached,
        })
    }

    fn resolve(
        &self,
        provider: &str,
        record: &SourceRecord,
    ) -> Result<Option<(MergedSymbol, Resolution)>> {
        let candidates = self
            .repository
            .find_by_slot(&SlotLookup::RecordId(record.id.clone()))?;
        let own = candidates
            .iter()
            .find(|s| s.slot(provider).is_some_and(|r| r.id == record.id));
        let known = own.or_else(|| candidates.iter().find(|s| s.slot(provider).is_none()));
        if let Some(symbol) = known {
            return Ok(Some((symbol.clone(), Resolution::Known)));
        }

        let mut lookups = vec![SlotLookup::Ticker(record.ticker.clone())];
        if let Some(name) = record.display_name.as_deref().filter(|n| !n.is_empty()) {
            lookups.push(SlotLookup::DisplayName(name.to_string()));
        }
        for lookup in lookups {
            let attachable = self
                .repository
                .find_by_slot(&lookup)?
                .into_iter()
                .filter(|s| s.slot(provider).is_none())
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            if let Some(symbol) = attachable {
                debug!(
                    "{}: attaching '{}' to '{}' via {:?}",
                    provider, record.id, symbol.id, lookup
                );
                return Ok(Some((symbol, Resolution::Attach)));
            }
        }
        Ok(None)
    }

    async fn create(
        &self,
        provider: &str,
        record: &SourceRecord,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome> {
        let mut id = record.local_id.clone();
        if self.repository.get_by_id(&id)?.is_some() {
            id = format!("{}:{}", provider, record.local_id);
            if self.repository.get_by_id(&id)?.is_some() {
                return Err(Error::Conflict(format!(
                    "merged symbol ids '{}' and '{}' are both taken",
                    record.local_id, id
                )));
            }
        }

        let known = self.ctx.config.provider_priority.providers().to_vec();
        let symbol = MergedSymbol::new(
            id,
            provider,
            record.clone(),
            known.iter().map(String::as_str),
            now,
        );
        if !self.repository.insert(&symbol).await? {
            return Err(Error::Conflict(format!(
                "merged symbol '{}' was created concurrently",
                symbol.id
            )));
        }
        debug!("{}: created symbol '{}'", provider, symbol.id);
        Ok(MergeOutcome::Created)
    }
}

fn log_summary(summary: &MergeSummary) {
    info!(
        "Merge finished: {} processed, {} created, {} attached, {} updated, {} unchanged, {} conflicts, {} failed",
        summary.processed,
        summary.created,
        summary.attached,
        summary.updated,
        summary.unchanged,
        summary.conflicts,
        summary.failed
    );
}

/// Applies `record` of `provider` to `symbol`.
///
/// Returns the next state, or `None` when nothing observable changed.
pub fn apply_record(
    symbol: &MergedSymbol,
    provider: &str,
    record: &SourceRecord,
    priority: &ProviderPriority,
    now: DateTime<Utc>,
) -> Option<MergedSymbol> {
    let mut next = symbol.clone();

    let detaching = !record.is_enabled() && symbol.main_source == provider;
    let has_siblings = symbol.populated().any(|(p, _)| p != provider);
    if detaching && has_siblings {
        next.slots.insert(provider.to_string(), None);
    } else {
        next.slots.insert(provider.to_string(), Some(record.clone()));
    }

    let authority = priority
        .sorted(next.slots.keys().map(String::as_str))
        .into_iter()
        .find_map(|p| next.slot(p).filter(|r| r.is_enabled()).map(|r| (p.to_string(), r.clone())));
    if let Some((main_source, main_record)) = authority {
        next.main_source = main_source;
        next.main_record = SourceRecord {
            id: symbol.id.clone(),
            ..main_record
        };
    }

    let authority_changed = next.main_source != symbol.main_source;
    let main_changed = next.main_record != symbol.main_record;
    if authority_changed {
        next.last_refetch_at = Some(now);
        next.last_update_at = now;
    } else if main_changed {
        next.last_update_at = now;
    } else if next.slots == symbol.slots {
        return None;
    }

    next.version = symbol.version + 1;
    Some(next)
}
