//! One scheduled run: track every provider, then merge the delta.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;

use super::merge_engine::{MergeSummary, SymbolMergeEngine};
use super::source_tracker::{SourceSymbolTracker, TrackerSummary};
use super::symbols_traits::{MergedSymbolRepositoryTrait, SymbolFetcher};
use crate::context::SyncContext;
use crate::errors::Result;
use crate::sync::DocumentStore;

/// Outcome of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub trackers: Vec<TrackerSummary>,
    /// Providers whose fetch or reconcile failed, with the error message.
    pub tracker_failures: Vec<(String, String)>,
    pub merge: MergeSummary,
}

impl CycleSummary {
    pub fn is_success(&self) -> bool {
        self.tracker_failures.is_empty()
            && self.trackers.iter().all(TrackerSummary::is_success)
            && self.merge.is_success()
    }
}

pub struct SyncCycle {
    ctx: SyncContext,
    documents: Arc<dyn DocumentStore>,
    fetchers: Vec<Arc<dyn SymbolFetcher>>,
    merge_engine: SymbolMergeEngine,
}

impl SyncCycle {
    pub fn new(
        ctx: SyncContext,
        documents: Arc<dyn DocumentStore>,
        repository: Arc<dyn MergedSymbolRepositoryTrait>,
        fetchers: Vec<Arc<dyn SymbolFetcher>>,
    ) -> Self {
        let merge_engine = SymbolMergeEngine::new(ctx.clone(), documents.clone(), repository);
        Self {
            ctx,
            documents,
            fetchers,
            merge_engine,
        }
    }

    /// Runs every tracker concurrently, then merges records written since
    /// `since`. When `since` is `None` each provider resumes from its merge
    /// watermark, so records a previous run left unmerged are picked up again.
    /// An explicit `since` re-merges history and leaves watermarks alone.
    ///
    /// A failing provider is logged and skipped. Only an unreachable store
    /// aborts the cycle.
    pub async fn run(
        &self,
        since: Option<DateTime<Utc>>,
        provider_filter: Option<&str>,
    ) -> Result<CycleSummary> {
        let budget = self.ctx.start_budget();

        let selected: Vec<&Arc<dyn SymbolFetcher>> = self
            .fetchers
            .iter()
            .filter(|f| provider_filter.map_or(true, |p| f.provider() == p))
            .collect();
        if selected.is_empty() {
            warn!("No fetcher configured for provider filter {:?}", provider_filter);
        }

        let runs = selected.iter().map(|fetcher| {
            let tracker =
                SourceSymbolTracker::new(self.ctx.clone(), self.documents.clone(), fetcher.provider());
            async move {
                let provider = fetcher.provider().to_string();
                let result = match fetcher.fetch_provider_symbols().await {
                    Ok(records) => tracker.reconcile(records).await,
                    Err(e) => Err(e),
                };
                (provider, result)
            }
        });

        let mut summary = CycleSummary::default();
        for (provider, result) in join_all(runs).await {
            match result {
                Ok(tracker) => summary.trackers.push(tracker),
                Err(e) if e.is_store_unavailable() => return Err(e),
                Err(e) => {
                    error!("{}: tracker failed: {}", provider, e);
                    summary.tracker_failures.push((provider, e.to_string()));
                }
            }
        }

        summary.merge = match since {
            Some(since) => {
                self.merge_engine
                    .merge_within(Some(since), provider_filter, &budget)
                    .await?
            }
            None => {
                self.merge_engine
                    .merge_pending(provider_filter, &budget)
                    .await?
            }
        };

        info!(
            "Cycle finished in {:?}: {} trackers ok, {} failed, merge processed {}{}",
            budget.elapsed(),
            summary.trackers.len(),
            summary.tracker_failures.len(),
            summary.merge.processed,
            if summary.merge.timed_out { " (timed out)" } else { "" }
        );
        Ok(summary)
    }
}
