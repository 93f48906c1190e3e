//! Symbols module - source tracking, entity resolution and merged symbols.

mod match_cascade;
mod merge_engine;
mod merge_watermark;
mod source_store;
mod source_tracker;
mod symbols_model;
mod symbols_traits;
mod sync_cycle;

#[cfg(test)]
mod source_tracker_tests;

pub use match_cascade::{match_records, CascadeMatch, MatchCascade, MatchKey};
pub use merge_engine::{apply_record, MergeOutcome, MergeSummary, SymbolMergeEngine};
pub use merge_watermark::MergeWatermarks;
pub use source_store::{source_collection, SourceSymbolStore};
pub use source_tracker::{SourceSymbolTracker, TrackerSummary};
pub use symbols_model::{MergedSymbol, ProviderPriority, SourceRecord};
pub use symbols_traits::{MergedSymbolRepositoryTrait, SlotLookup, SymbolFetcher};
pub use sync_cycle::{CycleSummary, SyncCycle};
