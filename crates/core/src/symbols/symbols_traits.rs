use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::symbols_model::{MergedSymbol, SourceRecord};
use crate::errors::Result;

/// Slot searches used to resolve a source record to a merged symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLookup {
    /// A slot holds a record with this document key.
    RecordId(String),
    /// A slot holds a record with this ticker.
    Ticker(String),
    /// A slot holds a record with this display name.
    DisplayName(String),
}

impl SlotLookup {
    pub fn matches(&self, record: &SourceRecord) -> bool {
        match self {
            SlotLookup::RecordId(id) => &record.id == id,
            SlotLookup::Ticker(ticker) => &record.ticker == ticker,
            SlotLookup::DisplayName(name) => record.display_name.as_deref() == Some(name.as_str()),
        }
    }
}

/// Trait defining the contract for merged-symbol persistence.
#[async_trait]
pub trait MergedSymbolRepositoryTrait: Send + Sync {
    fn get_by_id(&self, id: &str) -> Result<Option<MergedSymbol>>;

    /// Symbols with at least one populated slot matching `lookup`, oldest
    /// first (`created_at`, then `id`).
    fn find_by_slot(&self, lookup: &SlotLookup) -> Result<Vec<MergedSymbol>>;

    fn list(&self) -> Result<Vec<MergedSymbol>>;

    /// Symbols whose authoritative source changed at or after `since`.
    /// Downstream clients holding these need a full re-fetch.
    fn list_refetched_since(&self, since: DateTime<Utc>) -> Result<Vec<MergedSymbol>>;

    /// Inserts a new symbol. Returns false when the id is already taken.
    async fn insert(&self, symbol: &MergedSymbol) -> Result<bool>;

    /// Replaces a symbol if its stored version still equals
    /// `expected_version`; the stored version becomes `expected_version + 1`.
    /// Returns false when the guard fails.
    async fn update(&self, symbol: &MergedSymbol, expected_version: i64) -> Result<bool>;
}

/// Pulls a provider's normalized symbol snapshot.
#[async_trait]
pub trait SymbolFetcher: Send + Sync {
    fn provider(&self) -> &str;

    async fn fetch_provider_symbols(&self) -> Result<Vec<SourceRecord>>;
}
