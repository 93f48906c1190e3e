use log::error;
use std::sync::Arc;

use super::facts_model::{
    Dividend, Fact, PriceBar, Split, DIVIDEND_KEY_FIELDS, PRICE_KEY_FIELDS, SPLIT_KEY_FIELDS,
};
use crate::constants::{DIVIDENDS_COLLECTION, PRICES_COLLECTION, SPLITS_COLLECTION};
use crate::documents::to_document;
use crate::errors::Result;
use crate::sync::{DifferentialSync, DocumentStore, ReconcileSummary};

/// Writes fact batches with the upsert-only sync variant.
///
/// Facts never change once written, so there is nothing to diff: each record
/// is upserted by its natural key and a repeated batch never duplicates.
pub struct FactSyncService {
    sync: DifferentialSync,
}

impl FactSyncService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            sync: DifferentialSync::new(store),
        }
    }

    pub async fn sync_prices(&self, prices: &[PriceBar]) -> Result<ReconcileSummary> {
        self.upsert(PRICES_COLLECTION, prices, &PRICE_KEY_FIELDS).await
    }

    pub async fn sync_dividends(&self, dividends: &[Dividend]) -> Result<ReconcileSummary> {
        self.upsert(DIVIDENDS_COLLECTION, dividends, &DIVIDEND_KEY_FIELDS)
            .await
    }

    pub async fn sync_splits(&self, splits: &[Split]) -> Result<ReconcileSummary> {
        self.upsert(SPLITS_COLLECTION, splits, &SPLIT_KEY_FIELDS).await
    }

    async fn upsert<T: Fact>(
        &self,
        collection: &str,
        facts: &[T],
        key_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        let mut documents = Vec::with_capacity(facts.len());
        let mut dropped = 0;
        for fact in facts {
            if fact.symbol_id().trim().is_empty() {
                error!("{}: dropping fact without symbol id", collection);
                dropped += 1;
                continue;
            }
            documents.push(to_document(fact)?);
        }

        let mut summary = self.sync.upsert_all(collection, documents, key_fields).await?;
        summary.skipped += dropped;
        Ok(summary)
    }
}
