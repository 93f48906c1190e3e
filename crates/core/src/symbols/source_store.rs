use chrono::{DateTime, Utc};
use log::error;
use std::sync::Arc;

use super::symbols_model::SourceRecord;
use crate::constants::SOURCE_COLLECTION_PREFIX;
use crate::documents::{document_id, from_document, Document};
use crate::errors::Result;
use crate::sync::DocumentStore;

/// Collection holding one provider's symbol snapshot.
pub fn source_collection(provider: &str) -> String {
    format!("{}{}", SOURCE_COLLECTION_PREFIX, provider.to_lowercase())
}

/// Typed read access to one provider's symbol collection.
#[derive(Clone)]
pub struct SourceSymbolStore {
    store: Arc<dyn DocumentStore>,
    provider: String,
    collection: String,
}

impl SourceSymbolStore {
    pub fn new(store: Arc<dyn DocumentStore>, provider: &str) -> Self {
        Self {
            store,
            provider: provider.to_string(),
            collection: source_collection(provider),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// All stored documents with their parsed records. Documents that do not
    /// parse are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<(SourceRecord, Document)>> {
        let documents = self.store.scan(&self.collection, None)?;
        Ok(self.parse(documents))
    }

    /// Records written at or after `since`, oldest write first.
    pub fn load_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceRecord>> {
        let documents = self.store.scan(&self.collection, since)?;
        Ok(self.parse(documents).into_iter().map(|(r, _)| r).collect())
    }

    fn parse(&self, documents: Vec<Document>) -> Vec<(SourceRecord, Document)> {
        documents
            .into_iter()
            .filter_map(|document| {
                let id = document_id(&document).unwrap_or_default().to_string();
                match from_document::<SourceRecord>(document.clone()) {
                    Ok(record) if !record.id.is_empty() => Some((record, document)),
                    Ok(_) => {
                        error!("{}: stored record without id, skipping", self.collection);
                        None
                    }
                    Err(e) => {
                        error!("{}: unreadable record '{}': {}", self.collection, id, e);
                        None
                    }
                }
            })
            .collect()
    }
}
