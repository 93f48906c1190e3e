//! Per-provider merge progress.
//!
//! A provider's watermark is the time its last clean merge pass started.
//! Every source record written at or after it may still be unmerged, so the
//! next delta merge starts there. A pass that timed out, gave up on a
//! conflict or failed a step leaves the watermark where it was.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::constants::{DOCUMENT_ID_FIELD, SYNC_STATE_COLLECTION};
use crate::documents::{from_document, to_document};
use crate::errors::{Error, Result};
use crate::sync::{DocumentStore, WriteOp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeWatermark {
    id: String,
    provider: String,
    merged_through: DateTime<Utc>,
}

fn watermark_id(provider: &str) -> String {
    format!("merge_watermark:{}", provider.to_lowercase())
}

#[derive(Clone)]
pub struct MergeWatermarks {
    store: Arc<dyn DocumentStore>,
}

impl MergeWatermarks {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Start of the last clean merge pass for `provider`, if any.
    pub fn get(&self, provider: &str) -> Result<Option<DateTime<Utc>>> {
        let found = self.store.find_by_field(
            SYNC_STATE_COLLECTION,
            DOCUMENT_ID_FIELD,
            &[Value::String(watermark_id(provider))],
        )?;
        match found.into_iter().next() {
            Some(document) => Ok(Some(from_document::<MergeWatermark>(document)?.merged_through)),
            None => Ok(None),
        }
    }

    /// Records that every source record of `provider` written before `at`
    /// has been merged.
    pub async fn advance(&self, provider: &str, at: DateTime<Utc>) -> Result<()> {
        let watermark = MergeWatermark {
            id: watermark_id(provider),
            provider: provider.to_string(),
            merged_through: at,
        };
        let op = WriteOp::Upsert {
            id: watermark.id.clone(),
            set: to_document(&watermark)?,
        };
        let result = self.store.bulk_write(SYNC_STATE_COLLECTION, vec![op]).await?;
        if let Some(failure) = result.failures.first() {
            return Err(Error::BulkWrite {
                collection: SYNC_STATE_COLLECTION.to_string(),
                failed: result.failures.len(),
                attempted: result.attempted(),
                first_error: failure.message.clone(),
            });
        }
        debug!("{}: merge watermark now {}", provider, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Clock;
    use crate::testing::{InMemoryDocumentStore, ManualClock};

    #[tokio::test]
    async fn test_watermark_moves_per_provider() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(InMemoryDocumentStore::with_clock(clock.clone()));
        let watermarks = MergeWatermarks::new(store.clone());
        assert_eq!(watermarks.get("IEX").unwrap(), None);

        let first = clock.now();
        watermarks.advance("IEX", first).await.unwrap();
        let second = clock.tick();
        watermarks.advance("iex", second).await.unwrap();

        assert_eq!(watermarks.get("IEX").unwrap(), Some(second));
        assert_eq!(watermarks.get("other").unwrap(), None);
        assert_eq!(store.documents(SYNC_STATE_COLLECTION).len(), 1);
    }
}
