//! In-memory stores and a controllable clock for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::Clock;
use crate::documents::{apply_patch, document_id, Document, DocumentPatch};
use crate::errors::{DatabaseError, Error, Result};
use crate::symbols::{MergedSymbol, MergedSymbolRepositoryTrait, SlotLookup};
use crate::sync::{BulkWriteResult, DocumentStore, WriteFailure, WriteOp};

// =========================================================================
// ManualClock
// =========================================================================

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += by;
        *now
    }

    /// Moves the clock one second forward.
    pub fn tick(&self) -> DateTime<Utc> {
        self.advance(Duration::seconds(1))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// =========================================================================
// InMemoryDocumentStore
// =========================================================================

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Document,
    updated_at: DateTime<Utc>,
}

pub struct InMemoryDocumentStore {
    clock: Arc<dyn Clock>,
    collections: Mutex<HashMap<String, BTreeMap<String, StoredDocument>>>,
    bulk_write_calls: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
    unavailable: Mutex<bool>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(ManualClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            collections: Mutex::new(HashMap::new()),
            bulk_write_calls: AtomicUsize::new(0),
            failing_ids: Mutex::new(HashSet::new()),
            unavailable: Mutex::new(false),
        }
    }

    /// Documents of `collection`, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.values().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|d| d.body.clone())
    }

    pub fn updated_at(&self, collection: &str, id: &str) -> Option<DateTime<Utc>> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|d| d.updated_at)
    }

    pub fn bulk_write_calls(&self) -> usize {
        self.bulk_write_calls.load(Ordering::SeqCst)
    }

    /// Makes every write to `id` fail.
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(Error::Database(DatabaseError::ConnectionFailed(
                "store offline".into(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>> {
        self.check_available()?;
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|d| d.body.get(field).is_some_and(|v| values.contains(v)))
                    .map(|d| d.body.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn scan(&self, collection: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Document>> {
        self.check_available()?;
        let collections = self.collections.lock().unwrap();
        let mut docs: Vec<(DateTime<Utc>, String, Document)> = collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, d)| since.map_or(true, |s| d.updated_at >= s))
                    .map(|(id, d)| (d.updated_at, id.clone(), d.body.clone()))
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(docs.into_iter().map(|(_, _, d)| d).collect())
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<BulkWriteResult> {
        self.check_available()?;
        self.bulk_write_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        let failing = self.failing_ids.lock().unwrap().clone();
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        let mut result = BulkWriteResult::default();

        for (index, op) in ops.into_iter().enumerate() {
            let id = op.id().map(str::to_string);
            let fail = |message: &str| WriteFailure {
                index,
                id: id.clone(),
                message: message.to_string(),
            };
            let Some(key) = id.clone() else {
                result.failures.push(fail("document has no id"));
                continue;
            };
            if failing.contains(&key) {
                result.failures.push(fail("injected failure"));
                continue;
            }

            match op {
                WriteOp::Insert { document } => {
                    if docs.contains_key(&key) {
                        result.failures.push(fail("duplicate key"));
                    } else {
                        docs.insert(key, StoredDocument { body: document, updated_at: now });
                        result.inserted += 1;
                    }
                }
                WriteOp::Update { patch, .. } => match docs.get_mut(&key) {
                    None => result.failures.push(fail("document not found")),
                    Some(stored) => {
                        if apply_patch(&mut stored.body, &patch) {
                            stored.updated_at = now;
                            result.updated += 1;
                        } else {
                            result.unchanged += 1;
                        }
                    }
                },
                WriteOp::Upsert { set, .. } => match docs.get_mut(&key) {
                    None => {
                        docs.insert(key, StoredDocument { body: set, updated_at: now });
                        result.upserted += 1;
                    }
                    Some(stored) => {
                        let patch = DocumentPatch { set, unset: Vec::new() };
                        if apply_patch(&mut stored.body, &patch) {
                            stored.updated_at = now;
                            result.upserted += 1;
                        } else {
                            result.unchanged += 1;
                        }
                    }
                },
            }
        }
        Ok(result)
    }
}

/// Seeds a document directly, bypassing the write path.
pub fn seed(store: &InMemoryDocumentStore, collection: &str, body: Document) {
    let id = document_id(&body).unwrap_or_default().to_string();
    let now = store.clock.now();
    store
        .collections
        .lock()
        .unwrap()
        .entry(collection.to_string())
        .or_default()
        .insert(id, StoredDocument { body, updated_at: now });
}

// =========================================================================
// InMemoryMergedSymbolRepository
// =========================================================================

#[derive(Default)]
pub struct InMemoryMergedSymbolRepository {
    symbols: Mutex<BTreeMap<String, MergedSymbol>>,
    /// Number of upcoming updates to lose against a simulated concurrent writer.
    lose_next_updates: AtomicUsize,
}

impl InMemoryMergedSymbolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<MergedSymbol> {
        self.symbols.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<MergedSymbol> {
        self.symbols.lock().unwrap().get(id).cloned()
    }

    /// The next `n` updates find the stored version bumped by someone else.
    pub fn lose_next_updates(&self, n: usize) {
        self.lose_next_updates.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MergedSymbolRepositoryTrait for InMemoryMergedSymbolRepository {
    fn get_by_id(&self, id: &str) -> Result<Option<MergedSymbol>> {
        Ok(self.get(id))
    }

    fn find_by_slot(&self, lookup: &SlotLookup) -> Result<Vec<MergedSymbol>> {
        let mut found: Vec<MergedSymbol> = self
            .symbols
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.populated().any(|(_, r)| lookup.matches(r)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn list(&self) -> Result<Vec<MergedSymbol>> {
        Ok(self.all())
    }

    fn list_refetched_since(&self, since: DateTime<Utc>) -> Result<Vec<MergedSymbol>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|s| s.last_refetch_at.is_some_and(|t| t >= since))
            .collect())
    }

    async fn insert(&self, symbol: &MergedSymbol) -> Result<bool> {
        let mut symbols = self.symbols.lock().unwrap();
        if symbols.contains_key(&symbol.id) {
            return Ok(false);
        }
        symbols.insert(symbol.id.clone(), symbol.clone());
        Ok(true)
    }

    async fn update(&self, symbol: &MergedSymbol, expected_version: i64) -> Result<bool> {
        let mut symbols = self.symbols.lock().unwrap();
        let Some(stored) = symbols.get_mut(&symbol.id) else {
            return Ok(false);
        };
        let pending = self.lose_next_updates.load(Ordering::SeqCst);
        if pending > 0 {
            self.lose_next_updates.store(pending - 1, Ordering::SeqCst);
            stored.version += 1;
            return Ok(false);
        }
        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = MergedSymbol {
            version: expected_version + 1,
            ..symbol.clone()
        };
        Ok(true)
    }
}
