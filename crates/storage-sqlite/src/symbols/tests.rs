use super::*;
use crate::documents::DocumentRepository;
use crate::test_support::{test_db, TestClock};
use chrono::{Duration, TimeZone, Utc};
use securitymaster_core::symbols::{
    MergedSymbol, MergedSymbolRepositoryTrait, SlotLookup, SourceRecord, SourceSymbolTracker,
    SymbolMergeEngine,
};
use securitymaster_core::{Clock, SyncConfig, SyncContext};
use std::sync::Arc;

fn stored(id: &str, ticker: &str) -> SourceRecord {
    SourceRecord {
        id: id.to_string(),
        ..SourceRecord::new(id, ticker)
    }
}

fn symbol(id: &str, provider: &str, record: SourceRecord, minute: u32) -> MergedSymbol {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap();
    MergedSymbol::new(id, provider, record, ["a", "b"], now)
}

#[tokio::test]
async fn test_insert_then_read_back() {
    let db = test_db();
    let repo = MergedSymbolRepository::new(db.pool.clone(), db.writer.clone());
    let mut original = symbol("A1", "a", stored("A1", "AAA").with_display_name("Acme"), 0);
    original.last_refetch_at = Some(original.created_at);

    assert!(repo.insert(&original).await.unwrap());
    assert!(!repo.insert(&original).await.unwrap());

    let loaded = repo.get_by_id("A1").unwrap().unwrap();
    assert_eq!(loaded, original);
    assert!(loaded.slots.contains_key("b"));
    assert!(loaded.slot("b").is_none());
    assert!(repo.get_by_id("nope").unwrap().is_none());
}

#[tokio::test]
async fn test_update_is_version_guarded() {
    let db = test_db();
    let repo = MergedSymbolRepository::new(db.pool.clone(), db.writer.clone());
    let original = symbol("A1", "a", stored("A1", "AAA"), 0);
    repo.insert(&original).await.unwrap();

    let mut next = original.clone();
    next.slots.insert("b".into(), Some(stored("B1", "AAA")));
    assert!(repo.update(&next, 1).await.unwrap());
    assert!(!repo.update(&next, 1).await.unwrap());

    let loaded = repo.get_by_id("A1").unwrap().unwrap();
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.slot("b").unwrap().id, "B1");
}

#[tokio::test]
async fn test_slot_index_follows_updates() {
    let db = test_db();
    let repo = MergedSymbolRepository::new(db.pool.clone(), db.writer.clone());
    let mut first = symbol("A1", "a", stored("A1", "AAA"), 0);
    first.slots.insert("b".into(), Some(stored("B1", "AAA")));
    repo.insert(&first).await.unwrap();
    repo.insert(&symbol("A2", "a", stored("A2", "AAA"), 5))
        .await
        .unwrap();

    let by_ticker = repo
        .find_by_slot(&SlotLookup::Ticker("AAA".into()))
        .unwrap();
    let ids: Vec<_> = by_ticker.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A1", "A2"]);

    let by_record = repo
        .find_by_slot(&SlotLookup::RecordId("B1".into()))
        .unwrap();
    assert_eq!(by_record.len(), 1);

    let mut detached = first.clone();
    detached.slots.insert("b".into(), None);
    assert!(repo.update(&detached, 1).await.unwrap());
    assert!(repo
        .find_by_slot(&SlotLookup::RecordId("B1".into()))
        .unwrap()
        .is_empty());
    assert!(repo
        .find_by_slot(&SlotLookup::DisplayName("Acme".into()))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_list_refetched_since() {
    let db = test_db();
    let repo = MergedSymbolRepository::new(db.pool.clone(), db.writer.clone());
    let mut early = symbol("A1", "a", stored("A1", "AAA"), 0);
    early.last_refetch_at = Some(early.created_at);
    let mut late = symbol("A2", "a", stored("A2", "BBB"), 10);
    late.last_refetch_at = Some(late.created_at);
    repo.insert(&early).await.unwrap();
    repo.insert(&late).await.unwrap();
    repo.insert(&symbol("A3", "a", stored("A3", "CCC"), 20))
        .await
        .unwrap();

    let since = early.created_at + Duration::minutes(1);
    let refetched = repo.list_refetched_since(since).unwrap();
    assert_eq!(refetched.len(), 1);
    assert_eq!(refetched[0].id, "A2");
    assert_eq!(repo.list().unwrap().len(), 3);
}

#[tokio::test]
async fn test_track_and_merge_over_sqlite() {
    let db = test_db();
    let clock = TestClock::new();
    let documents = Arc::new(DocumentRepository::with_clock(
        db.pool.clone(),
        db.writer.clone(),
        clock.clone(),
    ));
    let symbols = Arc::new(MergedSymbolRepository::new(db.pool.clone(), db.writer.clone()));
    let ctx = SyncContext::new(SyncConfig::default().with_priority(["b", "a"]), clock.clone());

    let tracker_a = SourceSymbolTracker::new(ctx.clone(), documents.clone(), "a");
    let tracker_b = SourceSymbolTracker::new(ctx.clone(), documents.clone(), "b");
    tracker_a
        .reconcile(vec![SourceRecord::new("A1", "T"), SourceRecord::new("A2", "U")])
        .await
        .unwrap();
    tracker_b
        .reconcile(vec![SourceRecord::new("B1", "T")])
        .await
        .unwrap();

    let engine = SymbolMergeEngine::new(ctx.clone(), documents.clone(), symbols.clone());
    let summary = engine.merge(None, None).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.processed, 3);

    let merged = symbols.list().unwrap();
    assert_eq!(merged.len(), 2);
    let t = symbols
        .find_by_slot(&SlotLookup::Ticker("T".into()))
        .unwrap();
    assert_eq!(t.len(), 1);
    assert_eq!(t[0].main_source, "b");
    assert!(t[0].slot("a").is_some());

    // Nothing changed since the last write.
    let since = clock.tick();
    let summary = engine.merge(Some(since), None).await.unwrap();
    assert_eq!(summary.processed, 0);

    // B1 disappears upstream: the merged symbol falls back to provider a.
    tracker_b
        .reconcile(vec![SourceRecord::new("B2", "V")])
        .await
        .unwrap();
    let summary = engine.merge(Some(since), Some("b")).await.unwrap();
    assert!(summary.is_success());
    let t = symbols.get_by_id(&t[0].id).unwrap().unwrap();
    assert_eq!(t.main_source, "a");
    assert_eq!(t.last_refetch_at, Some(clock.now()));
}
