//! Tests for SourceSymbolTracker.

use super::*;
use crate::context::{SyncConfig, SyncContext};
use crate::documents::from_document;
use crate::testing::{InMemoryDocumentStore, ManualClock};
use std::sync::Arc;

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryDocumentStore>,
    tracker: SourceSymbolTracker,
}

fn fixture_with(config: SyncConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(InMemoryDocumentStore::with_clock(clock.clone()));
    let ctx = SyncContext::new(config, clock.clone());
    let tracker = SourceSymbolTracker::new(ctx, store.clone(), "IEX");
    Fixture {
        clock,
        store,
        tracker,
    }
}

fn fixture() -> Fixture {
    fixture_with(SyncConfig::default())
}

impl Fixture {
    fn stored(&self) -> Vec<SourceRecord> {
        self.store
            .documents("symbols_iex")
            .into_iter()
            .map(|d| from_document(d).unwrap())
            .collect()
    }

    fn stored_by_id(&self, id: &str) -> SourceRecord {
        from_document(self.store.get("symbols_iex", id).unwrap()).unwrap()
    }
}

fn rec(local_id: &str, ticker: &str) -> SourceRecord {
    SourceRecord::new(local_id, ticker)
}

#[tokio::test]
async fn test_first_snapshot_inserts_with_local_ids() {
    let f = fixture();
    let summary = f
        .tracker
        .reconcile(vec![rec("X1", "AAA"), rec("X2", "BBB")])
        .await
        .unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.provider, "IEX");
    let stored = f.stored();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].id, "X1");
    assert_eq!(stored[0].local_id, "X1");
}

#[tokio::test]
async fn test_rename_survival_updates_in_place() {
    let f = fixture();
    f.tracker.reconcile(vec![rec("X1", "AAA")]).await.unwrap();

    f.clock.tick();
    let summary = f.tracker.reconcile(vec![rec("X1", "BBB")]).await.unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.matched_by_key.get(&MatchKey::LocalId), Some(&1));
    let stored = f.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].ticker, "BBB");
}

#[tokio::test]
async fn test_local_id_rename_keeps_document_key() {
    let f = fixture();
    let mut old = rec("X1", "AAA");
    old.figi = Some("BBG000000001".into());
    f.tracker.reconcile(vec![old]).await.unwrap();

    let mut renamed = rec("X7", "AAA");
    renamed.figi = Some("BBG000000001".into());
    let summary = f.tracker.reconcile(vec![renamed]).await.unwrap();

    assert_eq!(summary.matched_by_key.get(&MatchKey::Figi), Some(&1));
    let stored = f.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, "X1");
    assert_eq!(stored[0].local_id, "X7");
    assert!(stored[0].is_enabled());
}

#[tokio::test]
async fn test_reissued_local_id_gets_suffixed_key() {
    let f = fixture();
    let mut old = rec("X1", "AAA");
    old.figi = Some("FIGI-A".into());
    f.tracker.reconcile(vec![old]).await.unwrap();

    // AAA moved to X9 and X1 was handed to a different security.
    let mut moved = rec("X9", "AAA");
    moved.figi = Some("FIGI-A".into());
    let mut reissued = rec("X1", "ZZZ");
    reissued.figi = Some("FIGI-Z".into());
    let summary = f.tracker.reconcile(vec![reissued, moved]).await.unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(f.stored_by_id("X1").local_id, "X9");
    assert_eq!(f.stored_by_id("X1~2").ticker, "ZZZ");
}

#[tokio::test]
async fn test_absent_records_are_disabled_then_re_enabled() {
    let f = fixture();
    f.tracker
        .reconcile(vec![rec("X1", "AAA"), rec("X2", "BBB")])
        .await
        .unwrap();

    f.clock.tick();
    let summary = f.tracker.reconcile(vec![rec("X1", "AAA")]).await.unwrap();
    assert_eq!(summary.disabled, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(f.stored().len(), 2);
    assert!(!f.stored_by_id("X2").is_enabled());

    // Already disabled records are not written again.
    f.clock.tick();
    let summary = f.tracker.reconcile(vec![rec("X1", "AAA")]).await.unwrap();
    assert_eq!(summary.disabled, 0);
    assert_eq!(f.store.bulk_write_calls(), 2);

    f.clock.tick();
    let summary = f
        .tracker
        .reconcile(vec![rec("X1", "AAA"), rec("X2", "BBB")])
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    let x2 = f.stored_by_id("X2");
    assert!(x2.is_enabled());
    assert_eq!(x2.enabled, None);
}

#[tokio::test]
async fn test_empty_snapshot_writes_nothing() {
    let f = fixture();
    f.tracker.reconcile(vec![rec("X1", "AAA")]).await.unwrap();

    let summary = f.tracker.reconcile(Vec::new()).await.unwrap();
    assert_eq!(summary.disabled, 0);
    assert_eq!(f.store.bulk_write_calls(), 1);
    assert!(f.stored_by_id("X1").is_enabled());
}

#[tokio::test]
async fn test_invalid_and_duplicate_records_are_dropped() {
    let f = fixture();
    let summary = f
        .tracker
        .reconcile(vec![
            rec("", "AAA"),
            rec("X1", ""),
            rec("X2", "OLD"),
            rec("X2", "NEW"),
        ])
        .await
        .unwrap();

    assert_eq!(summary.fresh, 4);
    assert_eq!(summary.dropped, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(f.stored_by_id("X2").ticker, "NEW");
}

#[tokio::test]
async fn test_skip_enabled_only_writes() {
    let config = SyncConfig {
        skip_enabled_only_writes: true,
        ..SyncConfig::default()
    };
    let f = fixture_with(config);
    f.tracker
        .reconcile(vec![rec("X1", "AAA").with_enabled(false)])
        .await
        .unwrap();

    // Only the flag flips: the write is skipped.
    let summary = f
        .tracker
        .reconcile(vec![rec("X1", "AAA").with_enabled(true)])
        .await
        .unwrap();
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(f.stored_by_id("X1").enabled, Some(false));

    // A real field change still goes through.
    let summary = f
        .tracker
        .reconcile(vec![rec("X1", "BBB").with_enabled(true)])
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(f.stored_by_id("X1").enabled, Some(true));
}

#[tokio::test]
async fn test_write_failures_are_counted() {
    let f = fixture();
    f.store.fail_writes_for("X2");
    let summary = f
        .tracker
        .reconcile(vec![rec("X1", "AAA"), rec("X2", "BBB")])
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_success());
}
