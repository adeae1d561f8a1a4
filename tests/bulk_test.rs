//! Bulk `currently_active` flips: paging, concurrent writers, cancellation.

mod common;

use std::sync::Mutex;

use async_trait::async_trait;
use common::{Harness, J, t0};
use solicitor_rotation::config::EngineConfig;
use solicitor_rotation::engine::BulkStateUpdater;
use solicitor_rotation::error::Result;
use solicitor_rotation::model::{
    ActiveFlagRow, AssignmentAttempt, AttemptId, Candidate, SolicitorId, WorkItemId,
};
use solicitor_rotation::store::{ActiveFlagStore, MemoryStore, Store};
use tokio_util::sync::CancellationToken;

fn candidate() -> Candidate {
    Candidate {
        solicitor_id: SolicitorId(1),
        address: "s1@firm100.example".into(),
    }
}

/// `n` attempts on one work item, all flagged active.
async fn seed_active(store: &MemoryStore, n: u32) -> Vec<AttemptId> {
    let work_item = WorkItemId::new();
    let attempts: Vec<AssignmentAttempt> = (1..=n)
        .map(|order| AssignmentAttempt {
            currently_active: true,
            ..AssignmentAttempt::new(work_item, &candidate(), order, t0(), t0())
        })
        .collect();
    let ids = attempts.iter().map(|a| a.id).collect();
    assert!(store.insert_attempts(&attempts).await.unwrap());
    ids
}

/// Wraps the in-memory ledger with a writer that re-asserts `true` on the
/// first `racing` rows of every page between the read and the write.
struct RacingStore {
    inner: MemoryStore,
    racing: usize,
    pages: Mutex<Vec<usize>>,
}

#[async_trait]
impl ActiveFlagStore for RacingStore {
    async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>> {
        self.pages.lock().unwrap().push(ids.len());
        self.inner.read_active_flags(ids).await
    }

    async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>> {
        let n = self.racing.min(rows.len());
        self.inner.write_active_flags(&rows[..n], true).await?;
        self.inner.write_active_flags(rows, target).await
    }
}

#[tokio::test]
async fn concurrent_writers_win_their_rows() {
    let inner = MemoryStore::new();
    let ids = seed_active(&inner, 45_000).await;
    let store = RacingStore {
        inner,
        racing: 100,
        pages: Mutex::new(Vec::new()),
    };

    let outcome = BulkStateUpdater::new(20_000)
        .flip_currently_active(&store, &ids, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*store.pages.lock().unwrap(), vec![20_000, 20_000, 5_000]);
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.updated, 44_700);
    assert_eq!(outcome.skipped, 300);
    assert!(!outcome.cancelled);

    let flags = store.inner.read_active_flags(&ids).await.unwrap();
    let still_active: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter(|(_, row)| row.currently_active)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(still_active.len(), 300);
    for page_start in [0, 20_000, 40_000] {
        assert!((page_start..page_start + 100).all(|i| flags[i].currently_active));
    }
}

#[tokio::test]
async fn missing_and_settled_rows_are_skipped() {
    let store = MemoryStore::new();
    let mut ids = seed_active(&store, 10).await;

    let settled = seed_active(&store, 5).await;
    BulkStateUpdater::new(100)
        .flip_currently_active(&store, &settled, false, &CancellationToken::new())
        .await
        .unwrap();
    ids.extend(settled);
    ids.extend((0..5).map(|_| AttemptId::new()));

    let outcome = BulkStateUpdater::new(7)
        .flip_currently_active(&store, &ids, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.updated, 10);
    assert_eq!(outcome.skipped, 10);
    let flags = store.read_active_flags(&ids).await.unwrap();
    assert_eq!(flags.len(), 15);
    assert!(flags.iter().all(|row| !row.currently_active));
}

#[tokio::test]
async fn held_versions_lose_to_later_writers() {
    let store = MemoryStore::new();
    let ids = seed_active(&store, 6).await;
    let held = store.read_active_flags(&ids).await.unwrap();

    // Somebody rewrites two rows after the caller read them.
    let rewritten = store.write_active_flags(&held[..2], true).await.unwrap();
    assert_eq!(rewritten, ids[..2].to_vec());

    let outcome = BulkStateUpdater::new(4)
        .flip_rows(&store, &held, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.updated, 4);
    assert_eq!(outcome.skipped, 2);
    let flags = store.read_active_flags(&ids).await.unwrap();
    let active: Vec<AttemptId> = flags
        .iter()
        .filter(|row| row.currently_active)
        .map(|row| row.id)
        .collect();
    assert_eq!(active, ids[..2].to_vec());
}

/// Cancels the shared token as soon as the first page is written.
struct CancellingStore {
    inner: MemoryStore,
    cancel: CancellationToken,
}

#[async_trait]
impl ActiveFlagStore for CancellingStore {
    async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>> {
        self.inner.read_active_flags(ids).await
    }

    async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>> {
        self.cancel.cancel();
        self.inner.write_active_flags(rows, target).await
    }
}

#[tokio::test]
async fn cancellation_stops_between_pages() {
    let inner = MemoryStore::new();
    let ids = seed_active(&inner, 25).await;
    let cancel = CancellationToken::new();
    let store = CancellingStore {
        inner,
        cancel: cancel.clone(),
    };

    let outcome = BulkStateUpdater::new(10)
        .flip_currently_active(&store, &ids, false, &cancel)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.pages, 1);
    assert_eq!(outcome.updated, 10);

    // The committed page stays committed; a rerun picks up the rest.
    let rerun = BulkStateUpdater::new(10)
        .flip_currently_active(&store.inner, &ids, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rerun.updated, 15);
    assert_eq!(rerun.skipped, 10);
}

#[test]
fn page_size_has_a_floor_of_one() {
    assert_eq!(BulkStateUpdater::new(0).page_size(), 1);
    assert_eq!(BulkStateUpdater::new(500).page_size(), 500);
}

#[tokio::test]
async fn engine_flips_with_its_configured_page_size() {
    let h = Harness::with_config(EngineConfig {
        bulk_page_size: 2,
        ..EngineConfig::default()
    });
    h.seed(J, 100, &[1, 2, 3]);
    let id = h.create().await;
    let ids: Vec<AttemptId> = h.chain(id).await.iter().map(|a| a.id).collect();

    let outcome = h
        .engine
        .flip_currently_active(&ids, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.skipped, 2);
    assert!(h.active(id).await.is_empty());
}
