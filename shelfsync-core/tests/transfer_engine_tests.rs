// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transfer engine tests: bidirectional transfer, per-item failure
//! accounting, checkpointed resume, and the security abort path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use shelfsync_core::trust::TrustedDevice;
use shelfsync_core::{
    diff_manifests, CatalogSource, Fingerprint, ItemKind, ManifestEntry, MemoryCatalog,
    MockSyncTransport, NewerWins, ReadingState, Storage, SymmetricKey, SyncConfig, SyncError,
    SyncProgress, SyncResult, SyncSession, SyncStatus, SyncableItem, TransferEngine,
};

struct Harness {
    catalog: Arc<MemoryCatalog>,
    mock: Arc<MockSyncTransport>,
    storage: Arc<Storage>,
    engine: TransferEngine,
    trusted: TrustedDevice,
}

fn harness(config: &SyncConfig) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    let mock = Arc::new(MockSyncTransport::new("remote", "482913"));
    let storage = Arc::new(Storage::in_memory(SymmetricKey::generate()).unwrap());

    let key = SymmetricKey::generate();
    mock.install_session_key(key.clone());
    let trusted = TrustedDevice {
        device_id: "remote".into(),
        fingerprint: Fingerprint::from_der(b"mock certificate v1"),
        session_key: key,
        trusted_at: 0,
        expires_at: u64::MAX,
    };

    let engine = TransferEngine::new(
        Arc::clone(&catalog) as _,
        Arc::clone(&mock) as _,
        Arc::clone(&storage),
        Arc::new(NewerWins),
        config,
    );

    Harness {
        catalog,
        mock,
        storage,
        engine,
        trusted,
    }
}

fn book(id: &str, title: &str, updated_at: u64) -> SyncableItem {
    SyncableItem::new(id, ItemKind::Book, title, updated_at)
}

async fn plan_for(h: &Harness) -> shelfsync_core::SyncPlan {
    use shelfsync_core::{CatalogSource, SyncTransport};
    let local = h.catalog.manifest().await.unwrap();
    let remote = h.mock.fetch_manifest("remote").await.unwrap();
    diff_manifests(&local, &remote)
}

fn progress_channel() -> (watch::Sender<SyncProgress>, watch::Receiver<SyncProgress>) {
    watch::channel(SyncProgress::idle("remote"))
}

#[tokio::test]
async fn full_sync_converges_both_sides() {
    let h = harness(&SyncConfig::fast());
    use shelfsync_core::CatalogSource;

    h.catalog.apply_item(book("book-a", "Local Only", 10)).await.unwrap();
    let mut conflicted = book("book-c", "Local Version", 10);
    conflicted.state = ReadingState {
        read: true,
        bookmarked: false,
        progress_percent: 60,
    };
    h.catalog.apply_item(conflicted).await.unwrap();

    h.mock.seed_items(vec![book("book-b", "Remote Only", 5), {
        let mut item = book("book-c", "Remote Version", 20);
        item.state = ReadingState {
            read: false,
            bookmarked: true,
            progress_percent: 30,
        };
        item
    }]);

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    assert_eq!(session.status, SyncStatus::Completed);
    assert_eq!(session.total_items, 3);
    assert_eq!(session.completed_items, 3);
    assert!(session.failed_items.is_empty());
    assert_eq!(session.conflicts, vec!["book-c".to_string()]);

    // Remote gained the local-only book and the merged conflict item
    assert_eq!(h.mock.remote_item("book-a").unwrap().title, "Local Only");
    let remote_c = h.mock.remote_item("book-c").unwrap();
    assert_eq!(remote_c.title, "Remote Version");

    // Local gained the remote-only book; the merge kept the newer content
    // and the union of reading state
    let local_b = h.catalog.get_item("book-b").await.unwrap().unwrap();
    assert_eq!(local_b.title, "Remote Only");
    let local_c = h.catalog.get_item("book-c").await.unwrap().unwrap();
    assert_eq!(local_c.title, "Remote Version");
    assert!(local_c.state.read);
    assert!(local_c.state.bookmarked);
    assert_eq!(local_c.state.progress_percent, 60);

    // Finished cleanly, so no checkpoint remains
    assert!(h.storage.load_checkpoint("remote").unwrap().is_none());
}

#[tokio::test]
async fn empty_plan_completes_immediately() {
    let h = harness(&SyncConfig::fast());
    let plan = plan_for(&h).await;

    let mut session = SyncSession::new("remote");
    let (tx, rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    assert_eq!(session.status, SyncStatus::Completed);
    assert_eq!(rx.borrow().percent, 100);
}

#[tokio::test]
async fn failing_items_complete_with_errors() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items((0..10).map(|i| book(&format!("book-{i}"), "Title", i)).collect());

    // Items 3, 5, and 7 fail beyond the per-item retry budget
    for id in ["book-3", "book-5", "book-7"] {
        h.mock.fail_item(id, u32::MAX);
    }

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    assert_eq!(session.status, SyncStatus::CompletedWithErrors);
    assert_eq!(session.total_items, 10);
    assert_eq!(session.completed_items, 7);
    assert_eq!(
        session.failed_items,
        vec!["book-3".to_string(), "book-5".to_string(), "book-7".to_string()]
    );
    // Each failed item consumed its full retry budget
    assert!(session.retry_count >= 3 * 2);
}

#[tokio::test]
async fn transient_item_failures_are_retried_and_recovered() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items(vec![book("book-flaky", "Title", 1)]);
    h.mock.fail_item("book-flaky", 2);

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    assert_eq!(session.status, SyncStatus::Completed);
    assert_eq!(session.retry_count, 2);
    assert!(session.failed_items.is_empty());
}

#[tokio::test]
async fn every_item_failing_fails_the_session() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items(vec![book("book-a", "A", 1), book("book-b", "B", 2)]);
    h.mock.fail_item("book-a", u32::MAX);
    h.mock.fail_item("book-b", u32::MAX);

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    let err = h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap_err();

    assert!(matches!(err, SyncError::TransferFailed(_)));
    assert_eq!(session.status, SyncStatus::Failed);
}

#[tokio::test]
async fn interrupted_transfer_resumes_from_checkpoint() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items((0..6).map(|i| book(&format!("book-{i}"), "Title", i)).collect());

    // The connection dies at the fourth item operation and stays dead
    // long enough to exhaust the whole-operation retry budget.
    h.mock.drop_connection_at_op(4, u32::MAX);

    let plan = plan_for(&h).await;
    let mut first = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    let err = h.engine.run(&mut first, &h.trusted, &plan, &tx).await.unwrap_err();
    assert!(matches!(err, SyncError::ConnectionFailed(_)));
    assert_eq!(first.status, SyncStatus::Failed);
    assert_eq!(first.completed_items, 3);

    // The checkpoint survives the failure
    let checkpoint = h.storage.load_checkpoint("remote").unwrap().unwrap();
    assert_eq!(checkpoint.next_index, 3);

    // Network restored: a new session resumes instead of restarting
    h.mock.fail_connections(0);
    let mut second = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut second, &h.trusted, &plan, &tx).await.unwrap();

    assert!(second.was_resumed);
    assert_eq!(second.resumed_from_item, Some(3));
    assert_eq!(second.status, SyncStatus::Completed);
    assert_eq!(second.completed_items, 6);
    assert!(h.storage.load_checkpoint("remote").unwrap().is_none());
}

#[tokio::test]
async fn brief_connection_drop_is_healed_in_place() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items((0..4).map(|i| book(&format!("book-{i}"), "Title", i)).collect());
    h.mock.interrupt_at_op(2);

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    // Healed by the in-session operation retry, not a resumed session
    assert_eq!(session.status, SyncStatus::Completed);
    assert!(!session.was_resumed);
    assert_eq!(session.completed_items, 4);
    assert_eq!(session.retry_count, 1);
}

#[tokio::test]
async fn stale_checkpoint_is_discarded_when_the_plan_changes() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items((0..3).map(|i| book(&format!("book-{i}"), "Title", i)).collect());

    h.storage
        .save_checkpoint(&shelfsync_core::TransferCheckpoint {
            device_id: "remote".into(),
            plan_fingerprint: "fingerprint-of-some-other-plan".into(),
            next_index: 2,
            completed_items: 2,
            failed_items: vec![],
            conflicts: vec![],
            retry_count: 0,
        })
        .unwrap();

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap();

    assert!(!session.was_resumed);
    assert_eq!(session.completed_items, 3);
}

#[tokio::test]
async fn tampered_frame_aborts_without_retry() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items(vec![
        book("book-a", "A", 1),
        book("book-b", "B", 2),
        book("book-c", "C", 3),
    ]);
    h.mock.tamper_item("book-b");

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    let err = h.engine.run(&mut session, &h.trusted, &plan, &tx).await.unwrap_err();

    assert!(matches!(err, SyncError::SecurityViolation(_)));
    assert_eq!(session.status, SyncStatus::Failed);
    // The transfer stopped at the tampered item
    assert_eq!(session.completed_items, 1);
    use shelfsync_core::CatalogSource;
    assert!(h.catalog.get_item("book-c").await.unwrap().is_none());
}

#[tokio::test]
async fn progress_is_published_as_integer_percentages() {
    let h = harness(&SyncConfig::fast());
    h.mock.seed_items((0..4).map(|i| book(&format!("book-{i}"), "Title", i)).collect());

    let plan = plan_for(&h).await;
    let mut session = SyncSession::new("remote");
    let (tx, mut rx) = progress_channel();

    let mut seen = vec![rx.borrow().percent];
    let run = h.engine.run(&mut session, &h.trusted, &plan, &tx);
    tokio::pin!(run);

    loop {
        tokio::select! {
            result = &mut run => {
                result.unwrap();
                break;
            }
            changed = rx.changed() => {
                changed.unwrap();
                seen.push(rx.borrow().percent);
            }
        }
    }
    while rx.has_changed().unwrap_or(false) {
        rx.changed().await.unwrap();
        seen.push(rx.borrow().percent);
    }

    assert_eq!(*seen.last().unwrap(), 100);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
}

/// Catalog wrapper that records which write path each item went through.
struct RecordingCatalog {
    inner: MemoryCatalog,
    replaced: Mutex<Vec<String>>,
    state_merged: Mutex<Vec<String>>,
}

#[async_trait]
impl CatalogSource for RecordingCatalog {
    async fn list_items(&self) -> SyncResult<Vec<SyncableItem>> {
        self.inner.list_items().await
    }

    async fn manifest(&self) -> SyncResult<Vec<ManifestEntry>> {
        self.inner.manifest().await
    }

    async fn get_item(&self, item_id: &str) -> SyncResult<Option<SyncableItem>> {
        self.inner.get_item(item_id).await
    }

    async fn apply_item(&self, item: SyncableItem) -> SyncResult<()> {
        self.replaced.lock().unwrap().push(item.id.clone());
        self.inner.apply_item(item).await
    }

    async fn apply_merged_state(&self, item_id: &str, state: ReadingState) -> SyncResult<()> {
        self.state_merged.lock().unwrap().push(item_id.to_string());
        self.inner.apply_merged_state(item_id, state).await
    }
}

#[tokio::test]
async fn state_only_merges_do_not_rewrite_local_content() {
    use shelfsync_core::SyncTransport;

    let config = SyncConfig::fast();
    let catalog = Arc::new(RecordingCatalog {
        inner: MemoryCatalog::new(),
        replaced: Mutex::new(Vec::new()),
        state_merged: Mutex::new(Vec::new()),
    });
    let mock = Arc::new(MockSyncTransport::new("remote", "482913"));
    let storage = Arc::new(Storage::in_memory(SymmetricKey::generate()).unwrap());

    let key = SymmetricKey::generate();
    mock.install_session_key(key.clone());
    let trusted = TrustedDevice {
        device_id: "remote".into(),
        fingerprint: Fingerprint::from_der(b"mock certificate v1"),
        session_key: key,
        trusted_at: 0,
        expires_at: u64::MAX,
    };
    let engine = TransferEngine::new(
        Arc::clone(&catalog) as _,
        Arc::clone(&mock) as _,
        Arc::clone(&storage),
        Arc::new(NewerWins),
        &config,
    );

    // Local content is newer for book-l, remote content for book-r
    let mut local_l = book("book-l", "Kept Title", 20);
    local_l.state.progress_percent = 70;
    catalog.inner.apply_item(local_l).await.unwrap();
    catalog.inner.apply_item(book("book-r", "Old Title", 10)).await.unwrap();

    let mut remote_l = book("book-l", "Stale Title", 10);
    remote_l.state.bookmarked = true;
    mock.seed_items(vec![remote_l, book("book-r", "Fresh Title", 20)]);

    let local = catalog.manifest().await.unwrap();
    let remote = mock.fetch_manifest("remote").await.unwrap();
    let plan = diff_manifests(&local, &remote);

    let mut session = SyncSession::new("remote");
    let (tx, _rx) = progress_channel();
    engine.run(&mut session, &trusted, &plan, &tx).await.unwrap();
    assert_eq!(session.status, SyncStatus::Completed);

    // book-l kept its content and only had its reading state merged;
    // book-r was replaced by the newer remote version.
    assert_eq!(*catalog.state_merged.lock().unwrap(), vec!["book-l".to_string()]);
    assert_eq!(*catalog.replaced.lock().unwrap(), vec!["book-r".to_string()]);

    let kept = catalog.get_item("book-l").await.unwrap().unwrap();
    assert_eq!(kept.title, "Kept Title");
    assert!(kept.state.bookmarked);
    assert_eq!(kept.state.progress_percent, 70);

    // Both merged results were pushed back so the remote converges too
    assert_eq!(mock.remote_item("book-l").unwrap().title, "Kept Title");
    assert_eq!(mock.remote_item("book-r").unwrap().title, "Fresh Title");
}
