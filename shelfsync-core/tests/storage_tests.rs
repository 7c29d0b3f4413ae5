// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage persistence tests: trust records, checkpoints, and session
//! history surviving a database reopen.

use shelfsync_core::{
    Fingerprint, Storage, SymmetricKey, SyncSession, SyncStatus, TransferCheckpoint, TrustRecord,
};

#[test]
fn everything_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shelfsync.db");
    let storage_key = SymmetricKey::generate();

    let session_key = SymmetricKey::generate();
    let session = {
        let storage = Storage::open(&path, storage_key.clone()).unwrap();

        storage
            .save_trust_record(&TrustRecord {
                device_id: "tablet".into(),
                fingerprint: Fingerprint::from_der(b"tablet certificate"),
                session_key: session_key.clone(),
                trusted_at: 1_000,
                expires_at: 9_000,
            })
            .unwrap();

        storage
            .save_checkpoint(&TransferCheckpoint {
                device_id: "tablet".into(),
                plan_fingerprint: "plan-1".into(),
                next_index: 4,
                completed_items: 3,
                failed_items: vec!["book-9".into()],
                conflicts: vec![],
                retry_count: 5,
            })
            .unwrap();

        let mut session = SyncSession::new("tablet");
        session.total_items = 8;
        session.completed_items = 8;
        session.finish(SyncStatus::Completed);
        storage.save_session(&session).unwrap();
        session
    };

    // Reopen with the same key and read everything back
    let storage = Storage::open(&path, storage_key).unwrap();

    let record = storage.load_trust_record("tablet").unwrap().unwrap();
    assert_eq!(record.fingerprint, Fingerprint::from_der(b"tablet certificate"));
    assert_eq!(record.session_key.as_bytes(), session_key.as_bytes());
    assert_eq!(record.expires_at, 9_000);

    let checkpoint = storage.load_checkpoint("tablet").unwrap().unwrap();
    assert_eq!(checkpoint.next_index, 4);
    assert_eq!(checkpoint.failed_items, vec!["book-9".to_string()]);

    let history = storage.session_history("tablet", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, session.id);
    assert_eq!(history[0].status, SyncStatus::Completed);
}

#[test]
fn wrong_storage_key_cannot_decrypt_session_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shelfsync.db");

    {
        let storage = Storage::open(&path, SymmetricKey::generate()).unwrap();
        storage
            .save_trust_record(&TrustRecord {
                device_id: "tablet".into(),
                fingerprint: Fingerprint::from_der(b"cert"),
                session_key: SymmetricKey::generate(),
                trusted_at: 0,
                expires_at: 1,
            })
            .unwrap();
    }

    let storage = Storage::open(&path, SymmetricKey::generate()).unwrap();
    assert!(storage.load_trust_record("tablet").is_err());
}
