// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! SQLite-backed persistence for trust records, transfer checkpoints, and
//! session history. Session keys are encrypted at rest with an
//! application-level key; everything else is stored in the clear.

#[cfg(feature = "testing")]
pub mod checkpoints;
#[cfg(not(feature = "testing"))]
mod checkpoints;

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod sessions;
#[cfg(not(feature = "testing"))]
mod sessions;

#[cfg(feature = "testing")]
pub mod trust;
#[cfg(not(feature = "testing"))]
mod trust;

pub use checkpoints::TransferCheckpoint;
pub use error::StorageError;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::crypto::SymmetricKey;

/// SQLite-based storage implementation.
///
/// The connection sits behind a mutex so one handle can be shared across
/// concurrent per-device session tasks.
pub struct Storage {
    conn: Mutex<Connection>,
    /// Encryption key for sensitive fields (session keys).
    pub(crate) encryption_key: SymmetricKey,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        encryption_key: SymmetricKey,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Storage {
            conn: Mutex::new(conn),
            encryption_key,
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory(encryption_key: SymmetricKey) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Storage {
            conn: Mutex::new(conn),
            encryption_key,
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Runs all pending schema migrations.
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.lock_conn();
        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS trust_records (
                     device_id        TEXT PRIMARY KEY,
                     fingerprint      TEXT NOT NULL,
                     session_key_enc  BLOB NOT NULL,
                     trusted_at       INTEGER NOT NULL,
                     expires_at       INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS transfer_checkpoints (
                     device_id        TEXT PRIMARY KEY,
                     checkpoint_json  TEXT NOT NULL,
                     updated_at       INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS session_history (
                     session_id       TEXT PRIMARY KEY,
                     device_id        TEXT NOT NULL,
                     started_at       INTEGER NOT NULL,
                     session_json     TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_session_history_device
                     ON session_history (device_id, started_at DESC);
                 PRAGMA user_version = 1;",
            )?;
        }
        Ok(())
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        let conn = self.lock_conn();
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub(crate) fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("storage lock poisoned")
    }
}
