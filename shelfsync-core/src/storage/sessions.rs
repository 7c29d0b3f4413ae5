// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session history storage operations.

use rusqlite::params;

use super::{Storage, StorageError};
use crate::session::SyncSession;

impl Storage {
    /// Saves a finished (or in-flight) session, replacing any previous
    /// snapshot with the same session id.
    pub fn save_session(&self, session: &SyncSession) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO session_history (session_id, device_id, started_at, session_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![session.id, session.device_id, session.started_at as i64, json],
        )?;
        Ok(())
    }

    /// Loads a session by id.
    pub fn load_session(&self, session_id: &str) -> Result<Option<SyncSession>, StorageError> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT session_json FROM session_history WHERE session_id = ?1",
            params![session_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| {
                StorageError::Serialization(e.to_string())
            })?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Returns the most recent sessions for a device, newest first.
    pub fn session_history(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<SyncSession>, StorageError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT session_json FROM session_history
             WHERE device_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![device_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Returns when the last session with a device reached a terminal
    /// state, if any ever did.
    pub fn last_sync_time(&self, device_id: &str) -> Result<Option<u64>, StorageError> {
        Ok(self
            .session_history(device_id, 1)?
            .into_iter()
            .next()
            .and_then(|session| session.completed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricKey;
    use crate::session::SyncStatus;

    #[test]
    fn test_save_and_load_session() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        let mut session = SyncSession::new("device-1");
        session.total_items = 12;
        session.finish(SyncStatus::Completed);
        storage.save_session(&session).unwrap();

        let loaded = storage.load_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SyncStatus::Completed);
        assert_eq!(loaded.total_items, 12);
    }

    #[test]
    fn test_history_is_newest_first_and_limited() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        for i in 0..5 {
            let mut session = SyncSession::new("device-1");
            session.started_at = 1_000 + i;
            storage.save_session(&session).unwrap();
        }
        // A different device's session is not included
        storage.save_session(&SyncSession::new("device-2")).unwrap();

        let history = storage.session_history("device-1", 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].started_at, 1_004);
        assert!(history.windows(2).all(|w| w[0].started_at >= w[1].started_at));
    }

    #[test]
    fn test_last_sync_time() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        assert!(storage.last_sync_time("device-1").unwrap().is_none());

        let mut session = SyncSession::new("device-1");
        session.finish(SyncStatus::Completed);
        storage.save_session(&session).unwrap();

        assert_eq!(
            storage.last_sync_time("device-1").unwrap(),
            session.completed_at
        );
    }

    #[test]
    fn test_resave_updates_in_place() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        let mut session = SyncSession::new("device-1");
        storage.save_session(&session).unwrap();

        session.completed_items = 9;
        session.finish(SyncStatus::CompletedWithErrors);
        storage.save_session(&session).unwrap();

        let history = storage.session_history("device-1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].completed_items, 9);
    }
}
