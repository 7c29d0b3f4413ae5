// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transfer checkpoint storage operations.
//!
//! One checkpoint row per device, updated after every finalized item so an
//! interrupted transfer can resume instead of starting over. A checkpoint
//! is only honored if its plan fingerprint still matches the freshly
//! computed plan.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{Storage, StorageError};
use crate::discovery::now_millis;

/// Resume state for an interrupted transfer with one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCheckpoint {
    /// Remote device the transfer was with.
    pub device_id: String,
    /// Fingerprint of the plan this checkpoint belongs to.
    pub plan_fingerprint: String,
    /// Index of the next plan operation to execute.
    pub next_index: usize,
    /// Items transferred before the interruption.
    pub completed_items: usize,
    /// Items that exhausted retries before the interruption.
    pub failed_items: Vec<String>,
    /// Conflicts resolved before the interruption.
    pub conflicts: Vec<String>,
    /// Per-item retries spent before the interruption.
    pub retry_count: u32,
}

impl Storage {
    /// Saves the checkpoint for a device, replacing any previous one.
    pub fn save_checkpoint(&self, checkpoint: &TransferCheckpoint) -> Result<(), StorageError> {
        let json = serde_json::to_string(checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO transfer_checkpoints (device_id, checkpoint_json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![checkpoint.device_id, json, now_millis() as i64],
        )?;
        Ok(())
    }

    /// Loads the checkpoint for a device, if one exists.
    pub fn load_checkpoint(
        &self,
        device_id: &str,
    ) -> Result<Option<TransferCheckpoint>, StorageError> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT checkpoint_json FROM transfer_checkpoints WHERE device_id = ?1",
            params![device_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(json) => {
                let checkpoint = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(checkpoint))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Deletes the checkpoint for a device, if any.
    pub fn delete_checkpoint(&self, device_id: &str) -> Result<(), StorageError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM transfer_checkpoints WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(())
    }
}
