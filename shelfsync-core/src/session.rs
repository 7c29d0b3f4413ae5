// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Session Model
//!
//! A session records one sync attempt with one device: the state machine
//! position, item counts, failures and conflicts, and resume bookkeeping.
//! Progress is published to observers as typed [`SyncProgress`] snapshots
//! over a watch channel rather than callbacks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discovery::now_millis;

/// Position of a session in the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No sync in progress.
    Idle,
    /// Locating the device on the network.
    Discovering,
    /// Establishing or verifying trust.
    Pairing,
    /// Exchanging manifests and computing the plan.
    Planning,
    /// Items in flight.
    Transferring,
    /// All planned items transferred.
    Completed,
    /// Some items transferred, some exhausted their retries.
    CompletedWithErrors,
    /// The session ended without transferring its plan.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl SyncStatus {
    /// Returns true for states no session ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed
                | SyncStatus::CompletedWithErrors
                | SyncStatus::Failed
                | SyncStatus::Cancelled
        )
    }
}

/// One sync attempt with one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    /// Unique session id.
    pub id: String,
    /// The remote device this session syncs with.
    pub device_id: String,
    /// Current state machine position.
    pub status: SyncStatus,
    /// Total items in the plan (sends + receives).
    pub total_items: usize,
    /// Items transferred successfully so far.
    pub completed_items: usize,
    /// Ids of items that exhausted their per-item retries.
    pub failed_items: Vec<String>,
    /// Ids of items both sides modified, resolved by merge.
    pub conflicts: Vec<String>,
    /// Items this device will send.
    pub items_to_send: usize,
    /// Items this device will receive.
    pub items_to_receive: usize,
    /// Total per-item retries spent across the session.
    pub retry_count: u32,
    /// True if this session resumed from a checkpoint.
    pub was_resumed: bool,
    /// Plan index the session resumed from, if it resumed.
    pub resumed_from_item: Option<usize>,
    /// Unix timestamp (milliseconds) when the session started.
    pub started_at: u64,
    /// Unix timestamp (milliseconds) when the session reached a terminal
    /// state.
    pub completed_at: Option<u64>,
    /// Human-readable failure summary for `Failed` sessions.
    pub error: Option<String>,
}

impl SyncSession {
    /// Creates a fresh idle session for the given device.
    pub fn new(device_id: impl Into<String>) -> Self {
        SyncSession {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            status: SyncStatus::Idle,
            total_items: 0,
            completed_items: 0,
            failed_items: Vec::new(),
            conflicts: Vec::new(),
            items_to_send: 0,
            items_to_receive: 0,
            retry_count: 0,
            was_resumed: false,
            resumed_from_item: None,
            started_at: now_millis(),
            completed_at: None,
            error: None,
        }
    }

    /// Moves the session into a terminal state and stamps the completion
    /// time. Later transitions are ignored; terminal states are final.
    pub fn finish(&mut self, status: SyncStatus) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(now_millis());
    }

    /// Returns the progress snapshot for this session.
    pub fn progress(&self) -> SyncProgress {
        SyncProgress {
            session_id: self.id.clone(),
            device_id: self.device_id.clone(),
            status: self.status,
            total_items: self.total_items,
            completed_items: self.completed_items,
            failed_items: self.failed_items.len(),
            percent: self.percent(),
        }
    }

    /// Integer progress in percent. An empty completed plan is 100%.
    fn percent(&self) -> u8 {
        if self.total_items == 0 {
            return if self.status.is_terminal() { 100 } else { 0 };
        }
        let done = self.completed_items + self.failed_items.len();
        ((done * 100) / self.total_items).min(100) as u8
    }
}

/// Observable progress snapshot published over a watch channel.
///
/// Observers always see the latest snapshot; a slow observer misses
/// intermediate states, never blocks the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Session this snapshot belongs to.
    pub session_id: String,
    /// Remote device id.
    pub device_id: String,
    /// State machine position at snapshot time.
    pub status: SyncStatus,
    /// Total planned items.
    pub total_items: usize,
    /// Items transferred so far.
    pub completed_items: usize,
    /// Items that exhausted retries so far.
    pub failed_items: usize,
    /// Integer progress, 0 to 100.
    pub percent: u8,
}

impl SyncProgress {
    /// An idle snapshot for a device with no session yet.
    pub fn idle(device_id: impl Into<String>) -> Self {
        SyncProgress {
            session_id: String::new(),
            device_id: device_id.into(),
            status: SyncStatus::Idle,
            total_items: 0,
            completed_items: 0,
            failed_items: 0,
            percent: 0,
        }
    }
}
