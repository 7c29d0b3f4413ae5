// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Engine Configuration
//!
//! Every timeout, retry bound, and protocol knob of the sync engine is
//! configurable here; nothing is hardcoded at the call sites.

use std::time::Duration;

/// Protocol version spoken by this build.
///
/// Peers with a different version are rejected during planning with
/// `SyncError::IncompatibleVersion`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// UDP port used for discovery beacons.
    pub discovery_port: u16,
    /// Interval between outgoing discovery beacons.
    pub beacon_interval: Duration,
    /// Devices not re-announced within this window are evicted.
    pub discovery_timeout: Duration,
    /// Maximum time to wait for the remote to answer a pairing handshake.
    pub pairing_timeout: Duration,
    /// Consecutive failed PIN attempts before lockout.
    pub max_pin_attempts: u32,
    /// Lockout clears after this much time without attempts.
    pub pin_lockout_window: Duration,
    /// How long established trust remains valid.
    pub trust_lifetime: Duration,
    /// Per-item transfer retry bound (transient failures).
    pub item_retry_limit: u32,
    /// Whole-operation retry bound (connection-scoped failures).
    pub operation_retry_limit: u32,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
    /// Overall sync timeout; exceeding it aborts the transfer.
    pub sync_timeout: Duration,
    /// Items per transfer batch for large plans.
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            discovery_port: 8963,
            beacon_interval: Duration::from_secs(2),
            discovery_timeout: Duration::from_secs(10),
            pairing_timeout: Duration::from_secs(30),
            max_pin_attempts: 3,
            pin_lockout_window: Duration::from_secs(300),
            trust_lifetime: Duration::from_secs(30 * 24 * 60 * 60),
            item_retry_limit: 3,
            operation_retry_limit: 5,
            backoff_base: Duration::from_millis(100),
            sync_timeout: Duration::from_secs(600),
            batch_size: 100,
        }
    }
}

impl SyncConfig {
    /// A configuration with short timeouts and delays, for tests.
    pub fn fast() -> Self {
        SyncConfig {
            beacon_interval: Duration::from_millis(50),
            discovery_timeout: Duration::from_millis(300),
            pairing_timeout: Duration::from_millis(500),
            pin_lockout_window: Duration::from_secs(60),
            backoff_base: Duration::from_millis(10),
            sync_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }
}
