// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device Trust Module
//!
//! Pairing and trust lifecycle: PIN-authenticated handshakes, certificate
//! pinning, lockout after repeated bad PINs, and trust expiry. Paired
//! devices share a session key derived during the handshake; the key never
//! crosses the wire.

#[cfg(feature = "testing")]
pub mod manager;
#[cfg(not(feature = "testing"))]
mod manager;

#[cfg(feature = "testing")]
pub mod pinning;
#[cfg(not(feature = "testing"))]
mod pinning;

pub mod proof;

pub use manager::{TrustManager, TrustedDevice};
pub use pinning::Fingerprint;

use crate::crypto::SymmetricKey;

/// Persistent record of an established pairing.
#[derive(Debug, Clone)]
pub struct TrustRecord {
    /// Trusted device id.
    pub device_id: String,
    /// Pinned certificate fingerprint.
    pub fingerprint: Fingerprint,
    /// Session key shared with the device.
    pub session_key: SymmetricKey,
    /// Unix timestamp (milliseconds) when pairing completed.
    pub trusted_at: u64,
    /// Unix timestamp (milliseconds) after which trust must be
    /// re-established by pairing again.
    pub expires_at: u64,
}

impl TrustRecord {
    /// Returns true if the record has passed its expiry time.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at
    }
}
