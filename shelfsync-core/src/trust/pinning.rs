// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Certificate Pinning
//!
//! On first pairing the remote's certificate fingerprint is pinned; every
//! later connection must present a certificate with the same fingerprint.
//! A changed fingerprint is treated as a possible impersonation and fails
//! closed until the user explicitly re-pairs.

use ring::digest;
use serde::{Deserialize, Serialize};

/// SHA-256 fingerprint of a DER-encoded certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Self {
        let hash = digest::digest(&digest::SHA256, der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(hash.as_ref());
        Fingerprint(bytes)
    }

    /// Parses a fingerprint from its hex form.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Fingerprint(bytes))
    }

    /// Returns the fingerprint as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Shortened form for logs; full hex via to_hex()
        write!(f, "{}", &self.to_hex()[..16])
    }
}
