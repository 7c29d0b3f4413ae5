// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Transport Layer
//!
//! Platform-agnostic abstraction for the authenticated channel between
//! two paired devices, plus the wire messages it carries. Real LAN use
//! goes through [`tcp::TcpSyncTransport`]; tests use
//! [`mock::MockSyncTransport`], a fault-injection harness.
//!
//! Item payloads are serialized, deflate-compressed, then encrypted with
//! the pairing session key before framing ([`seal_item`] / [`open_item`]).

pub mod mock;
pub mod tcp;

use std::io::{Read, Write};

use async_trait::async_trait;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::catalog::{ManifestEntry, SyncableItem};
use crate::crypto::{self, EncryptionError, SymmetricKey};
use crate::discovery::DeviceInfo;
use crate::error::{SyncError, SyncResult};

/// Greeting exchanged before any protected operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    /// Remote device id.
    pub device_id: String,
    /// Protocol version the remote speaks.
    pub protocol_version: u32,
    /// App version running on the remote.
    pub app_version: String,
    /// Remote's DER-encoded certificate, to be pinned on pairing.
    pub certificate_der: Vec<u8>,
}

/// Challenge issued by the remote at the start of a pairing handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingChallenge {
    /// Random nonce the PIN proof is computed over.
    pub nonce: [u8; 32],
    /// Salt for deriving the proof key from the PIN.
    pub salt: [u8; 16],
}

/// PIN-derived proof sent to the remote to complete pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    /// Initiating device id.
    pub device_id: String,
    /// HMAC proof over the challenge nonce (see `trust::proof`).
    pub proof: [u8; 32],
    /// Initiator nonce, mixed into the session key derivation.
    pub initiator_nonce: [u8; 32],
}

/// Successful pairing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingResponse {
    /// Remote's DER-encoded certificate (pinned by the trust manager).
    pub certificate_der: Vec<u8>,
    /// Responder nonce, mixed into the session key derivation.
    pub responder_nonce: [u8; 32],
    /// App version running on the remote.
    pub app_version: String,
    /// Protocol version the remote speaks.
    pub protocol_version: u32,
}

/// One encrypted item in transit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFrame {
    /// Stable item id.
    pub item_id: String,
    /// Position of this item in the deterministic plan order.
    pub index: u64,
    /// Sealed payload: encrypted, compressed, serialized item.
    pub ciphertext: Vec<u8>,
}

/// The authenticated channel to remote devices.
///
/// One transport instance serves all devices; operations are addressed
/// by device. Implementations must be safe for concurrent use by
/// independent device sessions.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Greets the remote and learns its certificate and versions.
    async fn hello(&self, device: &DeviceInfo) -> SyncResult<HelloResponse>;

    /// Requests a pairing challenge from the remote.
    async fn pair_challenge(&self, device: &DeviceInfo) -> SyncResult<PairingChallenge>;

    /// Submits the PIN proof and completes the pairing handshake.
    async fn pair(&self, device: &DeviceInfo, request: PairingRequest)
        -> SyncResult<PairingResponse>;

    /// Fetches the remote library manifest, sorted by item id.
    async fn fetch_manifest(&self, device_id: &str) -> SyncResult<Vec<ManifestEntry>>;

    /// Fetches one sealed item from the remote.
    async fn fetch_item(&self, device_id: &str, item_id: &str) -> SyncResult<ItemFrame>;

    /// Pushes one sealed item to the remote.
    async fn push_item(&self, device_id: &str, frame: ItemFrame) -> SyncResult<()>;
}

/// Seals an item for transfer: serialize, compress, encrypt.
pub fn seal_item(key: &SymmetricKey, item: &SyncableItem) -> SyncResult<Vec<u8>> {
    let serialized = serde_json::to_vec(item)
        .map_err(|e| SyncError::TransferFailed(format!("serialize item: {e}")))?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serialized)
        .and_then(|_| encoder.finish())
        .map_err(|e| SyncError::TransferFailed(format!("compress item: {e}")))
        .and_then(|compressed| Ok(crypto::encrypt(key, &compressed)?))
}

/// Opens a sealed item: decrypt, decompress, deserialize.
///
/// A failed decryption means the frame was tampered with in transit and
/// maps to `SecurityViolation`; malformed plaintext after a successful
/// decryption is a transfer failure.
pub fn open_item(key: &SymmetricKey, ciphertext: &[u8]) -> SyncResult<SyncableItem> {
    let compressed = crypto::decrypt(key, ciphertext).map_err(|e| match e {
        EncryptionError::DecryptionFailed => {
            SyncError::SecurityViolation("item payload failed authentication".into())
        }
        other => SyncError::Encryption(other),
    })?;

    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut serialized = Vec::new();
    decoder
        .read_to_end(&mut serialized)
        .map_err(|e| SyncError::TransferFailed(format!("decompress item: {e}")))?;

    serde_json::from_slice(&serialized)
        .map_err(|e| SyncError::TransferFailed(format!("deserialize item: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemKind;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SymmetricKey::generate();
        let mut item = SyncableItem::new("book-1", ItemKind::Book, "Dune", 42);
        item.payload = serde_json::json!({ "author": "Frank Herbert" });
        item.children
            .push(SyncableItem::new("ch-1", ItemKind::Chapter, "Chapter 1", 42));

        let sealed = seal_item(&key, &item).unwrap();
        let opened = open_item(&key, &sealed).unwrap();
        assert_eq!(opened, item);
    }

    #[test]
    fn test_open_tampered_frame_is_security_violation() {
        let key = SymmetricKey::generate();
        let item = SyncableItem::new("book-1", ItemKind::Book, "Dune", 42);

        let mut sealed = seal_item(&key, &item).unwrap();
        let mid = sealed.len() / 2;
        sealed[mid] ^= 0x55;

        assert!(matches!(
            open_item(&key, &sealed),
            Err(SyncError::SecurityViolation(_))
        ));
    }

    #[test]
    fn test_open_with_wrong_key_is_security_violation() {
        let key = SymmetricKey::generate();
        let wrong = SymmetricKey::generate();
        let item = SyncableItem::new("book-1", ItemKind::Book, "Dune", 42);

        let sealed = seal_item(&key, &item).unwrap();
        assert!(matches!(
            open_item(&wrong, &sealed),
            Err(SyncError::SecurityViolation(_))
        ));
    }
}
