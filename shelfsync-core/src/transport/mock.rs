// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock Sync Transport
//!
//! In-memory stand-in for a remote device. Speaks the real pairing
//! protocol (PIN proof verification, session key derivation) against an
//! in-memory remote library, with fault injection knobs for dropped
//! connections, per-item failures, mid-transfer interruptions, certificate
//! rotation, and frame tampering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::{ManifestEntry, SyncableItem};
use crate::config::PROTOCOL_VERSION;
use crate::crypto::SymmetricKey;
use crate::discovery::DeviceInfo;
use crate::error::{SyncError, SyncResult};
use crate::trust::proof::{self, PinKey};

use super::{
    HelloResponse, ItemFrame, PairingChallenge, PairingRequest, PairingResponse, SyncTransport,
};

#[derive(Default)]
struct Faults {
    /// Next n transport calls fail with `ConnectionFailed`.
    connection_failures: u32,
    /// Remaining `TransferFailed` responses per item id.
    item_failures: HashMap<String, u32>,
    /// Items whose frames are corrupted in flight.
    tampered: HashSet<String>,
    /// Drop the connection at the n-th item operation, then fail the
    /// following `.1` calls as well.
    interrupt_at_op: Option<(u64, u32)>,
}

#[derive(Default)]
struct CallCounts {
    hello: u64,
    pair: u64,
    item_ops: u64,
}

/// A fake remote device for tests.
pub struct MockSyncTransport {
    device_id: String,
    pin: Mutex<String>,
    certificate_der: Mutex<Vec<u8>>,
    protocol_version: Mutex<u32>,
    items: Mutex<BTreeMap<String, SyncableItem>>,
    session_key: Mutex<Option<SymmetricKey>>,
    challenge: Mutex<Option<PairingChallenge>>,
    faults: Mutex<Faults>,
    counts: Mutex<CallCounts>,
    response_delay: Mutex<Duration>,
}

impl MockSyncTransport {
    /// Creates a mock remote with the given id and pairing PIN.
    pub fn new(device_id: impl Into<String>, pin: impl Into<String>) -> Self {
        MockSyncTransport {
            device_id: device_id.into(),
            pin: Mutex::new(pin.into()),
            certificate_der: Mutex::new(b"mock certificate v1".to_vec()),
            protocol_version: Mutex::new(PROTOCOL_VERSION),
            items: Mutex::new(BTreeMap::new()),
            session_key: Mutex::new(None),
            challenge: Mutex::new(None),
            faults: Mutex::new(Faults::default()),
            counts: Mutex::new(CallCounts::default()),
            response_delay: Mutex::new(Duration::ZERO),
        }
    }

    // === Remote library ===

    /// Seeds the remote library with items.
    pub fn seed_items(&self, items: Vec<SyncableItem>) {
        let mut map = self.items.lock().unwrap();
        for item in items {
            map.insert(item.id.clone(), item);
        }
    }

    /// Returns a remote item by id.
    pub fn remote_item(&self, item_id: &str) -> Option<SyncableItem> {
        self.items.lock().unwrap().get(item_id).cloned()
    }

    /// Number of items in the remote library.
    pub fn remote_item_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    // === Trust knobs ===

    /// Replaces the remote certificate, simulating rotation or a
    /// different device answering on the same address.
    pub fn rotate_certificate(&self, der: &[u8]) {
        *self.certificate_der.lock().unwrap() = der.to_vec();
    }

    /// Current certificate bytes.
    pub fn certificate(&self) -> Vec<u8> {
        self.certificate_der.lock().unwrap().clone()
    }

    /// Changes the PIN the remote expects.
    pub fn set_pin(&self, pin: impl Into<String>) {
        *self.pin.lock().unwrap() = pin.into();
    }

    /// Pretends the remote speaks a different protocol version.
    pub fn set_protocol_version(&self, version: u32) {
        *self.protocol_version.lock().unwrap() = version;
    }

    /// Installs a session key directly, as if pairing had happened
    /// earlier. Lets tests exercise the re-sync path without a handshake.
    pub fn install_session_key(&self, key: SymmetricKey) {
        *self.session_key.lock().unwrap() = Some(key);
    }

    /// The session key agreed in the last successful pairing.
    pub fn session_key(&self) -> Option<SymmetricKey> {
        self.session_key.lock().unwrap().clone()
    }

    // === Fault knobs ===

    /// Fails the next `n` transport calls with `ConnectionFailed`.
    pub fn fail_connections(&self, n: u32) {
        self.faults.lock().unwrap().connection_failures = n;
    }

    /// Fails the next `times` fetches or pushes of `item_id` with
    /// `TransferFailed`.
    pub fn fail_item(&self, item_id: impl Into<String>, times: u32) {
        self.faults
            .lock()
            .unwrap()
            .item_failures
            .insert(item_id.into(), times);
    }

    /// Corrupts frames carrying `item_id`, simulating tampering in flight.
    pub fn tamper_item(&self, item_id: impl Into<String>) {
        self.faults.lock().unwrap().tampered.insert(item_id.into());
    }

    /// Drops the connection once, right before the `n`-th item operation
    /// (fetch or push, counted from 1 across the whole test).
    pub fn interrupt_at_op(&self, n: u64) {
        self.faults.lock().unwrap().interrupt_at_op = Some((n, 0));
    }

    /// Like [`interrupt_at_op`], but the connection stays down for the
    /// next `failures` calls after the drop.
    ///
    /// [`interrupt_at_op`]: MockSyncTransport::interrupt_at_op
    pub fn drop_connection_at_op(&self, n: u64, failures: u32) {
        self.faults.lock().unwrap().interrupt_at_op = Some((n, failures));
    }

    /// Delays every response by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock().unwrap() = delay;
    }

    // === Introspection ===

    /// Number of hello calls seen.
    pub fn hello_calls(&self) -> u64 {
        self.counts.lock().unwrap().hello
    }

    /// Number of pairing attempts seen.
    pub fn pair_calls(&self) -> u64 {
        self.counts.lock().unwrap().pair
    }

    async fn delay(&self) {
        let delay = *self.response_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_connection(&self) -> SyncResult<()> {
        let mut faults = self.faults.lock().unwrap();
        if faults.connection_failures > 0 {
            faults.connection_failures -= 1;
            return Err(SyncError::ConnectionFailed("simulated drop".into()));
        }
        Ok(())
    }

    fn check_item_op(&self, item_id: &str) -> SyncResult<()> {
        let op_number = {
            let mut counts = self.counts.lock().unwrap();
            counts.item_ops += 1;
            counts.item_ops
        };

        let mut faults = self.faults.lock().unwrap();
        if let Some((at_op, failures)) = faults.interrupt_at_op {
            if at_op == op_number {
                faults.interrupt_at_op = None;
                faults.connection_failures =
                    faults.connection_failures.saturating_add(failures);
                return Err(SyncError::ConnectionFailed(
                    "simulated mid-transfer interruption".into(),
                ));
            }
        }
        if let Some(remaining) = faults.item_failures.get_mut(item_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::TransferFailed(format!(
                    "simulated failure for {item_id}"
                )));
            }
        }
        Ok(())
    }

    fn current_key(&self) -> SyncResult<SymmetricKey> {
        self.session_key
            .lock()
            .unwrap()
            .clone()
            .ok_or(SyncError::AuthenticationFailed)
    }
}

#[async_trait]
impl SyncTransport for MockSyncTransport {
    async fn hello(&self, _device: &DeviceInfo) -> SyncResult<HelloResponse> {
        self.delay().await;
        self.counts.lock().unwrap().hello += 1;
        self.check_connection()?;

        Ok(HelloResponse {
            device_id: self.device_id.clone(),
            protocol_version: *self.protocol_version.lock().unwrap(),
            app_version: "2.0.0-mock".into(),
            certificate_der: self.certificate(),
        })
    }

    async fn pair_challenge(&self, _device: &DeviceInfo) -> SyncResult<PairingChallenge> {
        self.delay().await;
        self.check_connection()?;

        let challenge = PairingChallenge {
            nonce: proof::random_nonce(),
            salt: proof::random_salt(),
        };
        *self.challenge.lock().unwrap() = Some(challenge.clone());
        Ok(challenge)
    }

    async fn pair(
        &self,
        _device: &DeviceInfo,
        request: PairingRequest,
    ) -> SyncResult<PairingResponse> {
        self.delay().await;
        self.counts.lock().unwrap().pair += 1;
        self.check_connection()?;

        let challenge = self
            .challenge
            .lock()
            .unwrap()
            .clone()
            .ok_or(SyncError::AuthenticationFailed)?;

        let pin_key = PinKey::derive(&self.pin.lock().unwrap(), &challenge.salt);
        if !pin_key.verify(&challenge.nonce, &request.proof) {
            return Err(SyncError::AuthenticationFailed);
        }

        let responder_nonce = proof::random_nonce();
        let session_key = pin_key.derive_session_key(
            &challenge.nonce,
            &request.initiator_nonce,
            &responder_nonce,
        );
        *self.session_key.lock().unwrap() = Some(session_key);

        Ok(PairingResponse {
            certificate_der: self.certificate(),
            responder_nonce,
            app_version: "2.0.0-mock".into(),
            protocol_version: *self.protocol_version.lock().unwrap(),
        })
    }

    async fn fetch_manifest(&self, _device_id: &str) -> SyncResult<Vec<ManifestEntry>> {
        self.delay().await;
        self.check_connection()?;

        let items = self.items.lock().unwrap();
        Ok(items.values().map(SyncableItem::manifest_entry).collect())
    }

    async fn fetch_item(&self, _device_id: &str, item_id: &str) -> SyncResult<ItemFrame> {
        self.delay().await;
        self.check_connection()?;
        self.check_item_op(item_id)?;

        let key = self.current_key()?;
        let item = self
            .items
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| SyncError::TransferFailed(format!("no such remote item {item_id}")))?;

        let mut ciphertext = super::seal_item(&key, &item)?;
        if self.faults.lock().unwrap().tampered.contains(item_id) {
            let mid = ciphertext.len() / 2;
            ciphertext[mid] ^= 0x55;
        }

        Ok(ItemFrame {
            item_id: item_id.to_string(),
            index: 0,
            ciphertext,
        })
    }

    async fn push_item(&self, _device_id: &str, frame: ItemFrame) -> SyncResult<()> {
        self.delay().await;
        self.check_connection()?;
        self.check_item_op(&frame.item_id)?;

        let key = self.current_key()?;
        let item = super::open_item(&key, &frame.ciphertext)?;
        self.items.lock().unwrap().insert(item.id.clone(), item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_id: "remote".into(),
            device_name: "Remote".into(),
            device_kind: crate::discovery::DeviceKind::Tablet,
            app_version: "2.0.0".into(),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8963,
            last_seen: 0,
        }
    }

    #[tokio::test]
    async fn test_pairing_handshake_agrees_on_key() {
        let mock = MockSyncTransport::new("remote", "482913");

        let challenge = mock.pair_challenge(&device()).await.unwrap();
        let pin_key = PinKey::derive("482913", &challenge.salt);
        let initiator_nonce = proof::random_nonce();

        let response = mock
            .pair(
                &device(),
                PairingRequest {
                    device_id: "local".into(),
                    proof: pin_key.prove(&challenge.nonce),
                    initiator_nonce,
                },
            )
            .await
            .unwrap();

        let local_key = pin_key.derive_session_key(
            &challenge.nonce,
            &initiator_nonce,
            &response.responder_nonce,
        );
        assert_eq!(
            local_key.as_bytes(),
            mock.session_key().unwrap().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_wrong_pin_is_rejected() {
        let mock = MockSyncTransport::new("remote", "482913");

        let challenge = mock.pair_challenge(&device()).await.unwrap();
        let pin_key = PinKey::derive("000000", &challenge.salt);

        let result = mock
            .pair(
                &device(),
                PairingRequest {
                    device_id: "local".into(),
                    proof: pin_key.prove(&challenge.nonce),
                    initiator_nonce: proof::random_nonce(),
                },
            )
            .await;
        assert!(matches!(result, Err(SyncError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_push_and_fetch_roundtrip() {
        let mock = MockSyncTransport::new("remote", "482913");
        let key = SymmetricKey::generate();
        mock.install_session_key(key.clone());

        let item = SyncableItem::new("book-1", ItemKind::Book, "Dune", 7);
        let frame = ItemFrame {
            item_id: item.id.clone(),
            index: 0,
            ciphertext: crate::transport::seal_item(&key, &item).unwrap(),
        };
        mock.push_item("remote", frame).await.unwrap();
        assert_eq!(mock.remote_item("book-1").unwrap().title, "Dune");

        let fetched = mock.fetch_item("remote", "book-1").await.unwrap();
        let opened = crate::transport::open_item(&key, &fetched.ciphertext).unwrap();
        assert_eq!(opened, item);
    }

    #[tokio::test]
    async fn test_fault_knobs() {
        let mock = MockSyncTransport::new("remote", "482913");
        mock.install_session_key(SymmetricKey::generate());
        mock.seed_items(vec![SyncableItem::new("book-1", ItemKind::Book, "Dune", 7)]);

        mock.fail_connections(1);
        assert!(matches!(
            mock.hello(&device()).await,
            Err(SyncError::ConnectionFailed(_))
        ));
        assert!(mock.hello(&device()).await.is_ok());

        mock.fail_item("book-1", 2);
        assert!(mock.fetch_item("remote", "book-1").await.is_err());
        assert!(mock.fetch_item("remote", "book-1").await.is_err());
        assert!(mock.fetch_item("remote", "book-1").await.is_ok());

        mock.tamper_item("book-1");
        let frame = mock.fetch_item("remote", "book-1").await.unwrap();
        let key = mock.session_key().unwrap();
        assert!(matches!(
            crate::transport::open_item(&key, &frame.ciphertext),
            Err(SyncError::SecurityViolation(_))
        ));
    }
}
