// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! TCP Sync Transport
//!
//! LAN transport: one length-prefixed bincode request/response per
//! connection. The client side resolves device addresses from the
//! `DeviceInfo` it is handed during hello and pairing, then reuses the
//! cached address for item operations addressed by device id.
//!
//! The listener side answers the same protocol for a local library:
//! pairing challenges while a PIN is displayed, then manifest and item
//! operations under the agreed session key.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::catalog::{CatalogSource, ManifestEntry, SyncableItem};
use crate::config::PROTOCOL_VERSION;
use crate::crypto::SymmetricKey;
use crate::discovery::DeviceInfo;
use crate::error::{SyncError, SyncResult};
use crate::trust::proof::{self, PinKey};

use super::{
    HelloResponse, ItemFrame, PairingChallenge, PairingRequest, PairingResponse, SyncTransport,
};

/// Upper bound on a single protocol frame.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    Hello,
    PairChallenge,
    Pair(PairingRequest),
    FetchManifest,
    FetchItem { item_id: String },
    PushItem(ItemFrame),
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Hello(HelloResponse),
    PairChallenge(PairingChallenge),
    Pair(PairingResponse),
    Manifest(Vec<ManifestEntry>),
    Item(ItemFrame),
    Ack,
    Error(WireError),
}

/// Errors that survive the wire without losing their category.
#[derive(Debug, Serialize, Deserialize)]
enum WireError {
    AuthenticationFailed,
    TooManyAttempts,
    NotFound(String),
    Other(String),
}

impl From<WireError> for SyncError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::AuthenticationFailed => SyncError::AuthenticationFailed,
            WireError::TooManyAttempts => SyncError::TooManyAttempts,
            WireError::NotFound(what) => SyncError::TransferFailed(format!("not found: {what}")),
            WireError::Other(msg) => SyncError::TransferFailed(msg),
        }
    }
}

impl From<&SyncError> for WireError {
    fn from(e: &SyncError) -> Self {
        match e {
            SyncError::AuthenticationFailed => WireError::AuthenticationFailed,
            SyncError::TooManyAttempts => WireError::TooManyAttempts,
            other => WireError::Other(other.to_string()),
        }
    }
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, message: &T) -> SyncResult<()> {
    let payload = bincode::serialize(message)
        .map_err(|e| SyncError::TransferFailed(format!("encode frame: {e}")))?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::TransferFailed("frame too large".into()));
    }

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("write frame: {e}")))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("write frame: {e}")))?;
    Ok(())
}

async fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> SyncResult<T> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("read frame: {e}")))?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::TransferFailed("frame too large".into()));
    }

    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("read frame: {e}")))?;
    bincode::deserialize(&payload)
        .map_err(|e| SyncError::TransferFailed(format!("decode frame: {e}")))
}

/// TCP client transport. One connection per request.
pub struct TcpSyncTransport {
    addresses: Mutex<HashMap<String, SocketAddr>>,
}

impl TcpSyncTransport {
    /// Creates an empty client transport.
    pub fn new() -> Self {
        TcpSyncTransport {
            addresses: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, device: &DeviceInfo) -> SocketAddr {
        let addr = SocketAddr::new(device.address, device.port);
        self.addresses
            .lock()
            .expect("address lock poisoned")
            .insert(device.device_id.clone(), addr);
        addr
    }

    fn resolve(&self, device_id: &str) -> SyncResult<SocketAddr> {
        self.addresses
            .lock()
            .expect("address lock poisoned")
            .get(device_id)
            .copied()
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))
    }

    async fn round_trip(&self, addr: SocketAddr, request: Request) -> SyncResult<Response> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("connect {addr}: {e}")))?;
        write_frame(&mut stream, &request).await?;
        let response = read_frame(&mut stream).await?;
        if let Response::Error(wire) = response {
            return Err(wire.into());
        }
        Ok(response)
    }
}

impl Default for TcpSyncTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SyncTransport for TcpSyncTransport {
    async fn hello(&self, device: &DeviceInfo) -> SyncResult<HelloResponse> {
        let addr = self.remember(device);
        match self.round_trip(addr, Request::Hello).await? {
            Response::Hello(hello) => Ok(hello),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }

    async fn pair_challenge(&self, device: &DeviceInfo) -> SyncResult<PairingChallenge> {
        let addr = self.remember(device);
        match self.round_trip(addr, Request::PairChallenge).await? {
            Response::PairChallenge(challenge) => Ok(challenge),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }

    async fn pair(
        &self,
        device: &DeviceInfo,
        request: PairingRequest,
    ) -> SyncResult<PairingResponse> {
        let addr = self.remember(device);
        match self.round_trip(addr, Request::Pair(request)).await? {
            Response::Pair(response) => Ok(response),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }

    async fn fetch_manifest(&self, device_id: &str) -> SyncResult<Vec<ManifestEntry>> {
        let addr = self.resolve(device_id)?;
        match self.round_trip(addr, Request::FetchManifest).await? {
            Response::Manifest(manifest) => Ok(manifest),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }

    async fn fetch_item(&self, device_id: &str, item_id: &str) -> SyncResult<ItemFrame> {
        let addr = self.resolve(device_id)?;
        let request = Request::FetchItem {
            item_id: item_id.to_string(),
        };
        match self.round_trip(addr, request).await? {
            Response::Item(frame) => Ok(frame),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }

    async fn push_item(&self, device_id: &str, frame: ItemFrame) -> SyncResult<()> {
        let addr = self.resolve(device_id)?;
        match self.round_trip(addr, Request::PushItem(frame)).await? {
            Response::Ack => Ok(()),
            _ => Err(SyncError::TransferFailed("unexpected response".into())),
        }
    }
}

/// Serves the responder side of the protocol for the local library.
pub struct SyncListener {
    local_device: DeviceInfo,
    catalog: Arc<dyn CatalogSource>,
    certificate_der: Vec<u8>,
    /// PIN currently displayed to the user, if pairing mode is active.
    active_pin: Mutex<Option<String>>,
    challenge: Mutex<Option<PairingChallenge>>,
    session_key: Mutex<Option<SymmetricKey>>,
}

impl SyncListener {
    /// Creates a listener for the local device and catalog.
    pub fn new(
        local_device: DeviceInfo,
        catalog: Arc<dyn CatalogSource>,
        certificate_der: Vec<u8>,
    ) -> Self {
        SyncListener {
            local_device,
            catalog,
            certificate_der,
            active_pin: Mutex::new(None),
            challenge: Mutex::new(None),
            session_key: Mutex::new(None),
        }
    }

    /// Enters pairing mode with the given displayed PIN.
    pub fn begin_pairing(&self, pin: impl Into<String>) {
        *self.active_pin.lock().expect("pin lock poisoned") = Some(pin.into());
    }

    /// Leaves pairing mode.
    pub fn end_pairing(&self) {
        *self.active_pin.lock().expect("pin lock poisoned") = None;
    }

    /// Accepts and serves connections until the task is aborted.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle(stream).await {
                            tracing::debug!(%peer, error = %e, "sync connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) -> SyncResult<()> {
        let request: Request = read_frame(&mut stream).await?;
        let response = match self.respond(request).await {
            Ok(response) => response,
            Err(e) => Response::Error((&e).into()),
        };
        write_frame(&mut stream, &response).await
    }

    async fn respond(&self, request: Request) -> SyncResult<Response> {
        match request {
            Request::Hello => Ok(Response::Hello(HelloResponse {
                device_id: self.local_device.device_id.clone(),
                protocol_version: PROTOCOL_VERSION,
                app_version: self.local_device.app_version.clone(),
                certificate_der: self.certificate_der.clone(),
            })),
            Request::PairChallenge => {
                let challenge = PairingChallenge {
                    nonce: proof::random_nonce(),
                    salt: proof::random_salt(),
                };
                *self.challenge.lock().expect("challenge lock poisoned") = Some(challenge.clone());
                Ok(Response::PairChallenge(challenge))
            }
            Request::Pair(request) => {
                let pin = self
                    .active_pin
                    .lock()
                    .expect("pin lock poisoned")
                    .clone()
                    .ok_or(SyncError::AuthenticationFailed)?;
                let challenge = self
                    .challenge
                    .lock()
                    .expect("challenge lock poisoned")
                    .clone()
                    .ok_or(SyncError::AuthenticationFailed)?;

                let pin_key = PinKey::derive(&pin, &challenge.salt);
                if !pin_key.verify(&challenge.nonce, &request.proof) {
                    tracing::warn!(device_id = %request.device_id, "pairing proof rejected");
                    return Err(SyncError::AuthenticationFailed);
                }

                let responder_nonce = proof::random_nonce();
                let session_key = pin_key.derive_session_key(
                    &challenge.nonce,
                    &request.initiator_nonce,
                    &responder_nonce,
                );
                *self.session_key.lock().expect("key lock poisoned") = Some(session_key);
                tracing::info!(device_id = %request.device_id, "pairing accepted");

                Ok(Response::Pair(PairingResponse {
                    certificate_der: self.certificate_der.clone(),
                    responder_nonce,
                    app_version: self.local_device.app_version.clone(),
                    protocol_version: PROTOCOL_VERSION,
                }))
            }
            Request::FetchManifest => {
                // Library enumeration is gated on an established session
                // key, same as the item operations.
                self.current_key()?;
                let manifest = self.catalog.manifest().await?;
                Ok(Response::Manifest(manifest))
            }
            Request::FetchItem { item_id } => {
                let key = self.current_key()?;
                let item = self
                    .catalog
                    .get_item(&item_id)
                    .await?
                    .ok_or_else(|| SyncError::TransferFailed(format!("not found: {item_id}")))?;
                Ok(Response::Item(ItemFrame {
                    item_id,
                    index: 0,
                    ciphertext: super::seal_item(&key, &item)?,
                }))
            }
            Request::PushItem(frame) => {
                let key = self.current_key()?;
                let item: SyncableItem = super::open_item(&key, &frame.ciphertext)?;
                self.catalog.apply_item(item).await?;
                Ok(Response::Ack)
            }
        }
    }

    fn current_key(&self) -> SyncResult<SymmetricKey> {
        self.session_key
            .lock()
            .expect("key lock poisoned")
            .clone()
            .ok_or(SyncError::AuthenticationFailed)
    }
}
