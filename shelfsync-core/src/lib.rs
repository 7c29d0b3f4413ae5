// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! ShelfSync Core Library
//!
//! Local-network library synchronization between a user's own devices:
//! UDP peer discovery, PIN-authenticated pairing with certificate
//! pinning, manifest-based diffing, and resumable encrypted transfer.
//! Cryptographic primitives come from the audited `ring` crate plus
//! XChaCha20-Poly1305 for payload encryption.

pub mod api;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod transport;
pub mod trust;

pub use api::SyncEngine;
pub use catalog::{CatalogSource, ItemKind, ManifestEntry, MemoryCatalog, ReadingState, SyncableItem};
pub use config::{SyncConfig, PROTOCOL_VERSION};
pub use crypto::{decrypt, encrypt, EncryptionError, SymmetricKey};
pub use discovery::{
    BeaconSocket, DeviceId, DeviceInfo, DeviceKind, DeviceRegistry, DiscoveryService,
    LoopbackBeaconBus, UdpBeaconSocket,
};
pub use error::{SyncError, SyncResult};
pub use manifest::{diff_manifests, ManifestExchanger, PlanStep, SyncPlan};
pub use retry::RetryPolicy;
pub use session::{SyncProgress, SyncSession, SyncStatus};
pub use storage::{Storage, StorageError, TransferCheckpoint};
pub use transfer::{MergeStrategy, NewerWins, TransferEngine};
pub use transport::{
    mock::MockSyncTransport,
    tcp::{SyncListener, TcpSyncTransport},
    ItemFrame, SyncTransport,
};
pub use trust::{Fingerprint, TrustManager, TrustRecord, TrustedDevice};
