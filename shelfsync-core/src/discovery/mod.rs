// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Peer Discovery
//!
//! Finds reachable devices on the local network via periodic UDP
//! broadcast beacons and maintains a live registry with freshness expiry.
//!
//! Discovery never surfaces a hard error to callers: transient socket
//! failures are retried internally with bounded attempts, and an empty
//! device list is a valid, silent outcome.

pub mod beacon;
pub mod registry;
pub mod service;
pub mod socket;

pub use beacon::Beacon;
pub use registry::DeviceRegistry;
pub use service::DiscoveryService;
pub use socket::{BeaconSocket, LoopbackBeaconBus, UdpBeaconSocket};

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Stable identifier of a device.
pub type DeviceId = String;

/// Broad device class, for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Phone,
    Tablet,
    Desktop,
    Reader,
}

/// Identity of a peer device as learned from its discovery beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable, unique device id.
    pub device_id: DeviceId,
    /// Human-readable display name.
    pub device_name: String,
    /// Device class.
    pub device_kind: DeviceKind,
    /// App version running on the device.
    pub app_version: String,
    /// Network address the device announced.
    pub address: IpAddr,
    /// Port the device accepts sync connections on.
    pub port: u16,
    /// Unix timestamp (milliseconds) of the last received beacon.
    pub last_seen: u64,
}

/// Returns the current Unix timestamp in milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
