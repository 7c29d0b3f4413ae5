// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Discovery Beacon Codec
//!
//! Wire format: `MAGIC (4 bytes) || version (1 byte) || bincode(DeviceInfo)`.
//! Beacons from other protocol versions are rejected during parsing so a
//! mixed-version network degrades to mutual invisibility, not errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DeviceInfo;

/// Beacon magic bytes.
const BEACON_MAGIC: &[u8; 4] = b"SHLF";

/// Beacon wire format version.
const BEACON_VERSION: u8 = 1;

/// Maximum accepted beacon size; larger datagrams are discarded.
pub const MAX_BEACON_SIZE: usize = 512;

/// Beacon parsing error types.
#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Beacon too short")]
    TooShort,
    #[error("Invalid beacon magic")]
    InvalidMagic,
    #[error("Unsupported beacon version: {0}")]
    UnsupportedVersion(u8),
    #[error("Malformed beacon payload")]
    Malformed,
}

/// A discovery beacon announcing one device's presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    /// The announcing device.
    pub device: DeviceInfo,
}

impl Beacon {
    /// Creates a beacon for the given device.
    pub fn new(device: DeviceInfo) -> Self {
        Beacon { device }
    }

    /// Encodes the beacon for transmission.
    pub fn encode(&self) -> Vec<u8> {
        let payload = bincode::serialize(self).expect("beacon serialization should not fail");

        let mut data = Vec::with_capacity(5 + payload.len());
        data.extend_from_slice(BEACON_MAGIC);
        data.push(BEACON_VERSION);
        data.extend_from_slice(&payload);
        data
    }

    /// Parses a beacon from a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self, BeaconError> {
        if data.len() < 5 {
            return Err(BeaconError::TooShort);
        }
        if &data[0..4] != BEACON_MAGIC {
            return Err(BeaconError::InvalidMagic);
        }
        let version = data[4];
        if version != BEACON_VERSION {
            return Err(BeaconError::UnsupportedVersion(version));
        }

        bincode::deserialize(&data[5..]).map_err(|_| BeaconError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DeviceKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_device() -> DeviceInfo {
        DeviceInfo {
            device_id: "device-1".into(),
            device_name: "Living Room Tablet".into(),
            device_kind: DeviceKind::Tablet,
            app_version: "2.0.14".into(),
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            port: 8963,
            last_seen: 0,
        }
    }

    #[test]
    fn test_beacon_roundtrip() {
        let beacon = Beacon::new(test_device());
        let encoded = beacon.encode();
        assert!(encoded.len() <= MAX_BEACON_SIZE);

        let decoded = Beacon::decode(&encoded).unwrap();
        assert_eq!(decoded.device.device_id, "device-1");
        assert_eq!(decoded.device.port, 8963);
    }

    #[test]
    fn test_beacon_rejects_wrong_magic() {
        let mut encoded = Beacon::new(test_device()).encode();
        encoded[0] = b'X';
        assert!(matches!(
            Beacon::decode(&encoded),
            Err(BeaconError::InvalidMagic)
        ));
    }

    #[test]
    fn test_beacon_rejects_future_version() {
        let mut encoded = Beacon::new(test_device()).encode();
        encoded[4] = 99;
        assert!(matches!(
            Beacon::decode(&encoded),
            Err(BeaconError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_beacon_rejects_garbage() {
        assert!(matches!(Beacon::decode(b"SH"), Err(BeaconError::TooShort)));

        let mut garbage = b"SHLF".to_vec();
        garbage.push(1);
        garbage.extend_from_slice(&[0xFF; 8]);
        assert!(matches!(
            Beacon::decode(&garbage),
            Err(BeaconError::Malformed)
        ));
    }
}
