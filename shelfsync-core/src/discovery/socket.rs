// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Beacon Sockets
//!
//! Platform seam for discovery I/O: a UDP broadcast socket for real
//! networks and an in-memory loopback bus for tests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

use super::beacon::MAX_BEACON_SIZE;
use crate::error::{SyncError, SyncResult};

/// Datagram transport for discovery beacons.
#[async_trait]
pub trait BeaconSocket: Send + Sync {
    /// Broadcasts one beacon datagram.
    async fn send_beacon(&self, data: &[u8]) -> SyncResult<()>;

    /// Waits for the next beacon datagram.
    async fn recv_beacon(&self) -> SyncResult<Vec<u8>>;
}

/// UDP broadcast socket for same-subnet discovery.
pub struct UdpBeaconSocket {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
}

impl UdpBeaconSocket {
    /// Binds the discovery socket on the given port and enables broadcast.
    pub async fn bind(port: u16) -> SyncResult<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("bind discovery socket: {e}")))?;
        socket
            .set_broadcast(true)
            .map_err(|_| SyncError::NetworkUnavailable)?;

        Ok(UdpBeaconSocket {
            socket,
            broadcast_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
        })
    }
}

#[async_trait]
impl BeaconSocket for UdpBeaconSocket {
    async fn send_beacon(&self, data: &[u8]) -> SyncResult<()> {
        self.socket
            .send_to(data, self.broadcast_addr)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("beacon send: {e}")))?;
        Ok(())
    }

    async fn recv_beacon(&self) -> SyncResult<Vec<u8>> {
        let mut buf = vec![0u8; MAX_BEACON_SIZE];
        let (len, _addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("beacon recv: {e}")))?;
        buf.truncate(len);
        Ok(buf)
    }
}

/// In-memory beacon bus connecting loopback endpoints, for tests.
///
/// Every endpoint sees every datagram, including its own; the discovery
/// service filters out its own device id.
#[derive(Clone)]
pub struct LoopbackBeaconBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl LoopbackBeaconBus {
    /// Creates a new bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        LoopbackBeaconBus { tx }
    }

    /// Creates a new endpoint attached to this bus.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        LoopbackEndpoint {
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

impl Default for LoopbackBeaconBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a [`LoopbackBeaconBus`].
pub struct LoopbackEndpoint {
    tx: broadcast::Sender<Vec<u8>>,
    rx: Mutex<broadcast::Receiver<Vec<u8>>>,
}

#[async_trait]
impl BeaconSocket for LoopbackEndpoint {
    async fn send_beacon(&self, data: &[u8]) -> SyncResult<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| SyncError::NetworkUnavailable)?;
        Ok(())
    }

    async fn recv_beacon(&self) -> SyncResult<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(data) => return Ok(data),
                // Lagged receivers skip to the oldest retained datagram
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SyncError::NetworkUnavailable)
                }
            }
        }
    }
}
