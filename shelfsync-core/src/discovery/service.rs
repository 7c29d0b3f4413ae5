// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Discovery Service
//!
//! Runs the beacon broadcast, listen, and eviction loops as background
//! tasks, feeding the device registry. Runs independently of any sync
//! session.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::beacon::Beacon;
use super::registry::DeviceRegistry;
use super::socket::BeaconSocket;
use super::{now_millis, DeviceInfo};
use crate::config::SyncConfig;
use crate::retry::RetryPolicy;

/// Attempts for a single beacon send before giving up silently.
const BEACON_SEND_ATTEMPTS: u32 = 3;

/// Discovers peer devices on the local network.
pub struct DiscoveryService {
    local_device: DeviceInfo,
    beacon_interval: Duration,
    backoff_base: Duration,
    registry: Arc<DeviceRegistry>,
    socket: Arc<dyn BeaconSocket>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Creates a discovery service announcing `local_device` over the
    /// given socket.
    pub fn new(local_device: DeviceInfo, config: &SyncConfig, socket: Arc<dyn BeaconSocket>) -> Self {
        DiscoveryService {
            local_device,
            beacon_interval: config.beacon_interval,
            backoff_base: config.backoff_base,
            registry: Arc::new(DeviceRegistry::new(config.discovery_timeout)),
            socket,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts broadcasting and listening. Idempotent: calling while
    /// already running is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().expect("discovery task lock poisoned");
        if !tasks.is_empty() {
            return;
        }
        tracing::info!(device_id = %self.local_device.device_id, "starting discovery");

        tasks.push(self.spawn_broadcast_loop());
        tasks.push(self.spawn_listen_loop());
        tasks.push(self.spawn_eviction_loop());
    }

    /// Stops broadcasting and listening and clears the registry.
    /// Idempotent: safe to call when already stopped.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().expect("discovery task lock poisoned");
        if tasks.is_empty() {
            return;
        }
        tracing::info!("stopping discovery");
        for task in tasks.drain(..) {
            task.abort();
        }
        self.registry.clear();
    }

    /// Returns true if discovery is currently running.
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().expect("discovery task lock poisoned").is_empty()
    }

    /// Returns a receiver of discovered-device snapshots.
    pub fn watch_devices(&self) -> watch::Receiver<Vec<DeviceInfo>> {
        self.registry.watch()
    }

    /// Returns a discovered device by id.
    pub fn get(&self, device_id: &str) -> Option<DeviceInfo> {
        self.registry.get(device_id)
    }

    /// Removes a device from the registry (e.g. on disconnect).
    pub fn remove(&self, device_id: &str) -> bool {
        self.registry.remove(device_id)
    }

    fn spawn_broadcast_loop(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let device = self.local_device.clone();
        let interval = self.beacon_interval;
        let policy = RetryPolicy::new(BEACON_SEND_ATTEMPTS, self.backoff_base);

        tokio::spawn(async move {
            loop {
                let mut announced = device.clone();
                announced.last_seen = now_millis();
                let data = Beacon::new(announced).encode();

                // A dropped broadcast is retried a few times, then dropped
                // silently; the next interval announces again anyway.
                let result = policy
                    .run(
                        || {
                            let socket = Arc::clone(&socket);
                            let data = data.clone();
                            async move { socket.send_beacon(&data).await }
                        },
                        |e| e.is_retryable(),
                        |_, _| {},
                    )
                    .await;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "beacon broadcast failed");
                }

                tokio::time::sleep(interval).await;
            }
        })
    }

    fn spawn_listen_loop(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let registry = Arc::clone(&self.registry);
        let own_id = self.local_device.device_id.clone();
        let backoff = self.backoff_base;

        tokio::spawn(async move {
            loop {
                match socket.recv_beacon().await {
                    Ok(data) => match Beacon::decode(&data) {
                        Ok(beacon) if beacon.device.device_id != own_id => {
                            tracing::debug!(
                                device_id = %beacon.device.device_id,
                                name = %beacon.device.device_name,
                                "beacon received"
                            );
                            registry.upsert(beacon.device);
                        }
                        Ok(_) => {} // our own beacon echoed back
                        Err(e) => {
                            tracing::debug!(error = %e, "ignoring malformed beacon");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "beacon receive failed");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        })
    }

    fn spawn_eviction_loop(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let sweep = self.beacon_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            loop {
                ticker.tick().await;
                registry.evict_stale();
            }
        })
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}
