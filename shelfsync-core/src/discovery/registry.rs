// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Discovered Device Registry
//!
//! Concurrency-safe map of discovered devices keyed by device id, with
//! TTL eviction. Exposed only through observable snapshots; callers never
//! hold a live reference into the map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use super::{now_millis, DeviceId, DeviceInfo};

/// Registry of currently visible devices.
pub struct DeviceRegistry {
    devices: Mutex<HashMap<DeviceId, DeviceInfo>>,
    snapshot_tx: watch::Sender<Vec<DeviceInfo>>,
    ttl: Duration,
}

impl DeviceRegistry {
    /// Creates an empty registry whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        DeviceRegistry {
            devices: Mutex::new(HashMap::new()),
            snapshot_tx,
            ttl,
        }
    }

    /// Inserts or refreshes a device, stamping its `last_seen` time.
    pub fn upsert(&self, mut device: DeviceInfo) {
        device.last_seen = now_millis();
        {
            let mut map = self.devices.lock().expect("registry lock poisoned");
            map.insert(device.device_id.clone(), device);
        }
        self.publish();
    }

    /// Returns a device by id, if still visible.
    pub fn get(&self, device_id: &str) -> Option<DeviceInfo> {
        let map = self.devices.lock().expect("registry lock poisoned");
        map.get(device_id).cloned()
    }

    /// Removes a device. Returns true if it was present.
    pub fn remove(&self, device_id: &str) -> bool {
        let removed = {
            let mut map = self.devices.lock().expect("registry lock poisoned");
            map.remove(device_id).is_some()
        };
        if removed {
            self.publish();
        }
        removed
    }

    /// Evicts devices not re-announced within the TTL. Returns how many
    /// were evicted.
    pub fn evict_stale(&self) -> usize {
        let cutoff = now_millis().saturating_sub(self.ttl.as_millis() as u64);
        let evicted = {
            let mut map = self.devices.lock().expect("registry lock poisoned");
            let before = map.len();
            map.retain(|_, d| d.last_seen >= cutoff);
            before - map.len()
        };
        if evicted > 0 {
            tracing::debug!(evicted, "evicted stale devices");
            self.publish();
        }
        evicted
    }

    /// Removes all devices.
    pub fn clear(&self) {
        {
            let mut map = self.devices.lock().expect("registry lock poisoned");
            map.clear();
        }
        self.publish();
    }

    /// Returns a receiver of registry snapshots, sorted by device id.
    ///
    /// The receiver always holds the latest snapshot; a slow consumer
    /// only misses intermediate states.
    pub fn watch(&self) -> watch::Receiver<Vec<DeviceInfo>> {
        self.snapshot_tx.subscribe()
    }

    /// Returns the current snapshot, sorted by device id.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.snapshot_tx.borrow().clone()
    }

    fn publish(&self) {
        let mut snapshot: Vec<DeviceInfo> = {
            let map = self.devices.lock().expect("registry lock poisoned");
            map.values().cloned().collect()
        };
        snapshot.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        // send_replace stores the value even while no receiver exists;
        // plain send would discard it and leave late subscribers stale
        self.snapshot_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DeviceKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: id.into(),
            device_name: format!("Device {id}"),
            device_kind: DeviceKind::Phone,
            app_version: "1.0.0".into(),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8963,
            last_seen: 0,
        }
    }

    #[test]
    fn test_upsert_and_snapshot_sorted() {
        let registry = DeviceRegistry::new(Duration::from_secs(10));
        registry.upsert(device("b"));
        registry.upsert(device("a"));

        let snapshot = registry.snapshot();
        let ids: Vec<_> = snapshot.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_upsert_refreshes_last_seen() {
        let registry = DeviceRegistry::new(Duration::from_secs(10));
        registry.upsert(device("a"));
        let first = registry.get("a").unwrap().last_seen;
        registry.upsert(device("a"));
        let second = registry.get("a").unwrap().last_seen;
        assert!(second >= first);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_evict_stale_removes_old_devices() {
        let registry = DeviceRegistry::new(Duration::ZERO);
        registry.upsert(device("a"));
        // TTL of zero makes everything immediately stale
        std::thread::sleep(Duration::from_millis(5));
        let evicted = registry.evict_stale();
        assert_eq!(evicted, 1);
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_late_subscriber_sees_earlier_changes() {
        let registry = DeviceRegistry::new(Duration::from_secs(10));
        // No receiver is attached while the registry changes
        registry.upsert(device("a"));
        registry.upsert(device("b"));
        registry.remove("b");

        let rx = registry.watch();
        let ids: Vec<_> = rx.borrow().iter().map(|d| d.device_id.clone()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_watch_observes_changes() {
        let registry = DeviceRegistry::new(Duration::from_secs(10));
        let rx = registry.watch();
        assert!(rx.borrow().is_empty());

        registry.upsert(device("a"));
        assert_eq!(rx.borrow().len(), 1);

        registry.clear();
        assert!(rx.borrow().is_empty());
    }
}
