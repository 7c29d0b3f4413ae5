// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Manifest Exchange and Diff
//!
//! Compares the local and remote library manifests and produces a sync
//! plan: which items to send, which to receive, and which both sides
//! modified. Both manifests are sorted by item id, so the diff is a single
//! merge-join pass; the resulting plan is deterministic and id-ordered,
//! which is what makes checkpoints from an interrupted run meaningful.

use std::sync::Arc;

use ring::digest;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSource, ManifestEntry};
use crate::config::{SyncConfig, PROTOCOL_VERSION};
use crate::discovery::DeviceInfo;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::transport::SyncTransport;

/// One operation of a sync plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Item exists only locally; send it.
    Send { item_id: String },
    /// Item exists only remotely; receive it.
    Receive { item_id: String },
    /// Both sides modified the item; fetch, merge, apply, and send the
    /// merged result back.
    Merge {
        item_id: String,
        local_modified: u64,
        remote_modified: u64,
    },
}

impl PlanStep {
    /// The item this step operates on.
    pub fn item_id(&self) -> &str {
        match self {
            PlanStep::Send { item_id }
            | PlanStep::Receive { item_id }
            | PlanStep::Merge { item_id, .. } => item_id,
        }
    }
}

/// The agreed set of operations for one sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Steps in deterministic item-id order.
    pub steps: Vec<PlanStep>,
    /// Items identical on both sides, skipped entirely.
    pub unchanged: usize,
}

impl SyncPlan {
    /// Total number of items this plan will transfer.
    pub fn total_items(&self) -> usize {
        self.steps.len()
    }

    /// Number of send steps.
    pub fn send_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Send { .. }))
            .count()
    }

    /// Number of receive steps.
    pub fn receive_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Receive { .. }))
            .count()
    }

    /// Number of merge steps.
    pub fn conflict_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Merge { .. }))
            .count()
    }

    /// Returns true if there is nothing to transfer.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Content fingerprint of the plan, used to decide whether a stored
    /// checkpoint still applies. Any change in either manifest changes
    /// the fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut ctx = digest::Context::new(&digest::SHA256);
        for step in &self.steps {
            match step {
                PlanStep::Send { item_id } => {
                    ctx.update(b"S");
                    ctx.update(item_id.as_bytes());
                }
                PlanStep::Receive { item_id } => {
                    ctx.update(b"R");
                    ctx.update(item_id.as_bytes());
                }
                PlanStep::Merge {
                    item_id,
                    local_modified,
                    remote_modified,
                } => {
                    ctx.update(b"M");
                    ctx.update(item_id.as_bytes());
                    ctx.update(&local_modified.to_le_bytes());
                    ctx.update(&remote_modified.to_le_bytes());
                }
            }
            ctx.update(&[0]);
        }
        hex::encode(ctx.finish().as_ref())
    }
}

/// Diffs two id-sorted manifests into a sync plan.
///
/// Single merge-join pass: local-only items become sends, remote-only
/// items become receives, shared items with differing timestamps become
/// merges, identical items are counted as unchanged.
pub fn diff_manifests(local: &[ManifestEntry], remote: &[ManifestEntry]) -> SyncPlan {
    debug_assert!(local.windows(2).all(|w| w[0].item_id < w[1].item_id));
    debug_assert!(remote.windows(2).all(|w| w[0].item_id < w[1].item_id));

    let mut steps = Vec::new();
    let mut unchanged = 0;

    let mut li = local.iter().peekable();
    let mut ri = remote.iter().peekable();

    loop {
        match (li.peek(), ri.peek()) {
            (Some(l), Some(r)) => match l.item_id.cmp(&r.item_id) {
                std::cmp::Ordering::Less => {
                    steps.push(PlanStep::Send {
                        item_id: l.item_id.clone(),
                    });
                    li.next();
                }
                std::cmp::Ordering::Greater => {
                    steps.push(PlanStep::Receive {
                        item_id: r.item_id.clone(),
                    });
                    ri.next();
                }
                std::cmp::Ordering::Equal => {
                    if l.last_modified != r.last_modified {
                        steps.push(PlanStep::Merge {
                            item_id: l.item_id.clone(),
                            local_modified: l.last_modified,
                            remote_modified: r.last_modified,
                        });
                    } else {
                        unchanged += 1;
                    }
                    li.next();
                    ri.next();
                }
            },
            (Some(l), None) => {
                steps.push(PlanStep::Send {
                    item_id: l.item_id.clone(),
                });
                li.next();
            }
            (None, Some(r)) => {
                steps.push(PlanStep::Receive {
                    item_id: r.item_id.clone(),
                });
                ri.next();
            }
            (None, None) => break,
        }
    }

    SyncPlan { steps, unchanged }
}

/// Builds sync plans by exchanging manifests with a remote device.
pub struct ManifestExchanger {
    catalog: Arc<dyn CatalogSource>,
    transport: Arc<dyn SyncTransport>,
    retry: RetryPolicy,
}

impl ManifestExchanger {
    /// Creates an exchanger over the local catalog and transport.
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        transport: Arc<dyn SyncTransport>,
        config: &SyncConfig,
    ) -> Self {
        ManifestExchanger {
            catalog,
            transport,
            retry: RetryPolicy::new(config.operation_retry_limit, config.backoff_base),
        }
    }

    /// Exchanges manifests with the device and computes the plan.
    ///
    /// The caller is expected to have verified trust already. Planning
    /// re-greets the device and rejects an incompatible protocol version
    /// before any manifest data moves.
    pub async fn build_plan(&self, device: &DeviceInfo) -> SyncResult<SyncPlan> {
        let hello = self
            .retry
            .run(
                || self.transport.hello(device),
                SyncError::is_retryable,
                |_, _| {},
            )
            .await?;
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(SyncError::IncompatibleVersion {
                local: PROTOCOL_VERSION,
                remote: hello.protocol_version,
            });
        }

        let local = self.catalog.manifest().await?;
        let remote = self
            .retry
            .run(
                || self.transport.fetch_manifest(&device.device_id),
                SyncError::is_retryable,
                |_, _| {},
            )
            .await?;

        let plan = diff_manifests(&local, &remote);
        tracing::info!(
            device_id = %device.device_id,
            to_send = plan.send_count(),
            to_receive = plan.receive_count(),
            conflicts = plan.conflict_count(),
            unchanged = plan.unchanged,
            "sync plan computed"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, modified: u64) -> ManifestEntry {
        ManifestEntry {
            item_id: id.into(),
            last_modified: modified,
        }
    }

    #[test]
    fn test_diff_partitions_items() {
        let local = vec![entry("a", 1), entry("b", 5), entry("c", 3), entry("e", 9)];
        let remote = vec![entry("b", 5), entry("c", 7), entry("d", 2)];

        let plan = diff_manifests(&local, &remote);
        assert_eq!(
            plan.steps,
            vec![
                PlanStep::Send { item_id: "a".into() },
                PlanStep::Merge {
                    item_id: "c".into(),
                    local_modified: 3,
                    remote_modified: 7,
                },
                PlanStep::Receive { item_id: "d".into() },
                PlanStep::Send { item_id: "e".into() },
            ]
        );
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.total_items(), 4);
    }

    #[test]
    fn test_diff_identical_manifests_is_empty() {
        let manifest = vec![entry("a", 1), entry("b", 2)];
        let plan = diff_manifests(&manifest, &manifest);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 2);
    }

    #[test]
    fn test_diff_against_empty() {
        let local = vec![entry("a", 1), entry("b", 2)];
        let plan = diff_manifests(&local, &[]);
        assert_eq!(plan.send_count(), 2);
        assert_eq!(plan.receive_count(), 0);

        let plan = diff_manifests(&[], &local);
        assert_eq!(plan.receive_count(), 2);
    }

    #[test]
    fn test_plan_steps_are_id_ordered() {
        let local = vec![entry("a", 1), entry("c", 2), entry("e", 3)];
        let remote = vec![entry("b", 1), entry("d", 2), entry("f", 3)];

        let plan = diff_manifests(&local, &remote);
        let ids: Vec<_> = plan.steps.iter().map(|s| s.item_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let local = vec![entry("a", 1), entry("b", 2)];
        let remote = vec![entry("b", 3)];

        let plan = diff_manifests(&local, &remote);
        let same = diff_manifests(&local, &remote);
        assert_eq!(plan.fingerprint(), same.fingerprint());

        let different = diff_manifests(&local, &[entry("b", 4)]);
        assert_ne!(plan.fingerprint(), different.fingerprint());
    }
}
