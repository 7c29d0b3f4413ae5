// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transfer Engine
//!
//! Executes one sync plan against one trusted device. Items are processed
//! strictly in plan order; after every finalized item (transferred or
//! given up on) a checkpoint is persisted, keyed by the plan fingerprint,
//! so a dropped connection resumes at the same position instead of
//! re-sending everything.
//!
//! Error handling is three-tiered: item-scoped failures consume per-item
//! retries and eventually fail just that item; connection-scoped failures
//! trigger a whole-operation retry with backoff from the last checkpoint;
//! security failures abort the session immediately and are never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::catalog::{CatalogSource, SyncableItem};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::manifest::{PlanStep, SyncPlan};
use crate::retry::RetryPolicy;
use crate::session::{SyncProgress, SyncSession, SyncStatus};
use crate::storage::{Storage, TransferCheckpoint};
use crate::transport::{self, ItemFrame, SyncTransport};
use crate::trust::TrustedDevice;

use super::merge::MergeStrategy;

/// What became of one plan step.
enum StepOutcome {
    Transferred,
    /// Transferred via conflict merge.
    Merged,
    /// The item vanished locally between planning and transfer.
    Skipped,
}

/// Executes sync plans item by item.
pub struct TransferEngine {
    catalog: Arc<dyn CatalogSource>,
    transport: Arc<dyn SyncTransport>,
    storage: Arc<Storage>,
    merge: Arc<dyn MergeStrategy>,
    item_retry: RetryPolicy,
    operation_retry_limit: u32,
    backoff_base: Duration,
    batch_size: usize,
}

impl TransferEngine {
    /// Creates a transfer engine with the given merge strategy.
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        transport: Arc<dyn SyncTransport>,
        storage: Arc<Storage>,
        merge: Arc<dyn MergeStrategy>,
        config: &SyncConfig,
    ) -> Self {
        TransferEngine {
            catalog,
            transport,
            storage,
            merge,
            item_retry: RetryPolicy::new(config.item_retry_limit, config.backoff_base),
            operation_retry_limit: config.operation_retry_limit,
            backoff_base: config.backoff_base,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Runs the plan against the device, mutating `session` as it goes and
    /// publishing progress after every finalized item.
    ///
    /// On return the session is in a terminal state: `Completed`,
    /// `CompletedWithErrors`, or `Failed` (in which case the error is also
    /// returned). Checkpoints are deleted on completion and kept on
    /// failure so the next attempt can resume.
    pub async fn run(
        &self,
        session: &mut SyncSession,
        device: &TrustedDevice,
        plan: &SyncPlan,
        progress: &watch::Sender<SyncProgress>,
    ) -> SyncResult<()> {
        let fingerprint = plan.fingerprint();
        let mut index = self.restore_checkpoint(session, &fingerprint)?;

        session.total_items = plan.total_items();
        session.items_to_send = plan.send_count();
        session.items_to_receive = plan.receive_count();
        session.status = SyncStatus::Transferring;
        let _ = progress.send(session.progress());

        if session.was_resumed {
            tracing::info!(
                device_id = %device.device_id,
                resumed_from = index,
                "resuming interrupted transfer"
            );
        }

        let mut op_attempt: u32 = 0;
        while index < plan.steps.len() {
            let step = &plan.steps[index];
            match self.execute_step_with_retry(session, device, step, index as u64).await {
                Ok(outcome) => {
                    op_attempt = 0;
                    match outcome {
                        StepOutcome::Merged => {
                            session.conflicts.push(step.item_id().to_string());
                            session.completed_items += 1;
                        }
                        StepOutcome::Transferred => session.completed_items += 1,
                        StepOutcome::Skipped => {
                            tracing::debug!(item_id = %step.item_id(), "item vanished, skipping");
                            session.completed_items += 1;
                        }
                    }
                }
                Err(e) if e.is_security() => {
                    tracing::error!(
                        device_id = %device.device_id,
                        error = %e,
                        "security violation, aborting transfer"
                    );
                    return self.fail(session, progress, e);
                }
                Err(e) if e.is_connection_scoped() => {
                    op_attempt += 1;
                    if op_attempt >= self.operation_retry_limit {
                        return self.fail(session, progress, e);
                    }
                    session.retry_count += 1;
                    let delay = RetryPolicy::new(self.operation_retry_limit, self.backoff_base)
                        .delay_for(op_attempt);
                    tracing::warn!(
                        device_id = %device.device_id,
                        attempt = op_attempt,
                        ?delay,
                        error = %e,
                        "connection lost, retrying from checkpoint"
                    );
                    tokio::time::sleep(delay).await;
                    // Same index; the checkpoint already covers everything
                    // finalized before the drop.
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    // Per-item retries exhausted; give up on this item only.
                    tracing::warn!(item_id = %step.item_id(), error = %e, "item failed permanently");
                    session.failed_items.push(step.item_id().to_string());
                }
                Err(e) => return self.fail(session, progress, e),
            }

            index += 1;
            self.save_checkpoint(session, device, &fingerprint, index)?;
            let _ = progress.send(session.progress());

            if index % self.batch_size == 0 || index == plan.steps.len() {
                tracing::info!(
                    device_id = %device.device_id,
                    finalized = index,
                    total = plan.steps.len(),
                    "transfer batch finalized"
                );
            }
        }

        debug_assert_eq!(
            session.completed_items + session.failed_items.len(),
            session.total_items
        );

        if !session.failed_items.is_empty() && session.completed_items == 0 {
            return self.fail(
                session,
                progress,
                SyncError::TransferFailed("every planned item failed".into()),
            );
        }

        self.storage.delete_checkpoint(&device.device_id)?;
        let status = if session.failed_items.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::CompletedWithErrors
        };
        session.finish(status);
        let _ = progress.send(session.progress());
        Ok(())
    }

    /// Runs one step under the per-item retry policy.
    ///
    /// Connection-scoped and security errors escape immediately; only
    /// item-scoped transient errors consume per-item retries.
    async fn execute_step_with_retry(
        &self,
        session: &mut SyncSession,
        device: &TrustedDevice,
        step: &PlanStep,
        index: u64,
    ) -> SyncResult<StepOutcome> {
        let mut retries = 0;
        let result = self
            .item_retry
            .run(
                || self.execute_step(device, step, index),
                |e| e.is_retryable() && !e.is_connection_scoped(),
                |_, _| retries += 1,
            )
            .await;
        session.retry_count += retries;
        result
    }

    async fn execute_step(
        &self,
        device: &TrustedDevice,
        step: &PlanStep,
        index: u64,
    ) -> SyncResult<StepOutcome> {
        match step {
            PlanStep::Send { item_id } => {
                let Some(item) = self.catalog.get_item(item_id).await? else {
                    return Ok(StepOutcome::Skipped);
                };
                self.push(device, &item, index).await?;
                Ok(StepOutcome::Transferred)
            }
            PlanStep::Receive { item_id } => {
                let item = self.fetch(device, item_id).await?;
                self.catalog.apply_item(item).await?;
                Ok(StepOutcome::Transferred)
            }
            PlanStep::Merge { item_id, .. } => {
                let remote = self.fetch(device, item_id).await?;
                let Some(local) = self.catalog.get_item(item_id).await? else {
                    // Local copy vanished since planning; degrade to a
                    // plain receive.
                    self.catalog.apply_item(remote).await?;
                    return Ok(StepOutcome::Transferred);
                };

                let merged = self.merge.merge(&local, &remote);
                if content_matches(&local, &merged) {
                    // The local copy won on content; only the merged
                    // reading state needs to land.
                    self.catalog.apply_merged_state(item_id, merged.state).await?;
                } else {
                    self.catalog.apply_item(merged.clone()).await?;
                }
                // Push the merged result so both sides converge.
                self.push(device, &merged, index).await?;
                Ok(StepOutcome::Merged)
            }
        }
    }

    async fn push(&self, device: &TrustedDevice, item: &SyncableItem, index: u64) -> SyncResult<()> {
        let frame = ItemFrame {
            item_id: item.id.clone(),
            index,
            ciphertext: transport::seal_item(&device.session_key, item)?,
        };
        self.transport.push_item(&device.device_id, frame).await
    }

    async fn fetch(&self, device: &TrustedDevice, item_id: &str) -> SyncResult<SyncableItem> {
        let frame = self.transport.fetch_item(&device.device_id, item_id).await?;
        transport::open_item(&device.session_key, &frame.ciphertext)
    }

    /// Restores resume state from a stored checkpoint if it matches the
    /// current plan. A stale checkpoint (different plan) is discarded.
    fn restore_checkpoint(
        &self,
        session: &mut SyncSession,
        fingerprint: &str,
    ) -> SyncResult<usize> {
        let Some(checkpoint) = self.storage.load_checkpoint(&session.device_id)? else {
            return Ok(0);
        };
        if checkpoint.plan_fingerprint != fingerprint {
            tracing::debug!(device_id = %session.device_id, "discarding stale checkpoint");
            self.storage.delete_checkpoint(&session.device_id)?;
            return Ok(0);
        }

        session.was_resumed = true;
        session.resumed_from_item = Some(checkpoint.next_index);
        session.completed_items = checkpoint.completed_items;
        session.failed_items = checkpoint.failed_items;
        session.conflicts = checkpoint.conflicts;
        session.retry_count = checkpoint.retry_count;
        Ok(checkpoint.next_index)
    }

    fn save_checkpoint(
        &self,
        session: &SyncSession,
        device: &TrustedDevice,
        fingerprint: &str,
        next_index: usize,
    ) -> SyncResult<()> {
        self.storage.save_checkpoint(&TransferCheckpoint {
            device_id: device.device_id.clone(),
            plan_fingerprint: fingerprint.to_string(),
            next_index,
            completed_items: session.completed_items,
            failed_items: session.failed_items.clone(),
            conflicts: session.conflicts.clone(),
            retry_count: session.retry_count,
        })?;
        Ok(())
    }

    fn fail(
        &self,
        session: &mut SyncSession,
        progress: &watch::Sender<SyncProgress>,
        error: SyncError,
    ) -> SyncResult<()> {
        session.error = Some(error.to_string());
        session.finish(SyncStatus::Failed);
        let _ = progress.send(session.progress());
        Err(error)
    }
}

/// True if the merge left everything but the reading state as it is in
/// the local copy, regardless of which strategy produced it.
fn content_matches(local: &SyncableItem, merged: &SyncableItem) -> bool {
    let mut local_with_merged_state = local.clone();
    local_with_merged_state.state = merged.state;
    local_with_merged_state == *merged
}
