// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Engine Facade
//!
//! Orchestrates the per-device sync state machine: Discovering, Pairing,
//! Planning, Transferring, then a terminal state. Each device gets at most
//! one live session; concurrent sync requests for the same device join the
//! running session and receive the same outcome, while sessions for
//! different devices run independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};

use crate::catalog::CatalogSource;
use crate::config::SyncConfig;
use crate::discovery::{DeviceInfo, DiscoveryService};
use crate::discovery::socket::BeaconSocket;
use crate::error::{SyncError, SyncResult};
use crate::manifest::ManifestExchanger;
use crate::session::{SyncProgress, SyncSession, SyncStatus};
use crate::storage::Storage;
use crate::transfer::{MergeStrategy, NewerWins, TransferEngine};
use crate::transport::SyncTransport;
use crate::trust::{TrustManager, TrustRecord, TrustedDevice};

/// Terminal result of one session task, fanned out to every waiter.
struct Outcome {
    session: SyncSession,
    failure: Option<Arc<SyncError>>,
}

/// Handle to a per-device session task.
struct SessionHandle {
    progress_rx: watch::Receiver<SyncProgress>,
    outcome_rx: watch::Receiver<Option<Arc<Outcome>>>,
    cancel: Arc<Notify>,
}

impl SessionHandle {
    fn is_active(&self) -> bool {
        self.outcome_rx.borrow().is_none()
    }
}

/// The sync engine: one instance per running app.
pub struct SyncEngine {
    config: SyncConfig,
    discovery: Arc<DiscoveryService>,
    trust: Arc<TrustManager>,
    exchanger: Arc<ManifestExchanger>,
    transfer: Arc<TransferEngine>,
    storage: Arc<Storage>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SyncEngine {
    /// Wires up an engine from its dependencies, with the default
    /// newer-wins merge strategy.
    pub fn new(
        local_device: DeviceInfo,
        config: SyncConfig,
        catalog: Arc<dyn CatalogSource>,
        transport: Arc<dyn SyncTransport>,
        beacon_socket: Arc<dyn BeaconSocket>,
        storage: Arc<Storage>,
    ) -> Self {
        Self::with_merge_strategy(
            local_device,
            config,
            catalog,
            transport,
            beacon_socket,
            storage,
            Arc::new(NewerWins),
        )
    }

    /// Like [`new`], with a custom conflict merge strategy.
    ///
    /// [`new`]: SyncEngine::new
    pub fn with_merge_strategy(
        local_device: DeviceInfo,
        config: SyncConfig,
        catalog: Arc<dyn CatalogSource>,
        transport: Arc<dyn SyncTransport>,
        beacon_socket: Arc<dyn BeaconSocket>,
        storage: Arc<Storage>,
        merge: Arc<dyn MergeStrategy>,
    ) -> Self {
        let discovery = Arc::new(DiscoveryService::new(local_device, &config, beacon_socket));
        let trust = Arc::new(TrustManager::new(
            Arc::clone(&storage),
            Arc::clone(&transport),
            &config,
        ));
        let exchanger = Arc::new(ManifestExchanger::new(
            Arc::clone(&catalog),
            Arc::clone(&transport),
            &config,
        ));
        let transfer = Arc::new(TransferEngine::new(
            catalog,
            transport,
            Arc::clone(&storage),
            merge,
            &config,
        ));

        SyncEngine {
            config,
            discovery,
            trust,
            exchanger,
            transfer,
            storage,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    // === Discovery ===

    /// Starts announcing and listening for devices on the local network.
    pub fn start_discovery(&self) {
        self.discovery.start();
    }

    /// Stops discovery and forgets all currently visible devices.
    pub fn stop_discovery(&self) {
        self.discovery.stop();
    }

    /// Returns true while discovery is running.
    pub fn discovery_running(&self) -> bool {
        self.discovery.is_running()
    }

    /// Returns a receiver of discovered-device snapshots.
    pub fn watch_devices(&self) -> watch::Receiver<Vec<DeviceInfo>> {
        self.discovery.watch_devices()
    }

    // === Trust ===

    /// Pairs with a discovered device using the PIN shown on it.
    pub async fn initiate_pairing(&self, device_id: &str, pin: &str) -> SyncResult<TrustedDevice> {
        let device = self
            .discovery
            .get(device_id)
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))?;
        self.trust.pair(&device, pin).await
    }

    /// Clears the failed-PIN lockout counter for a device.
    pub fn reset_pin_attempts(&self, device_id: &str) {
        self.trust.reset_attempts(device_id);
    }

    /// Returns true if an unexpired pairing exists for the device.
    pub fn is_trusted(&self, device_id: &str) -> SyncResult<bool> {
        self.trust.is_trusted(device_id)
    }

    /// Returns all stored pairings.
    pub fn trusted_devices(&self) -> SyncResult<Vec<TrustRecord>> {
        self.trust.trusted_devices()
    }

    /// Removes the pairing for a device.
    pub fn revoke_trust(&self, device_id: &str) -> SyncResult<()> {
        self.trust.revoke(device_id)
    }

    // === Sync ===

    /// Syncs the library with a device, driving the session to a terminal
    /// state.
    ///
    /// Idempotent per device: if a session for this device is already
    /// running, the call joins it instead of starting a second one, and
    /// every caller gets the same outcome. If a matching checkpoint from
    /// an interrupted sync exists, the transfer resumes from it.
    pub async fn sync_with_device(&self, device_id: &str) -> SyncResult<SyncSession> {
        let outcome_rx = self.join_or_spawn(device_id);
        let mut outcome_rx = outcome_rx;
        let outcome = outcome_rx
            .wait_for(|o| o.is_some())
            .await
            .map_err(|_| SyncError::Unknown("sync task ended unexpectedly".into()))?
            .clone()
            .expect("waited for a terminal outcome");

        match &outcome.failure {
            Some(e) => Err(e.duplicate()),
            None => Ok(outcome.session.clone()),
        }
    }

    /// Resumes an interrupted sync with a device.
    ///
    /// Resuming is the normal sync path with the stored checkpoint
    /// applied; with no checkpoint this is a fresh sync.
    pub async fn resume_sync(&self, device_id: &str) -> SyncResult<SyncSession> {
        self.sync_with_device(device_id).await
    }

    /// Cancels the running session for a device, if any. Returns true if
    /// a session was cancelled. Progress made so far stays checkpointed.
    pub fn cancel_sync(&self, device_id: &str) -> bool {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        match sessions.get(device_id) {
            Some(handle) if handle.is_active() => {
                // notify_one stores a permit, so a cancel that races the
                // session task's first poll is not lost
                handle.cancel.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Disconnects from a device: cancels any running session and drops
    /// it from the discovery registry. Trust is kept.
    pub fn disconnect(&self, device_id: &str) {
        self.cancel_sync(device_id);
        self.discovery.remove(device_id);
    }

    /// Returns true while a session for the device is running.
    pub fn is_sync_active(&self, device_id: &str) -> bool {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.get(device_id).is_some_and(SessionHandle::is_active)
    }

    /// Returns a receiver of progress snapshots for a device. Works
    /// before, during, and after a session; with no session it holds an
    /// idle snapshot.
    pub fn observe_sync_progress(&self, device_id: &str) -> watch::Receiver<SyncProgress> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        if let Some(handle) = sessions.get(device_id) {
            return handle.progress_rx.clone();
        }
        let (_tx, rx) = watch::channel(SyncProgress::idle(device_id));
        rx
    }

    /// Returns the most recent sessions with a device, newest first.
    pub fn session_history(&self, device_id: &str, limit: usize) -> SyncResult<Vec<SyncSession>> {
        Ok(self.storage.session_history(device_id, limit)?)
    }

    /// Returns when the device last finished a sync, if it ever did.
    pub fn last_sync_time(&self, device_id: &str) -> SyncResult<Option<u64>> {
        Ok(self.storage.last_sync_time(device_id)?)
    }

    /// Joins the active session for the device or spawns a new one.
    fn join_or_spawn(&self, device_id: &str) -> watch::Receiver<Option<Arc<Outcome>>> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        if let Some(handle) = sessions.get(device_id) {
            if handle.is_active() {
                tracing::debug!(device_id, "joining running sync session");
                return handle.outcome_rx.clone();
            }
        }

        let (progress_tx, progress_rx) = watch::channel(SyncProgress::idle(device_id));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = Arc::new(Notify::new());

        sessions.insert(
            device_id.to_string(),
            SessionHandle {
                progress_rx,
                outcome_rx: outcome_rx.clone(),
                cancel: Arc::clone(&cancel),
            },
        );

        tokio::spawn(run_session(
            device_id.to_string(),
            self.config.clone(),
            Arc::clone(&self.discovery),
            Arc::clone(&self.trust),
            Arc::clone(&self.exchanger),
            Arc::clone(&self.transfer),
            Arc::clone(&self.storage),
            progress_tx,
            outcome_tx,
            cancel,
        ));

        outcome_rx
    }
}

/// Drives one session to a terminal state and publishes the outcome.
#[allow(clippy::too_many_arguments)]
async fn run_session(
    device_id: String,
    config: SyncConfig,
    discovery: Arc<DiscoveryService>,
    trust: Arc<TrustManager>,
    exchanger: Arc<ManifestExchanger>,
    transfer: Arc<TransferEngine>,
    storage: Arc<Storage>,
    progress_tx: watch::Sender<SyncProgress>,
    outcome_tx: watch::Sender<Option<Arc<Outcome>>>,
    cancel: Arc<Notify>,
) {
    let session = Arc::new(tokio::sync::Mutex::new(SyncSession::new(&device_id)));

    let failure: Option<Arc<SyncError>> = tokio::select! {
        _ = cancel.notified() => {
            let mut s = session.lock().await;
            tracing::info!(device_id, session_id = %s.id, "sync cancelled");
            s.finish(SyncStatus::Cancelled);
            let _ = progress_tx.send(s.progress());
            Some(Arc::new(SyncError::Cancelled))
        }
        result = tokio::time::timeout(
            config.sync_timeout,
            run_pipeline(
                &device_id,
                &discovery,
                &trust,
                &exchanger,
                &transfer,
                Arc::clone(&session),
                &progress_tx,
            ),
        ) => match result {
            Err(_) => {
                let mut s = session.lock().await;
                tracing::warn!(device_id, session_id = %s.id, "sync timed out");
                s.error = Some(SyncError::Timeout.to_string());
                s.finish(SyncStatus::Failed);
                let _ = progress_tx.send(s.progress());
                Some(Arc::new(SyncError::Timeout))
            }
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                let mut s = session.lock().await;
                if !s.status.is_terminal() {
                    s.error = Some(e.to_string());
                    s.finish(SyncStatus::Failed);
                    let _ = progress_tx.send(s.progress());
                }
                Some(Arc::new(e))
            }
        }
    };

    let final_session = session.lock().await.clone();
    if let Err(e) = storage.save_session(&final_session) {
        tracing::warn!(device_id, error = %e, "failed to persist session history");
    }
    let _ = outcome_tx.send(Some(Arc::new(Outcome {
        session: final_session,
        failure,
    })));
}

/// The sync state machine up to and including the transfer.
async fn run_pipeline(
    device_id: &str,
    discovery: &DiscoveryService,
    trust: &TrustManager,
    exchanger: &ManifestExchanger,
    transfer: &TransferEngine,
    session: Arc<tokio::sync::Mutex<SyncSession>>,
    progress_tx: &watch::Sender<SyncProgress>,
) -> SyncResult<()> {
    let mut session = session.lock().await;

    session.status = SyncStatus::Discovering;
    let _ = progress_tx.send(session.progress());
    let device = discovery
        .get(device_id)
        .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))?;

    session.status = SyncStatus::Pairing;
    let _ = progress_tx.send(session.progress());
    let trusted = trust.ensure_trusted(&device).await?;

    session.status = SyncStatus::Planning;
    let _ = progress_tx.send(session.progress());
    let plan = exchanger.build_plan(&device).await?;

    transfer.run(&mut session, &trusted, &plan, progress_tx).await
}
