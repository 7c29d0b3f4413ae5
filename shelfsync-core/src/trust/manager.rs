// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trust Manager
//!
//! Drives PIN-authenticated pairing handshakes, enforces PIN lockout,
//! verifies pinned certificates on every reconnect, and gates sync on
//! trust expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{SyncConfig, PROTOCOL_VERSION};
use crate::crypto::SymmetricKey;
use crate::discovery::{now_millis, DeviceInfo};
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::storage::Storage;
use crate::transport::{PairingRequest, SyncTransport};

use super::pinning::Fingerprint;
use super::proof::{self, PinKey};
use super::TrustRecord;

/// A device with established, unexpired trust.
#[derive(Debug, Clone)]
pub struct TrustedDevice {
    /// The trusted device id.
    pub device_id: String,
    /// Pinned certificate fingerprint.
    pub fingerprint: Fingerprint,
    /// Session key for payload encryption.
    pub session_key: SymmetricKey,
    /// When pairing completed (Unix milliseconds).
    pub trusted_at: u64,
    /// When trust expires (Unix milliseconds).
    pub expires_at: u64,
}

impl From<TrustRecord> for TrustedDevice {
    fn from(record: TrustRecord) -> Self {
        TrustedDevice {
            device_id: record.device_id,
            fingerprint: record.fingerprint,
            session_key: record.session_key,
            trusted_at: record.trusted_at,
            expires_at: record.expires_at,
        }
    }
}

/// Failed-PIN bookkeeping for one device.
struct AttemptWindow {
    failures: u32,
    window_start: u64,
}

/// Manages pairing, certificate pinning, and trust lifetime.
pub struct TrustManager {
    storage: Arc<Storage>,
    transport: Arc<dyn SyncTransport>,
    max_pin_attempts: u32,
    pin_lockout_window: Duration,
    trust_lifetime: Duration,
    pairing_timeout: Duration,
    retry: RetryPolicy,
    attempts: Mutex<HashMap<String, AttemptWindow>>,
}

impl TrustManager {
    /// Creates a trust manager over the given storage and transport.
    pub fn new(
        storage: Arc<Storage>,
        transport: Arc<dyn SyncTransport>,
        config: &SyncConfig,
    ) -> Self {
        TrustManager {
            storage,
            transport,
            max_pin_attempts: config.max_pin_attempts,
            pin_lockout_window: config.pin_lockout_window,
            trust_lifetime: config.trust_lifetime,
            pairing_timeout: config.pairing_timeout,
            retry: RetryPolicy::new(config.operation_retry_limit, config.backoff_base),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Pairs with a device using the displayed PIN.
    ///
    /// Establishes trust: pins the remote certificate, derives the shared
    /// session key, and persists the trust record. Replaces any previous
    /// record for the device, so an explicit re-pair also recovers from a
    /// rotated certificate.
    pub async fn pair(&self, device: &DeviceInfo, pin: &str) -> SyncResult<TrustedDevice> {
        self.check_lockout(&device.device_id)?;

        let result = tokio::time::timeout(self.pairing_timeout, self.handshake(device, pin))
            .await
            .map_err(|_| SyncError::Timeout)?;

        match result {
            Ok(trusted) => {
                self.reset_attempts(&device.device_id);
                Ok(trusted)
            }
            Err(SyncError::AuthenticationFailed) => {
                Err(self.record_failure(&device.device_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Verifies existing trust for a sync without re-pairing.
    ///
    /// Greets the device, checks the presented certificate against the
    /// pinned fingerprint, and rejects expired trust. A fingerprint
    /// mismatch preserves the stored record; only an explicit [`pair`]
    /// replaces it.
    ///
    /// [`pair`]: TrustManager::pair
    pub async fn ensure_trusted(&self, device: &DeviceInfo) -> SyncResult<TrustedDevice> {
        let record = self
            .storage
            .load_trust_record(&device.device_id)?
            .ok_or(SyncError::AuthenticationFailed)?;

        if record.is_expired(now_millis()) {
            tracing::info!(device_id = %device.device_id, "trust expired, re-pairing required");
            return Err(SyncError::TrustExpired);
        }

        let hello = self
            .retry
            .run(
                || self.transport.hello(device),
                SyncError::is_retryable,
                |_, _| {},
            )
            .await?;

        let presented = Fingerprint::from_der(&hello.certificate_der);
        if presented != record.fingerprint {
            tracing::warn!(
                device_id = %device.device_id,
                pinned = %record.fingerprint,
                presented = %presented,
                "certificate fingerprint mismatch"
            );
            return Err(SyncError::CertificateMismatch);
        }

        Ok(record.into())
    }

    /// Returns true if an unexpired trust record exists for the device.
    pub fn is_trusted(&self, device_id: &str) -> SyncResult<bool> {
        match self.storage.load_trust_record(device_id)? {
            Some(record) => Ok(!record.is_expired(now_millis())),
            None => Ok(false),
        }
    }

    /// Returns all stored trust records.
    pub fn trusted_devices(&self) -> SyncResult<Vec<TrustRecord>> {
        Ok(self.storage.list_trust_records()?)
    }

    /// Removes trust for a device. Future syncs require pairing again.
    pub fn revoke(&self, device_id: &str) -> SyncResult<()> {
        self.storage.delete_trust_record(device_id)?;
        self.reset_attempts(device_id);
        Ok(())
    }

    /// Clears the failed-PIN counter for a device, ending any lockout.
    pub fn reset_attempts(&self, device_id: &str) {
        let mut attempts = self.attempts.lock().expect("attempt lock poisoned");
        attempts.remove(device_id);
    }

    async fn handshake(&self, device: &DeviceInfo, pin: &str) -> SyncResult<TrustedDevice> {
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
        let hello_fingerprint = Fingerprint::from_der(&hello.certificate_der);

        let challenge = self
            .retry
            .run(
                || self.transport.pair_challenge(device),
                SyncError::is_retryable,
                |_, _| {},
            )
            .await?;

        let pin_key = PinKey::derive(pin, &challenge.salt);
        let initiator_nonce = proof::random_nonce();
        let request = PairingRequest {
            device_id: device.device_id.clone(),
            proof: pin_key.prove(&challenge.nonce),
            initiator_nonce,
        };

        let response = self
            .retry
            .run(
                || self.transport.pair(device, request.clone()),
                SyncError::is_retryable,
                |_, _| {},
            )
            .await?;

        // The certificate presented in the hello and the one returned by
        // the pairing handshake must agree.
        let fingerprint = Fingerprint::from_der(&response.certificate_der);
        if fingerprint != hello_fingerprint {
            return Err(SyncError::SecurityViolation(
                "certificate changed during pairing handshake".into(),
            ));
        }

        let session_key = pin_key.derive_session_key(
            &challenge.nonce,
            &initiator_nonce,
            &response.responder_nonce,
        );

        let trusted_at = now_millis();
        let record = TrustRecord {
            device_id: device.device_id.clone(),
            fingerprint,
            session_key: session_key.clone(),
            trusted_at,
            expires_at: trusted_at + self.trust_lifetime.as_millis() as u64,
        };
        self.storage.save_trust_record(&record)?;
        tracing::info!(device_id = %device.device_id, fingerprint = %fingerprint, "device paired");

        Ok(record.into())
    }

    /// Rejects pairing while the device is locked out. An expired window
    /// clears the counter.
    fn check_lockout(&self, device_id: &str) -> SyncResult<()> {
        let mut attempts = self.attempts.lock().expect("attempt lock poisoned");
        if let Some(window) = attempts.get(device_id) {
            let elapsed = now_millis().saturating_sub(window.window_start);
            if elapsed >= self.pin_lockout_window.as_millis() as u64 {
                attempts.remove(device_id);
            } else if window.failures >= self.max_pin_attempts {
                return Err(SyncError::TooManyAttempts);
            }
        }
        Ok(())
    }

    /// Counts a failed PIN. Returns the error the caller should surface:
    /// `TooManyAttempts` once the limit is reached, otherwise
    /// `AuthenticationFailed`.
    fn record_failure(&self, device_id: &str) -> SyncError {
        let mut attempts = self.attempts.lock().expect("attempt lock poisoned");
        let window = attempts
            .entry(device_id.to_string())
            .or_insert_with(|| AttemptWindow {
                failures: 0,
                window_start: now_millis(),
            });
        window.failures += 1;
        tracing::warn!(
            device_id,
            failures = window.failures,
            "pairing PIN rejected"
        );

        if window.failures >= self.max_pin_attempts {
            SyncError::TooManyAttempts
        } else {
            SyncError::AuthenticationFailed
        }
    }
}
