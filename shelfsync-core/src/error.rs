// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Error Taxonomy
//!
//! Unified error type for the sync engine. Every kind maps to a stable
//! user-facing message and, where one exists, an actionable suggestion.
//!
//! Propagation policy: transient item-scoped failures are retried and
//! recovered inside the transfer engine; connection-scoped and security
//! failures surface here as the session result.

use thiserror::Error;

use crate::crypto::EncryptionError;
use crate::storage::StorageError;

/// Unified error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No usable network interface or the socket could not be opened.
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// The connection to the remote device failed or was dropped.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// PIN validation failed during pairing.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Too many consecutive failed PIN attempts; pairing is locked out.
    #[error("Too many failed attempts")]
    TooManyAttempts,

    /// The remote presented a certificate different from the pinned one.
    #[error("Certificate mismatch")]
    CertificateMismatch,

    /// The trust established with this device has expired.
    #[error("Trust expired")]
    TrustExpired,

    /// The remote speaks an incompatible protocol version.
    #[error("Incompatible version: local {local}, remote {remote}")]
    IncompatibleVersion { local: u32, remote: u32 },

    /// The transfer failed for a non-network reason.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// An operation exceeded its configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Not enough local storage to apply incoming items.
    #[error("Insufficient storage: {required} bytes required, {available} available")]
    InsufficientStorage { required: u64, available: u64 },

    /// The device is not present in the discovery registry.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A conflict could not be resolved by the active merge strategy.
    #[error("Conflict resolution failed: {0}")]
    ConflictResolutionFailed(String),

    /// Tampering or a protocol violation was detected mid-transfer.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// The operation was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payload encryption or decryption failed outside of transfer
    /// integrity checks.
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    /// Anything that does not fit the taxonomy above.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Returns true for transient failures that a retry may recover from.
    ///
    /// Security failures, authentication outcomes, and caller decisions
    /// (cancellation) are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable
                | SyncError::ConnectionFailed(_)
                | SyncError::TransferFailed(_)
                | SyncError::Timeout
        )
    }

    /// Returns true if the failure indicates tampering or a protocol
    /// violation. These abort immediately, independent of retry logic.
    pub fn is_security(&self) -> bool {
        matches!(self, SyncError::SecurityViolation(_))
    }

    /// Returns true if the failure is connection-scoped rather than
    /// item-scoped: the whole operation must be retried, not one item.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable | SyncError::ConnectionFailed(_)
        )
    }

    /// Best-effort owned copy, for fanning one failure out to every
    /// caller waiting on the same session. Variants wrapping foreign
    /// error sources collapse to `Unknown` with the rendered message.
    pub(crate) fn duplicate(&self) -> SyncError {
        match self {
            SyncError::NetworkUnavailable => SyncError::NetworkUnavailable,
            SyncError::ConnectionFailed(msg) => SyncError::ConnectionFailed(msg.clone()),
            SyncError::AuthenticationFailed => SyncError::AuthenticationFailed,
            SyncError::TooManyAttempts => SyncError::TooManyAttempts,
            SyncError::CertificateMismatch => SyncError::CertificateMismatch,
            SyncError::TrustExpired => SyncError::TrustExpired,
            SyncError::IncompatibleVersion { local, remote } => SyncError::IncompatibleVersion {
                local: *local,
                remote: *remote,
            },
            SyncError::TransferFailed(msg) => SyncError::TransferFailed(msg.clone()),
            SyncError::Timeout => SyncError::Timeout,
            SyncError::InsufficientStorage {
                required,
                available,
            } => SyncError::InsufficientStorage {
                required: *required,
                available: *available,
            },
            SyncError::DeviceNotFound(id) => SyncError::DeviceNotFound(id.clone()),
            SyncError::ConflictResolutionFailed(msg) => {
                SyncError::ConflictResolutionFailed(msg.clone())
            }
            SyncError::SecurityViolation(msg) => SyncError::SecurityViolation(msg.clone()),
            SyncError::Cancelled => SyncError::Cancelled,
            SyncError::Storage(e) => SyncError::Unknown(format!("Storage error: {e}")),
            SyncError::Encryption(e) => SyncError::Unknown(format!("Encryption error: {e}")),
            SyncError::Unknown(msg) => SyncError::Unknown(msg.clone()),
        }
    }

    /// Stable user-facing message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::NetworkUnavailable => "No network connection available".into(),
            SyncError::ConnectionFailed(_) => "Could not connect to the other device".into(),
            SyncError::AuthenticationFailed => "The PIN you entered is incorrect".into(),
            SyncError::TooManyAttempts => "Too many failed PIN attempts".into(),
            SyncError::CertificateMismatch => {
                "The other device's identity has changed since it was paired".into()
            }
            SyncError::TrustExpired => "The pairing with this device has expired".into(),
            SyncError::IncompatibleVersion { local, remote } => format!(
                "App versions are incompatible (this device: {local}, other device: {remote})"
            ),
            SyncError::TransferFailed(_) => "The sync transfer failed".into(),
            SyncError::Timeout => "The operation took too long and was aborted".into(),
            SyncError::InsufficientStorage { required, .. } => {
                format!("Not enough storage space ({required} bytes needed)")
            }
            SyncError::DeviceNotFound(name) => format!("Device '{name}' is no longer visible"),
            SyncError::ConflictResolutionFailed(_) => {
                "Some items conflict and need manual resolution".into()
            }
            SyncError::SecurityViolation(_) => {
                "A security problem was detected and the sync was stopped".into()
            }
            SyncError::Cancelled => "Sync cancelled".into(),
            SyncError::Storage(_) => "A local storage problem interrupted the sync".into(),
            SyncError::Encryption(_) => "Encrypted data could not be processed".into(),
            SyncError::Unknown(_) => "Something went wrong".into(),
        }
    }

    /// Actionable suggestion for the user, if one exists.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            SyncError::NetworkUnavailable => {
                Some("Check that both devices are on the same Wi-Fi network".into())
            }
            SyncError::ConnectionFailed(_) => {
                Some("Make sure the other device has sync open and try again".into())
            }
            SyncError::AuthenticationFailed => {
                Some("Check the PIN shown on the other device".into())
            }
            SyncError::TooManyAttempts => {
                Some("Wait a few minutes before trying to pair again".into())
            }
            SyncError::CertificateMismatch => {
                Some("If you recently reinstalled the app on the other device, pair it again".into())
            }
            SyncError::TrustExpired => Some("Pair the devices again to continue syncing".into()),
            SyncError::IncompatibleVersion { .. } => {
                Some("Update both devices to the latest version".into())
            }
            SyncError::TransferFailed(_) => Some("Try the sync again".into()),
            SyncError::Timeout => {
                Some("Move the devices closer to the router and try again".into())
            }
            SyncError::InsufficientStorage { .. } => {
                Some("Free up storage space and try again".into())
            }
            SyncError::DeviceNotFound(_) => {
                Some("Make sure the other device is awake and on the same network".into())
            }
            SyncError::ConflictResolutionFailed(_) => {
                Some("Review the conflicting items and choose which version to keep".into())
            }
            SyncError::SecurityViolation(_) => {
                Some("Verify both devices and pair them again before syncing".into())
            }
            SyncError::Cancelled => None,
            SyncError::Storage(_) | SyncError::Encryption(_) | SyncError::Unknown(_) => {
                Some("Try again, or contact support if the problem persists".into())
            }
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
