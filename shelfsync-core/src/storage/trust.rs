// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trust record storage operations.
//!
//! Session keys are encrypted with the storage key before hitting disk;
//! fingerprints and timestamps are stored in the clear.

use rusqlite::params;

use super::{Storage, StorageError};
use crate::crypto::{self, SymmetricKey};
use crate::trust::{Fingerprint, TrustRecord};

impl Storage {
    /// Saves a trust record, replacing any previous record for the device.
    pub fn save_trust_record(&self, record: &TrustRecord) -> Result<(), StorageError> {
        let key_enc = crypto::encrypt(&self.encryption_key, record.session_key.as_bytes())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO trust_records
                 (device_id, fingerprint, session_key_enc, trusted_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.device_id,
                record.fingerprint.to_hex(),
                key_enc,
                record.trusted_at as i64,
                record.expires_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Loads the trust record for a device, if one exists.
    pub fn load_trust_record(&self, device_id: &str) -> Result<Option<TrustRecord>, StorageError> {
        let row = {
            let conn = self.lock_conn();
            let result = conn.query_row(
                "SELECT fingerprint, session_key_enc, trusted_at, expires_at
                 FROM trust_records WHERE device_id = ?1",
                params![device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            );
            match result {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(StorageError::Database(e)),
            }
        };

        Ok(Some(self.trust_record_from_row(device_id.to_string(), row)?))
    }

    /// Returns all stored trust records.
    pub fn list_trust_records(&self) -> Result<Vec<TrustRecord>, StorageError> {
        let rows = {
            let conn = self.lock_conn();
            let mut stmt = conn.prepare(
                "SELECT device_id, fingerprint, session_key_enc, trusted_at, expires_at
                 FROM trust_records ORDER BY device_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        (
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ),
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(device_id, row)| self.trust_record_from_row(device_id, row))
            .collect()
    }

    /// Deletes the trust record for a device. Returns true if one existed.
    pub fn delete_trust_record(&self, device_id: &str) -> Result<bool, StorageError> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM trust_records WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(deleted > 0)
    }

    fn trust_record_from_row(
        &self,
        device_id: String,
        (fingerprint_hex, key_enc, trusted_at, expires_at): (String, Vec<u8>, i64, i64),
    ) -> Result<TrustRecord, StorageError> {
        let fingerprint = Fingerprint::from_hex(&fingerprint_hex)
            .ok_or_else(|| StorageError::Serialization("invalid fingerprint hex".into()))?;

        let key_bytes = crypto::decrypt(&self.encryption_key, &key_enc)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| StorageError::Encryption("invalid session key length".into()))?;

        Ok(TrustRecord {
            device_id,
            fingerprint,
            session_key: SymmetricKey::from_bytes(key_bytes),
            trusted_at: trusted_at as u64,
            expires_at: expires_at as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device_id: &str) -> TrustRecord {
        TrustRecord {
            device_id: device_id.into(),
            fingerprint: Fingerprint::from_der(b"certificate"),
            session_key: SymmetricKey::generate(),
            trusted_at: 1_000,
            expires_at: 2_000,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        let saved = record("device-1");
        storage.save_trust_record(&saved).unwrap();

        let loaded = storage.load_trust_record("device-1").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, saved.fingerprint);
        assert_eq!(loaded.session_key.as_bytes(), saved.session_key.as_bytes());
        assert_eq!(loaded.expires_at, 2_000);
    }

    #[test]
    fn test_load_missing_is_none() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        assert!(storage.load_trust_record("nobody").unwrap().is_none());
    }

    #[test]
    fn test_replace_existing_record() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        storage.save_trust_record(&record("device-1")).unwrap();

        let mut rotated = record("device-1");
        rotated.fingerprint = Fingerprint::from_der(b"new certificate");
        storage.save_trust_record(&rotated).unwrap();

        let loaded = storage.load_trust_record("device-1").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, rotated.fingerprint);
        assert_eq!(storage.list_trust_records().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_record() {
        let storage = Storage::in_memory(SymmetricKey::generate()).unwrap();
        storage.save_trust_record(&record("device-1")).unwrap();

        assert!(storage.delete_trust_record("device-1").unwrap());
        assert!(!storage.delete_trust_record("device-1").unwrap());
        assert!(storage.load_trust_record("device-1").unwrap().is_none());
    }
}
