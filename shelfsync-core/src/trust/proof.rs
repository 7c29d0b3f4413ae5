// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! PIN Proof and Session Key Derivation
//!
//! The pairing PIN never crosses the wire. Both sides derive a proof key
//! from the PIN with HKDF, the initiator proves knowledge of the PIN with
//! an HMAC over the challenge nonce, and both sides independently derive
//! the same session key from the proof key and the handshake nonces.

use ring::{hkdf, hmac};
use zeroize::Zeroize;

use crate::crypto::SymmetricKey;

/// Domain separation labels for the two HKDF expansions.
const PROOF_KEY_INFO: &[u8] = b"shelfsync pairing proof v1";
const SESSION_KEY_INFO: &[u8] = b"shelfsync session key v1";

/// Key material derived from the pairing PIN. Zeroized on drop.
pub struct PinKey {
    bytes: [u8; 32],
}

impl Drop for PinKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl PinKey {
    /// Derives the proof key from the PIN and the challenge salt.
    pub fn derive(pin: &str, salt: &[u8; 16]) -> Self {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
        let prk = salt.extract(pin.as_bytes());
        let okm = prk
            .expand(&[PROOF_KEY_INFO], hkdf::HKDF_SHA256)
            .expect("HKDF expand with fixed-length output cannot fail");

        let mut bytes = [0u8; 32];
        okm.fill(&mut bytes)
            .expect("HKDF fill with fixed-length output cannot fail");
        PinKey { bytes }
    }

    /// Computes the HMAC proof over the challenge nonce.
    pub fn prove(&self, challenge_nonce: &[u8; 32]) -> [u8; 32] {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.bytes);
        let tag = hmac::sign(&key, challenge_nonce);

        let mut proof = [0u8; 32];
        proof.copy_from_slice(tag.as_ref());
        proof
    }

    /// Verifies a proof against the challenge nonce in constant time.
    pub fn verify(&self, challenge_nonce: &[u8; 32], proof: &[u8; 32]) -> bool {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.bytes);
        hmac::verify(&key, challenge_nonce, proof).is_ok()
    }

    /// Derives the shared session key from the handshake nonces.
    ///
    /// Both sides call this with the same inputs after the proof checks
    /// out, so the key itself never crosses the wire.
    pub fn derive_session_key(
        &self,
        challenge_nonce: &[u8; 32],
        initiator_nonce: &[u8; 32],
        responder_nonce: &[u8; 32],
    ) -> SymmetricKey {
        let mut transcript = Vec::with_capacity(96);
        transcript.extend_from_slice(challenge_nonce);
        transcript.extend_from_slice(initiator_nonce);
        transcript.extend_from_slice(responder_nonce);

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &transcript);
        let prk = salt.extract(&self.bytes);
        let okm = prk
            .expand(&[SESSION_KEY_INFO], hkdf::HKDF_SHA256)
            .expect("HKDF expand with fixed-length output cannot fail");

        let mut key = [0u8; 32];
        okm.fill(&mut key)
            .expect("HKDF fill with fixed-length output cannot fail");
        SymmetricKey::from_bytes(key)
    }
}

/// Generates a random nonce for the handshake.
pub fn random_nonce() -> [u8; 32] {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut nonce = [0u8; 32];
    rng.fill(&mut nonce).expect("System RNG should not fail");
    nonce
}

/// Generates a random salt for PIN key derivation.
pub fn random_salt() -> [u8; 16] {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut salt = [0u8; 16];
    rng.fill(&mut salt).expect("System RNG should not fail");
    salt
}
