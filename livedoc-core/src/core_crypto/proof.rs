/*
    proof.rs - One-way access proof for password-protected rooms

    proof = hex(SHA-256("{room_id}:{password}:{salt}"))

    The relay stores the proof computed by the host and compares it with the
    one a joining client computes. The proof reveals nothing about the
    password or about the room key (which is derived with Argon2id instead).
*/

use crate::core_model::RoomId;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 commitment over room id, password and salt
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessProof(String);

impl AccessProof {
    /// Compute the proof for a room/password/salt triple
    pub fn compute(room_id: &RoomId, password: &SecretString, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(room_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(password.expose_secret().as_bytes());
        hasher.update(b":");
        hasher.update(salt.as_bytes());
        AccessProof(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-encoded proof (e.g. taken from a join link)
    pub fn from_hex(encoded: impl Into<String>) -> Option<Self> {
        let encoded = encoded.into().to_ascii_lowercase();
        let valid = encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit());
        valid.then_some(AccessProof(encoded))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Compare without short-circuiting on the first differing byte
    pub fn matches(&self, other: &AccessProof) -> bool {
        let a = self.0.as_bytes();
        let b = other.0.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for AccessProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A prefix is enough to correlate log lines.
        write!(f, "AccessProof({}…)", &self.0[..8.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_proof_is_deterministic() {
        let room = RoomId::new("room-1");
        let a = AccessProof::compute(&room, &secret("correcthorse1"), "aabbcc");
        let b = AccessProof::compute(&room, &secret("correcthorse1"), "aabbcc");
        assert!(a.matches(&b));
        assert_eq!(a.as_hex().len(), 64);
    }

    #[test]
    fn test_proof_depends_on_every_input() {
        let base = AccessProof::compute(&RoomId::new("r"), &secret("pw"), "salt");
        assert!(!base.matches(&AccessProof::compute(&RoomId::new("q"), &secret("pw"), "salt")));
        assert!(!base.matches(&AccessProof::compute(&RoomId::new("r"), &secret("px"), "salt")));
        assert!(!base.matches(&AccessProof::compute(&RoomId::new("r"), &secret("pw"), "salu")));
    }

    #[test]
    fn test_proof_does_not_contain_password() {
        let proof = AccessProof::compute(&RoomId::new("r"), &secret("correcthorse1"), "salt");
        assert!(!proof.as_hex().contains("correcthorse1"));
        assert!(!format!("{:?}", proof).contains("correcthorse1"));
    }

    #[test]
    fn test_from_hex_validation() {
        let proof = AccessProof::compute(&RoomId::new("r"), &secret("pw"), "salt");
        let parsed = AccessProof::from_hex(proof.as_hex().to_uppercase()).unwrap();
        assert!(parsed.matches(&proof));

        assert!(AccessProof::from_hex("xyz").is_none());
        assert!(AccessProof::from_hex("ab".repeat(31)).is_none());
    }
}
