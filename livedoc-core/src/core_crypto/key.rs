/*
    key.rs - Room key material

    A room key is a 256-bit symmetric key, provisioned one of two ways:
    - password mode: Argon2id(password, salt), deterministic given the salt
    - link-secret mode: random bytes carried only in the join URL fragment

    Keys are zeroized on drop and never printed.
*/

use super::errors::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a room key in bytes
pub const KEY_LEN: usize = 32;

/// Length of a freshly generated password salt in bytes
pub const SALT_LEN: usize = 16;

/// Argon2 refuses salts shorter than this
const MIN_SALT_LEN: usize = 8;

/// Symmetric key shared by every participant of a room
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoomKey([u8; KEY_LEN]);

impl RoomKey {
    /// Create a key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        RoomKey(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encode for the join URL fragment (base64url, unpadded)
    pub fn to_fragment(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Decode a key taken from a join URL fragment
    pub fn from_fragment(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidEncoding(format!(
                "expected {} key bytes, got {}",
                KEY_LEN, len
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(RoomKey(bytes))
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(<redacted>)")
    }
}

/// Argon2id cost parameters.
///
/// Every participant of a deployment must use the same parameters, otherwise
/// password-mode keys will not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Generate a cryptographically random key (link-secret mode)
pub fn generate_key() -> RoomKey {
    let mut bytes = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut bytes);
    RoomKey(bytes)
}

/// Generate a fresh hex-encoded password salt
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Derive the room key from a password and the room's salt (password mode)
pub fn derive_key(password: &SecretString, salt: &str, params: &KdfParams) -> CryptoResult<RoomKey> {
    let salt_bytes =
        hex::decode(salt).map_err(|e| CryptoError::InvalidEncoding(format!("salt: {}", e)))?;
    if salt_bytes.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be at least {} bytes",
            MIN_SALT_LEN
        )));
    }

    let mut bytes = [0u8; KEY_LEN];
    params
        .argon2()?
        .hash_password_into(password.expose_secret().as_bytes(), &salt_bytes, &mut bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(RoomKey(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_generate_key_is_random() {
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn test_derive_key_is_deterministic_for_salt() {
        let password = SecretString::new("correcthorse1".to_string());
        let salt = generate_salt();

        let a = derive_key(&password, &salt, &cheap()).unwrap();
        let b = derive_key(&password, &salt, &cheap()).unwrap();
        assert_eq!(a, b);

        let other_salt = generate_salt();
        let c = derive_key(&password, &other_salt, &cheap()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_derive_key_differs_by_password() {
        let salt = generate_salt();
        let a = derive_key(&SecretString::new("one".to_string()), &salt, &cheap()).unwrap();
        let b = derive_key(&SecretString::new("two".to_string()), &salt, &cheap()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_rejects_bad_salt() {
        let password = SecretString::new("pw".to_string());
        assert!(derive_key(&password, "not-hex", &cheap()).is_err());
        assert!(derive_key(&password, "abcd", &cheap()).is_err());
    }

    #[test]
    fn test_fragment_round_trip_and_validation() {
        let key = generate_key();
        let restored = RoomKey::from_fragment(&key.to_fragment()).unwrap();
        assert_eq!(key, restored);

        assert!(RoomKey::from_fragment("short").is_err());
        assert!(RoomKey::from_fragment("!!!").is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = RoomKey::from_bytes([7u8; KEY_LEN]);
        let printed = format!("{:?}", key);
        assert_eq!(printed, "RoomKey(<redacted>)");
        assert!(!printed.contains('7'));
    }
}
