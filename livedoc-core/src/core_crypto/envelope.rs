/*
    envelope.rs - Per-frame authenticated encryption

    Every frame that crosses a peer link is sealed individually with
    ChaCha20-Poly1305.

    Wire layout: nonce (12 bytes) || ciphertext || tag (16 bytes)

    Security properties:
    - Authenticated encryption (AEAD)
    - Unique random nonce per frame
    - Room id bound as associated data, so a frame sealed for one room
      never opens in another
*/

use super::errors::{CryptoError, CryptoResult};
use super::key::RoomKey;
use crate::core_model::RoomId;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Nonce length for ChaCha20-Poly1305
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag length
pub const TAG_LEN: usize = 16;

/// Seals and opens frames for one room under one key
#[derive(Clone)]
pub struct Envelope {
    cipher: ChaCha20Poly1305,
    aad: Vec<u8>,
}

impl Envelope {
    /// Create an envelope for `room_id` using `key`
    pub fn new(room_id: &RoomId, key: &RoomKey) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        Envelope {
            cipher,
            aad: room_id.as_str().as_bytes().to_vec(),
        }
    }

    /// Encrypt a plaintext frame
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a sealed frame, failing with `AuthenticationFailed` on any tag mismatch
    pub fn decrypt(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidCiphertext(sealed.len()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("room", &String::from_utf8_lossy(&self.aad))
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` under `key` for `room_id`
pub fn encrypt(room_id: &RoomId, key: &RoomKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    Envelope::new(room_id, key).encrypt(plaintext)
}

/// Decrypt `sealed` under `key` for `room_id`
pub fn decrypt(room_id: &RoomId, key: &RoomKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    Envelope::new(room_id, key).decrypt(sealed)
}
