/*
    errors.rs - Error types for the encryption envelope
*/

use thiserror::Error;

/// Errors that can occur while deriving keys or sealing/opening frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag check failed (wrong key, tampered frame, or wrong room)
    #[error("Authentication failed: frame could not be decrypted")]
    AuthenticationFailed,

    /// Ciphertext is too short to contain a nonce and tag
    #[error("Invalid ciphertext length: {0} bytes")]
    InvalidCiphertext(usize),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Key or proof encoding is invalid
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Join link could not be parsed
    #[error("Invalid join link: {0}")]
    InvalidLink(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
