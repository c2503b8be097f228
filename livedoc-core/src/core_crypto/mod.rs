//! Encryption envelope
//!
//! Key provisioning (password-derived or link-secret), per-frame AEAD, the
//! one-way access proof checked by the relay, and the join link format that
//! carries secrets only in its URL fragment.

pub mod envelope;
pub mod errors;
pub mod key;
pub mod link;
pub mod proof;

pub use envelope::{decrypt, encrypt, Envelope};
pub use errors::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_key, generate_salt, KdfParams, RoomKey};
pub use link::{JoinLink, LinkSecret};
pub use proof::AccessProof;
