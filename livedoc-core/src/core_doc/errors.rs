/*
    errors.rs - Error types for the shared document
*/

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocError {
    /// Update failed validation and was rejected as a whole
    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    /// Edit position outside the current text
    #[error("Position {pos} out of range for text of length {len}")]
    InvalidPosition { pos: usize, len: usize },

    /// State or snapshot could not be encoded/decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Snapshot written by an unknown format version
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DocError {
    fn from(err: std::io::Error) -> Self {
        DocError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::Encoding(err.to_string())
    }
}

impl From<bincode::Error> for DocError {
    fn from(err: bincode::Error) -> Self {
        DocError::Encoding(err.to_string())
    }
}

pub type DocResult<T> = Result<T, DocError>;
