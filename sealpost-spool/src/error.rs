//! Error types for the sealpost-spool crate.

use std::io;

use thiserror::Error;

use crate::JobId;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Job not found in spool.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Spool directory validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, capacity, injected failures).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Job already exists in spool.
    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),
}

impl SpoolError {
    /// Whether retrying the same operation later could succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Internal(_))
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Decoding consumed fewer bytes than the file holds.
    #[error("Corrupted job record: {0}")]
    Corrupted(String),
}

/// Spool directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Spool path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
