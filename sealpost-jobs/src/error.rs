use sealpost_spool::{JobId, SpoolError};
use thiserror::Error;

/// Errors returned by [`crate::JobQueue`] operations.
///
/// Failures inside a job body never surface here; they are handled by the
/// job's own retry and cancellation hooks.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    #[error("Failed to encode job: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode job: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("No pending or running job with id {0}")]
    NotFound(JobId),

    #[error("Job queue is shutting down")]
    ShuttingDown,
}

impl QueueError {
    /// Whether the caller may reasonably try the same operation again.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Spool(err) => err.is_temporary(),
            Self::Encode(_) | Self::Decode(_) | Self::NotFound(_) | Self::ShuttingDown => false,
        }
    }
}
