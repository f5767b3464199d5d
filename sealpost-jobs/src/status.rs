use std::time::Duration;

use sealpost_spool::JobId;

/// Lifecycle of a job inside the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running { attempt: u32 },
    Succeeded,
    FailedRetryable { attempt: u32, retry_in: Duration },
    FailedTerminal { reason: String },
    Canceled,
}

impl JobStatus {
    /// The job has left the queue for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedTerminal { .. } | Self::Canceled
        )
    }
}

/// A status transition, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub id: JobId,
    pub kind: &'static str,
    pub status: JobStatus,
}

/// Result of [`crate::JobQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed before it started. The compensating hook has run.
    Canceled,
    /// Already running. The job sees the request at its next checkpoint and
    /// will not be retried.
    Signalled,
}
