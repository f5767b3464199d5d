use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use sealpost_spool::JobId;
use serde::{Serialize, de::DeserializeOwned};

use crate::JobParameters;

/// Why a job's compensating hook is being run.
#[derive(Debug)]
pub enum CancelReason<'a, E> {
    /// Canceled by a caller, either before it started or while it was running.
    Canceled,
    /// The job failed with an error it does not want retried.
    Failed(&'a E),
    /// The job kept failing with a retryable error until the budget ran out.
    RetriesExhausted(&'a E),
    /// The job body panicked.
    Panicked,
}

impl<E: std::fmt::Display> std::fmt::Display for CancelReason<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canceled => f.write_str("canceled"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::RetriesExhausted(err) => write!(f, "retries exhausted: {err}"),
            Self::Panicked => f.write_str("panicked"),
        }
    }
}

/// Per-attempt information handed to [`Job::on_run`].
#[derive(Debug, Clone)]
pub struct RunContext {
    job_id: JobId,
    attempt: u32,
    canceled: Arc<AtomicBool>,
}

impl RunContext {
    pub(crate) const fn new(job_id: JobId, attempt: u32, canceled: Arc<AtomicBool>) -> Self {
        Self {
            job_id,
            attempt,
            canceled,
        }
    }

    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Cancellation checkpoint. Jobs are never preempted; a long-running body
    /// should consult this between steps and stop early when it returns true.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// A unit of deferred work.
///
/// The job value itself is what gets persisted, so it should carry ids and
/// flags rather than handles. Everything the job needs at run time lives in
/// [`Job::Context`], which the queue shares between all jobs.
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Context: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable tag used in logs and persisted records.
    fn kind(&self) -> &'static str;

    fn parameters(&self) -> JobParameters;

    /// Runs once, after the job is persisted and before it becomes visible to
    /// the scheduler.
    async fn on_added(&self, _context: &Self::Context) {}

    /// The job body. Must be safe to re-enter after a restart.
    async fn on_run(&self, context: &Self::Context, run: &RunContext) -> Result<(), Self::Error>;

    /// Whether `error` is worth another attempt, budget permitting.
    fn should_retry(&self, error: &Self::Error) -> bool;

    /// Compensating hook. Runs exactly once for every job that does not
    /// succeed.
    async fn on_canceled(&self, context: &Self::Context, reason: CancelReason<'_, Self::Error>);
}
