//! Requirement-gated, durable job execution.
//!
//! A [`JobQueue`] accepts [`Job`]s, persists them through a
//! [`sealpost_spool::BackingStore`], and runs each one once its requirements
//! hold. Jobs sharing a group run one at a time in enqueue order.

pub mod config;
pub mod error;
pub mod job;
pub mod parameters;
pub mod policy;
pub mod queue;
pub mod status;

pub use config::ExecutorConfig;
pub use error::QueueError;
pub use job::{CancelReason, Job, RunContext};
pub use parameters::{JobParameters, JobParametersBuilder};
pub use policy::RetryPolicy;
pub use queue::JobQueue;
pub use sealpost_spool::JobId;
pub use status::{CancelOutcome, JobEvent, JobStatus};
