use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// Executor settings.
///
/// ```ron
/// executor: (
///     workers: 4,
///     retry: (base_retry_delay_ms: 1000),
///     shutdown_timeout_secs: 30,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of job bodies running at once
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long a shutdown waits for in-flight jobs before abandoning them to
    /// the next restart
    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            retry: RetryPolicy::default(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
        }
    }
}

mod defaults {
    pub const fn workers() -> usize {
        4
    }

    pub const fn shutdown_timeout_secs() -> u64 {
        30
    }
}
