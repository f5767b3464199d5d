use std::path::Path;

use sealpost_common::audit::AuditConfig;
use sealpost_jobs::ExecutorConfig;
use sealpost_spool::SpoolConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaProfile;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required component: {0}")]
    Missing(&'static str),

    #[error("Spool error: {0}")]
    Spool(#[from] sealpost_spool::SpoolError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery preferences.
///
/// ```ron
/// delivery: (
///     delivery_reports_enabled: true,
///     wifi_sms_enabled: false,
///     send_retry_budget: 3,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Ask the carrier for a delivery report on every segment
    #[serde(default = "defaults::delivery_reports_enabled")]
    pub delivery_reports_enabled: bool,

    /// SMS may be sent over a data network when the radio has no service
    #[serde(default = "defaults::wifi_sms_enabled")]
    pub wifi_sms_enabled: bool,

    /// Retries a send job gets when the master secret is briefly unavailable
    #[serde(default = "defaults::send_retry_budget")]
    pub send_retry_budget: u32,

    /// Bytes per secure segment, header included
    #[serde(default = "defaults::secure_segment_capacity")]
    pub secure_segment_capacity: usize,

    /// How long an unanswered segment is tracked
    #[serde(default = "defaults::correlation_ttl_secs")]
    pub correlation_ttl_secs: u64,

    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Attachment limits of the outgoing transport
    #[serde(default)]
    pub media_profile: MediaProfile,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            delivery_reports_enabled: defaults::delivery_reports_enabled(),
            wifi_sms_enabled: defaults::wifi_sms_enabled(),
            send_retry_budget: defaults::send_retry_budget(),
            secure_segment_capacity: defaults::secure_segment_capacity(),
            correlation_ttl_secs: defaults::correlation_ttl_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
            media_profile: MediaProfile::default(),
        }
    }
}

mod defaults {
    pub const fn delivery_reports_enabled() -> bool {
        true
    }

    pub const fn wifi_sms_enabled() -> bool {
        false
    }

    pub const fn send_retry_budget() -> u32 {
        3
    }

    pub const fn secure_segment_capacity() -> usize {
        140
    }

    pub const fn correlation_ttl_secs() -> u64 {
        60 * 60
    }

    pub const fn sweep_interval_secs() -> u64 {
        60
    }
}

/// Everything needed to run a [`crate::DeliveryService`].
///
/// ```ron
/// (
///     spool: File(path: "/var/spool/sealpost"),
///     executor: (workers: 2),
///     delivery: (wifi_sms_enabled: true),
///     audit: (redact_recipients: true),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spool: SpoolConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// # Errors
    /// If `content` is not valid RON for this structure.
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)?)
    }

    /// # Errors
    /// If the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }
}
