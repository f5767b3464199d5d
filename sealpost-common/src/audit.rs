//! Audit logging for job and delivery lifecycle events
//!
//! Events are emitted through `tracing` with a stable `event` field so that a
//! subscriber can route them to a dedicated sink.
//!
//! ## Audit Events
//!
//! - `JobEnqueued`: A job was persisted and handed to the queue
//! - `DeliveryDispatched`: A message was handed to the transport
//! - `DeliveryFailure`: A message reached a terminal failure state
//!
//! ## PII Redaction
//!
//! Recipient addresses can be redacted based on the `AuditConfig`.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging with configuration. Only the first call wins.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact a recipient address if redaction is enabled.
///
/// Email addresses keep their domain; phone numbers keep their last two
/// digits.
#[must_use]
pub fn redact_recipient(recipient: &str, redact: bool) -> String {
    if !redact {
        return recipient.to_string();
    }

    if let Some((_, domain)) = recipient.split_once('@') {
        return format!("[REDACTED]@{domain}");
    }

    let digits: Vec<char> = recipient.chars().filter(char::is_ascii_digit).collect();
    if digits.len() <= 2 {
        return "[REDACTED]".to_string();
    }

    let tail: String = digits[digits.len() - 2..].iter().collect();
    format!("[REDACTED]{tail}")
}

#[must_use]
pub fn redact_recipients(recipients: &[String], redact: bool) -> Vec<String> {
    recipients
        .iter()
        .map(|r| redact_recipient(r, redact))
        .collect()
}

/// Log job enqueued event
///
/// # Fields
/// - `job_id`: Unique job identifier (ULID)
/// - `kind`: Job kind tag
/// - `group`: Serialization group, if any
/// - `requirements`: Requirement tags the job waits on
pub fn log_job_enqueued(job_id: &str, kind: &str, group: Option<&str>, requirements: &[&str]) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "JobEnqueued",
        job_id = %job_id,
        kind = %kind,
        group = group.unwrap_or("-"),
        requirements = ?requirements,
        "Audit: Job enqueued"
    );
}

/// Log delivery dispatched event
///
/// Logged once per message when all parts were accepted by the transport.
///
/// # Fields
/// - `message_id`: Message identifier
/// - `recipients`: Recipients (redacted if configured)
/// - `parts`: Number of transport parts
/// - `secure`: Whether the payload was encrypted
pub fn log_delivery_dispatched(message_id: &str, recipients: &[String], parts: usize, secure: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    let redacted = redact_recipients(recipients, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryDispatched",
        message_id = %message_id,
        recipients = ?redacted,
        parts = parts,
        secure = secure,
        "Audit: Delivery dispatched"
    );
}

/// Log delivery failure event
///
/// # Fields
/// - `message_id`: Message identifier
/// - `error`: Error description
/// - `status`: Final message state
pub fn log_delivery_failure(message_id: &str, error: &str, status: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "DeliveryFailure",
        message_id = %message_id,
        error = %error,
        status = %status,
        "Audit: Delivery failed"
    );
}
