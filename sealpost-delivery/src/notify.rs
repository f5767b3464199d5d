use async_trait::async_trait;
use tracing::warn;

use crate::record::ThreadId;

/// User-visible delivery failure alerts.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    async fn delivery_failed(&self, thread: ThreadId, recipients: &[String]);
}

/// A [`Notifier`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn delivery_failed(&self, thread: ThreadId, recipients: &[String]) {
        warn!(thread = %thread, recipients = recipients.len(), "Message delivery failed");
    }
}
