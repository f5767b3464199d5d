//! The jobs this crate runs on a [`sealpost_jobs::JobQueue`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use sealpost_jobs::{CancelReason, Job, JobParameters, RunContext};
use serde::{Deserialize, Serialize};

use crate::{
    account::{AccountManager, PreKeyGenerator},
    config::DeliveryConfig,
    crypto::{KeyCache, SessionCipher},
    error::DeliveryError,
    multipart::MultipartHandler,
    notify::Notifier,
    record::{DeliveryRecord, MessageId},
    store::MessageStore,
    transport::{EventSink, TransportAdapter},
};

mod refresh_prekeys;
mod sms_send;

pub use refresh_prekeys::{PREKEY_MINIMUM, RefreshPreKeysJob};
pub use sms_send::SmsSendJob;

/// Collaborators shared by every [`OutboundJob`].
#[derive(Debug)]
pub struct DeliveryContext {
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) keys: Arc<KeyCache>,
    pub(crate) sessions: Arc<dyn SessionCipher>,
    pub(crate) transport: Arc<dyn TransportAdapter>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) accounts: Arc<dyn AccountManager>,
    pub(crate) pre_keys: Arc<dyn PreKeyGenerator>,
    pub(crate) events: EventSink,
    pub(crate) config: DeliveryConfig,
    pub(crate) multipart: MultipartHandler,
    dispatches: AtomicU64,
}

impl DeliveryContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn MessageStore>,
        keys: Arc<KeyCache>,
        sessions: Arc<dyn SessionCipher>,
        transport: Arc<dyn TransportAdapter>,
        notifier: Arc<dyn Notifier>,
        accounts: Arc<dyn AccountManager>,
        pre_keys: Arc<dyn PreKeyGenerator>,
        events: EventSink,
        config: DeliveryConfig,
    ) -> Self {
        // Seeded from the clock so dispatch numbers stay unique across restarts.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok())
            .unwrap_or_default();

        Self {
            multipart: MultipartHandler::new(config.secure_segment_capacity),
            store,
            keys,
            sessions,
            transport,
            notifier,
            accounts,
            pre_keys,
            events,
            config,
            dispatches: AtomicU64::new(seed),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Callbacks for platform glue that only gets tokens back.
    #[must_use]
    pub const fn events(&self) -> &EventSink {
        &self.events
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Who to tell that `record` failed: everyone in its thread, or its own
    /// recipients if the thread cannot be read.
    pub(crate) async fn thread_recipients(&self, record: &DeliveryRecord) -> Vec<String> {
        match self.store.thread_recipients(record.thread_id).await {
            Ok(recipients) if !recipients.is_empty() => recipients,
            Ok(_) => record.recipients.clone(),
            Err(err) => {
                tracing::warn!(thread_id = %record.thread_id, error = %err, "Failed to read thread recipients");
                record.recipients.clone()
            }
        }
    }

    pub(crate) fn next_dispatch(&self) -> u64 {
        self.dispatches.fetch_add(1, Ordering::Relaxed)
    }
}

/// Every job kind the delivery service runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundJob {
    SmsSend(SmsSendJob),
    RefreshPreKeys(RefreshPreKeysJob),
}

impl OutboundJob {
    /// Send a stored message. `group` orders sends, usually per recipient.
    #[must_use]
    pub fn delivery(message_id: MessageId, group: impl Into<String>, config: &DeliveryConfig) -> Self {
        Self::SmsSend(SmsSendJob::new(message_id, group, config))
    }

    /// Top up the pre-keys held by the push server.
    #[must_use]
    pub const fn maintenance() -> Self {
        Self::RefreshPreKeys(RefreshPreKeysJob)
    }
}

#[async_trait]
impl Job for OutboundJob {
    type Context = DeliveryContext;
    type Error = DeliveryError;

    fn kind(&self) -> &'static str {
        match self {
            Self::SmsSend(_) => "SmsSendJob",
            Self::RefreshPreKeys(_) => "RefreshPreKeysJob",
        }
    }

    fn parameters(&self) -> JobParameters {
        match self {
            Self::SmsSend(job) => job.parameters(),
            Self::RefreshPreKeys(job) => job.parameters(),
        }
    }

    async fn on_added(&self, context: &DeliveryContext) {
        match self {
            Self::SmsSend(job) => job.on_added(context).await,
            Self::RefreshPreKeys(_) => {}
        }
    }

    async fn on_run(&self, context: &DeliveryContext, run: &RunContext) -> Result<(), DeliveryError> {
        match self {
            Self::SmsSend(job) => job.on_run(context, run).await,
            Self::RefreshPreKeys(job) => job.on_run(context).await,
        }
    }

    fn should_retry(&self, error: &DeliveryError) -> bool {
        match self {
            Self::SmsSend(job) => job.should_retry(error),
            Self::RefreshPreKeys(job) => job.should_retry(error),
        }
    }

    async fn on_canceled(&self, context: &DeliveryContext, reason: CancelReason<'_, DeliveryError>) {
        match self {
            Self::SmsSend(job) => job.on_canceled(context, reason).await,
            Self::RefreshPreKeys(_) => {
                tracing::warn!(%reason, "Pre-key refresh abandoned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sealpost_common::RequirementKind;

    use super::*;

    #[test]
    fn jobs_survive_a_persistence_round_trip() {
        let job = OutboundJob::delivery(MessageId(12), "+15550100", &DeliveryConfig::default());
        let bytes = bincode::serde::encode_to_vec(&job, bincode::config::standard());
        let decoded = bytes.ok().and_then(|bytes| {
            bincode::serde::decode_from_slice::<OutboundJob, _>(&bytes, bincode::config::standard())
                .ok()
        });
        assert_eq!(decoded.map(|(job, _)| job), Some(job));
    }

    #[test]
    fn delivery_parameters_follow_wifi_preference() {
        let mut config = DeliveryConfig::default();
        let parameters = OutboundJob::delivery(MessageId(1), "+15550100", &config).parameters();
        assert!(parameters.persistent);
        assert_eq!(parameters.group.as_deref(), Some("+15550100"));
        assert_eq!(parameters.retry_budget, 3);
        assert_eq!(
            parameters.requirements,
            vec![RequirementKind::MasterKeyCached, RequirementKind::ServiceBound]
        );

        config.wifi_sms_enabled = true;
        let parameters = OutboundJob::delivery(MessageId(1), "+15550100", &config).parameters();
        assert_eq!(
            parameters.requirements,
            vec![
                RequirementKind::MasterKeyCached,
                RequirementKind::NetworkOrServiceAvailable
            ]
        );
    }

    #[test]
    fn maintenance_parameters() {
        let job = OutboundJob::maintenance();
        let parameters = job.parameters();
        assert_eq!(job.kind(), "RefreshPreKeysJob");
        assert!(!parameters.persistent);
        assert_eq!(parameters.group.as_deref(), Some("RefreshPreKeysJob"));
        assert_eq!(parameters.retry_budget, 5);
        assert_eq!(
            parameters.requirements,
            vec![RequirementKind::NetworkAvailable, RequirementKind::MasterKeyCached]
        );
    }
}
