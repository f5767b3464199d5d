//! Wiring of the job queue, the send jobs and the delivery listener.

use std::sync::Arc;

use parking_lot::Mutex;
use sealpost_common::{Signal, SystemState, audit, internal};
use sealpost_jobs::{CancelOutcome, ExecutorConfig, JobEvent, JobId, JobQueue, QueueError};
use sealpost_spool::{BackingStore, SpoolConfig};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::{
    account::{AccountManager, PreKeyGenerator},
    config::{Config, ConfigError, DeliveryConfig},
    crypto::{KeyCache, SessionCipher},
    error::DeliveryError,
    jobs::{DeliveryContext, OutboundJob},
    listener::DeliveryListener,
    media::{ImageCodec, MediaChecker, NoImageCodec},
    notify::{Notifier, TracingNotifier},
    record::MessageId,
    store::{MessageStore, StoreError},
    transport::{EventSink, TransportAdapter},
};

/// The delivery core.
///
/// ## Lifecycle
/// 1. [`DeliveryService::builder`] with every collaborator
/// 2. [`DeliveryService::restore`] to pick up persisted sends
/// 3. [`DeliveryService::serve`] until a shutdown signal arrives
#[derive(Debug)]
pub struct DeliveryService {
    queue: JobQueue<OutboundJob>,
    listener: Mutex<Option<DeliveryListener>>,
    codec: Arc<dyn ImageCodec>,
    config: DeliveryConfig,
}

impl DeliveryService {
    #[must_use]
    pub fn builder() -> DeliveryServiceBuilder {
        DeliveryServiceBuilder::default()
    }

    #[must_use]
    pub const fn queue(&self) -> &JobQueue<OutboundJob> {
        &self.queue
    }

    #[must_use]
    pub fn system(&self) -> &SystemState {
        self.queue.system()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<DeliveryContext> {
        self.queue.context()
    }

    /// The master secret cache. Unlocking it satisfies `MasterKeyCached`.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyCache> {
        self.context().keys()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.queue.subscribe()
    }

    /// Re-queue sends persisted by a previous run.
    ///
    /// # Errors
    /// If the job spool cannot be listed.
    pub async fn restore(&self) -> Result<usize, QueueError> {
        self.queue.restore().await
    }

    /// Queue a stored message for sending. The message is marked as sending
    /// before this returns.
    ///
    /// Attachments are first fitted to the configured media profile. One that
    /// cannot be made to fit fails the message without queueing anything.
    ///
    /// # Errors
    /// `Undeliverable` for attachments that do not fit, `NoSuchMessage` for an
    /// unknown message, `Queue` if the job cannot be persisted or the service
    /// is shutting down.
    pub async fn send_message(
        &self,
        message_id: MessageId,
        group: impl Into<String>,
    ) -> Result<JobId, DeliveryError> {
        self.prepare_media(message_id).await?;

        Ok(self
            .queue
            .enqueue(OutboundJob::delivery(message_id, group, &self.config))
            .await?)
    }

    async fn prepare_media(&self, message_id: MessageId) -> Result<(), DeliveryError> {
        let context = self.context();
        let record = context.store.message(message_id).await?;
        if record.attachments.is_empty() {
            return Ok(());
        }

        let checker = MediaChecker::new(
            self.config.media_profile.constraints(),
            Arc::clone(&self.codec),
        );

        let error = match checker.prepare(record.attachments.clone()) {
            Ok(prepared) => {
                if prepared != record.attachments {
                    context.store.set_attachments(message_id, prepared).await?;
                }
                return Ok(());
            }
            Err(err) => DeliveryError::Undeliverable(err.to_string()),
        };

        warn!(%message_id, error = %error, "Attachment does not fit the media profile");
        match context.store.mark_failed(message_id).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { .. }) => return Err(error),
            Err(err) => return Err(err.into()),
        }

        let recipients = context.thread_recipients(&record).await;
        context
            .notifier
            .delivery_failed(record.thread_id, &recipients)
            .await;
        audit::log_delivery_failure(&message_id.to_string(), &error.to_string(), "failed");

        Err(error)
    }

    /// # Errors
    /// If the service is shutting down.
    pub async fn refresh_pre_keys(&self) -> Result<JobId, QueueError> {
        self.queue.enqueue(OutboundJob::maintenance()).await
    }

    /// # Errors
    /// `NotFound` if the job already finished.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, QueueError> {
        self.queue.cancel(id).await
    }

    /// Run the executor and the delivery listener until shutdown.
    ///
    /// # Errors
    /// Whatever the executor reports.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), QueueError> {
        let listener = self.listener.lock().take();

        let Some(listener) = listener else {
            warn!("Delivery listener already running, serving the queue only");
            return self.queue.serve(shutdown).await;
        };

        internal!(level = INFO, "Delivery service starting");
        let (served, ()) = tokio::join!(
            self.queue.serve(shutdown.resubscribe()),
            listener.run(shutdown)
        );
        internal!(level = INFO, "Delivery service stopped");

        served
    }
}

#[derive(Debug, Default)]
pub struct DeliveryServiceBuilder {
    spool: SpoolConfig,
    backing: Option<Arc<dyn BackingStore>>,
    executor: ExecutorConfig,
    delivery: DeliveryConfig,
    audit: Option<audit::AuditConfig>,
    system: Option<SystemState>,
    store: Option<Arc<dyn MessageStore>>,
    sessions: Option<Arc<dyn SessionCipher>>,
    transport: Option<Arc<dyn TransportAdapter>>,
    notifier: Option<Arc<dyn Notifier>>,
    accounts: Option<Arc<dyn AccountManager>>,
    pre_keys: Option<Arc<dyn PreKeyGenerator>>,
    codec: Option<Arc<dyn ImageCodec>>,
}

impl DeliveryServiceBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.spool = config.spool;
        self.executor = config.executor;
        self.delivery = config.delivery;
        self.audit = Some(config.audit);
        self
    }

    /// Use an already opened job spool instead of the configured one.
    #[must_use]
    pub fn backing_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.backing = Some(store);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn system(mut self, system: SystemState) -> Self {
        self.system = Some(system);
        self
    }

    #[must_use]
    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionCipher>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn accounts(mut self, accounts: Arc<dyn AccountManager>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    #[must_use]
    pub fn pre_keys(mut self, pre_keys: Arc<dyn PreKeyGenerator>) -> Self {
        self.pre_keys = Some(pre_keys);
        self
    }

    /// Decoder used to fit image attachments. Without one, every image
    /// attachment fails its message.
    #[must_use]
    pub fn image_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// # Errors
    /// `Missing` if a required collaborator was not supplied, `Spool` if the
    /// configured spool cannot be opened.
    pub fn build(self) -> Result<DeliveryService, ConfigError> {
        let store = self.store.ok_or(ConfigError::Missing("message store"))?;
        let sessions = self.sessions.ok_or(ConfigError::Missing("session cipher"))?;
        let transport = self.transport.ok_or(ConfigError::Missing("transport"))?;
        let accounts = self.accounts.ok_or(ConfigError::Missing("account manager"))?;
        let pre_keys = self
            .pre_keys
            .ok_or(ConfigError::Missing("pre-key generator"))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));
        let codec = self.codec.unwrap_or_else(|| Arc::new(NoImageCodec));

        let backing = match self.backing {
            Some(backing) => backing,
            None => self.spool.open()?,
        };

        if let Some(config) = self.audit {
            audit::init(config);
        }

        let system = self.system.unwrap_or_default();
        let keys = Arc::new(KeyCache::new(system.clone()));
        let (events, receiver) = mpsc::unbounded_channel();

        let context = DeliveryContext::new(
            Arc::clone(&store),
            keys,
            sessions,
            transport,
            Arc::clone(&notifier),
            accounts,
            pre_keys,
            EventSink::new(events),
            self.delivery.clone(),
        );

        let queue = JobQueue::new(self.executor, backing, system, Arc::new(context));
        let listener = DeliveryListener::new(
            receiver,
            store,
            notifier,
            queue.clone(),
            self.delivery.clone(),
        );

        Ok(DeliveryService {
            queue,
            listener: Mutex::new(Some(listener)),
            codec,
            config: self.delivery,
        })
    }
}
