use sealpost_common::{RequirementKind, audit, outgoing};
use sealpost_jobs::{CancelReason, JobParameters, RunContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::DeliveryContext;
use crate::{
    address,
    config::DeliveryConfig,
    crypto::{MasterSecret, SessionError},
    error::DeliveryError,
    multipart::{SegmentKind, divide_text},
    record::{DeliveryRecord, MessageId},
    store::StoreError,
    transport::{Dispatch, Segment, guarded},
};

/// Sends one stored SMS.
///
/// Every failure except a missing master secret is final: the secure to
/// plaintext fallback needs the user's approval, and transport outages are
/// handled by re-queueing from the delivery listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsSendJob {
    message_id: MessageId,
    group: String,
    wifi_sms_enabled: bool,
    retry_budget: u32,
}

impl SmsSendJob {
    #[must_use]
    pub fn new(message_id: MessageId, group: impl Into<String>, config: &DeliveryConfig) -> Self {
        Self {
            message_id,
            group: group.into(),
            wifi_sms_enabled: config.wifi_sms_enabled,
            retry_budget: config.send_retry_budget,
        }
    }

    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    pub(super) fn parameters(&self) -> JobParameters {
        let reachability = if self.wifi_sms_enabled {
            RequirementKind::NetworkOrServiceAvailable
        } else {
            RequirementKind::ServiceBound
        };

        JobParameters::builder()
            .persistent()
            .requirement(RequirementKind::MasterKeyCached)
            .requirement(reachability)
            .group(self.group.clone())
            .retry_budget(self.retry_budget)
            .build()
    }

    pub(super) async fn on_added(&self, context: &DeliveryContext) {
        if let Err(err) = context.store.mark_sending(self.message_id).await {
            warn!(message_id = %self.message_id, error = %err, "Failed to mark message as sending");
        }
    }

    pub(super) async fn on_run(
        &self,
        context: &DeliveryContext,
        run: &RunContext,
    ) -> Result<(), DeliveryError> {
        let master = context
            .keys
            .get()
            .ok_or(DeliveryError::MasterSecretUnavailable)?;
        let record = context.store.message(self.message_id).await?;

        if record.state.is_terminal() {
            debug!(
                message_id = %self.message_id,
                state = %record.state,
                "Message already settled, nothing to send"
            );
            return Ok(());
        }

        if run.is_canceled() {
            return Err(DeliveryError::Canceled);
        }

        let recipient = record
            .individual_recipient()
            .filter(|recipient| address::is_valid_sms_or_email(recipient))
            .ok_or_else(|| {
                DeliveryError::Undeliverable("invalid destination address".to_string())
            })?;

        let secure = record.takes_secure_path();
        let parts = if secure {
            self.deliver_secure(context, &master, &record, recipient)
                .await?
        } else {
            self.deliver_plaintext(context, &record, recipient).await?
        };

        info!(
            message_id = %self.message_id,
            parts,
            secure,
            attempt = run.attempt(),
            "Message handed to transport"
        );
        audit::log_delivery_dispatched(
            &self.message_id.to_string(),
            &record.recipients,
            parts,
            secure,
        );

        Ok(())
    }

    pub(super) fn should_retry(&self, error: &DeliveryError) -> bool {
        matches!(error, DeliveryError::MasterSecretUnavailable)
    }

    pub(super) async fn on_canceled(
        &self,
        context: &DeliveryContext,
        reason: CancelReason<'_, DeliveryError>,
    ) {
        let fallback = matches!(
            reason,
            CancelReason::Failed(err) | CancelReason::RetriesExhausted(err)
                if err.needs_fallback_approval()
        );

        let record = match context.store.message(self.message_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(message_id = %self.message_id, error = %err, "Cannot fail a missing message");
                return;
            }
        };

        let marked = if fallback {
            context
                .store
                .mark_pending_insecure_fallback(self.message_id)
                .await
        } else {
            context.store.mark_failed(self.message_id).await
        };

        match marked {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                debug!(message_id = %self.message_id, state = %from, "Message already settled");
                return;
            }
            Err(err) => {
                warn!(message_id = %self.message_id, error = %err, "Failed to record delivery failure");
                return;
            }
        }

        let recipients = context.thread_recipients(&record).await;
        context
            .notifier
            .delivery_failed(record.thread_id, &recipients)
            .await;

        let status = if fallback {
            "pending-insecure-fallback"
        } else {
            "failed"
        };
        audit::log_delivery_failure(&self.message_id.to_string(), &reason.to_string(), status);
    }

    /// Announce the dispatch to the listener before anything reaches the
    /// transport, so no callback can race its registration.
    fn begin_dispatch(
        &self,
        context: &DeliveryContext,
        record: &DeliveryRecord,
        payloads: Vec<Vec<u8>>,
        secure: bool,
    ) -> Result<Vec<Segment>, DeliveryError> {
        let total = u16::try_from(payloads.len()).map_err(|_| {
            DeliveryError::Undeliverable(format!("too many parts: {}", payloads.len()))
        })?;
        let reports = context.config.delivery_reports_enabled;

        let dispatch = Dispatch {
            message_id: record.id,
            message_type: record.message_type,
            dispatch: context.next_dispatch(),
            total,
            group: self.group.clone(),
            thread_id: record.thread_id,
            recipients: record.recipients.clone(),
            reports_expected: reports,
            secure,
        };

        let segments = dispatch
            .correlations()
            .zip(payloads)
            .map(|(correlation, payload)| context.events.segment(correlation, payload, reports))
            .collect();

        context.events.register(dispatch)?;
        Ok(segments)
    }

    async fn deliver_secure(
        &self,
        context: &DeliveryContext,
        master: &MasterSecret,
        record: &DeliveryRecord,
        recipient: &str,
    ) -> Result<usize, DeliveryError> {
        let kind = if record.flags.key_exchange {
            SegmentKind::KeyExchange
        } else if record.flags.end_session {
            SegmentKind::EndSession
        } else {
            SegmentKind::Secure
        };

        let payload = if record.requires_encryption() {
            context
                .sessions
                .encrypt(master, recipient, record.body.as_bytes())
                .await
                .map_err(|err| match err {
                    SessionError::NoSession(recipient) => {
                        DeliveryError::InsecureFallbackApproval(recipient)
                    }
                    SessionError::Encryption(reason) => DeliveryError::Undeliverable(reason),
                })?
        } else {
            record.body.as_bytes().to_vec()
        };

        let payloads = context
            .multipart
            .divide(kind, &payload)
            .map_err(|err| DeliveryError::Undeliverable(err.to_string()))?;
        let parts = payloads.len();

        outgoing!(message = self.message_id; "Dispatching {} secure segments", parts);
        for segment in self.begin_dispatch(context, record, payloads, true)? {
            guarded(context.transport.send(
                recipient,
                segment.payload,
                segment.sent,
                segment.delivered,
            ))
            .await
            .inspect_err(|fault| {
                warn!(message_id = %self.message_id, ?fault, "Secure segment dispatch failed");
            })?;
        }

        Ok(parts)
    }

    async fn deliver_plaintext(
        &self,
        context: &DeliveryContext,
        record: &DeliveryRecord,
        recipient: &str,
    ) -> Result<usize, DeliveryError> {
        let payloads: Vec<Vec<u8>> = divide_text(&record.body)
            .into_iter()
            .map(String::into_bytes)
            .collect();
        let parts = payloads.len();

        let segments = self.begin_dispatch(context, record, payloads.clone(), false)?;
        let correlations: Vec<_> = segments.iter().map(|s| s.sent.correlation()).collect();

        outgoing!(message = self.message_id; "Dispatching {} plaintext parts", parts);
        match guarded(context.transport.send_multipart(recipient, segments)).await {
            Ok(()) => return Ok(parts),
            Err(fault) if fault.is_fault() => {
                warn!(
                    message_id = %self.message_id,
                    ?fault,
                    "Multipart send faulted, sending parts individually"
                );
            }
            Err(fault) => return Err(fault.into()),
        }

        let reports = context.config.delivery_reports_enabled;
        for (correlation, payload) in correlations.into_iter().zip(payloads) {
            let segment = context.events.segment(correlation, payload, reports);
            guarded(context.transport.send(
                recipient,
                segment.payload,
                segment.sent,
                segment.delivered,
            ))
            .await?;
        }

        Ok(parts)
    }
}
