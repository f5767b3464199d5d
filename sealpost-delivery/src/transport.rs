//! The boundary to the underlying send mechanism.
//!
//! A [`TransportAdapter`] only accepts payloads. Whether a segment actually
//! left, and whether it reached the handset, is reported later by firing the
//! [`SentCallback`] and [`DeliveredCallback`] it was handed. Both feed the
//! same channel as the registrations made by the sending job, so the
//! [`crate::listener::DeliveryListener`] sees every event for a message in
//! order.

use std::{any::Any, panic::AssertUnwindSafe};

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    correlation::{CorrelationId, InvalidToken},
    error::DeliveryError,
    record::{DeliveryReport, MessageId, ThreadId},
};

/// Result code for one segment, as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    GenericFailure,
    NoService,
    RadioOff,
    NullPdu,
}

impl SendResult {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Sent)
    }

    /// The radio could not reach a network. The message is worth sending
    /// again once service returns.
    #[must_use]
    pub const fn is_service_outage(self) -> bool {
        matches!(self, Self::NoService | Self::RadioOff)
    }
}

/// One dispatch of one message, announced before its first segment is handed
/// to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub message_id: MessageId,
    pub message_type: u64,
    pub dispatch: u64,
    pub total: u16,
    pub group: String,
    pub thread_id: ThreadId,
    pub recipients: Vec<String>,
    pub reports_expected: bool,
    pub secure: bool,
}

impl Dispatch {
    /// Correlation ids for every segment, in order.
    pub fn correlations(&self) -> impl Iterator<Item = CorrelationId> + '_ {
        (0..self.total).map(|sequence| CorrelationId {
            message_id: self.message_id,
            message_type: self.message_type,
            sequence,
            total: self.total,
            dispatch: self.dispatch,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Registered(Dispatch),
    Sent {
        correlation: CorrelationId,
        result: SendResult,
    },
    Delivered {
        correlation: CorrelationId,
        report: DeliveryReport,
    },
}

/// Fired once the radio accepted or rejected a segment.
///
/// `fire` consumes the callback, so it can fire at most once.
#[derive(Debug)]
pub struct SentCallback {
    correlation: CorrelationId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SentCallback {
    #[must_use]
    pub const fn correlation(&self) -> CorrelationId {
        self.correlation
    }

    /// Opaque token to hand to platforms that only carry strings.
    #[must_use]
    pub fn token(&self) -> String {
        self.correlation.token()
    }

    pub fn fire(self, result: SendResult) {
        // The listener is gone only during shutdown.
        let _ = self.events.send(TransportEvent::Sent {
            correlation: self.correlation,
            result,
        });
    }
}

/// Fired when the carrier reports delivery of a segment.
#[derive(Debug)]
pub struct DeliveredCallback {
    correlation: CorrelationId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl DeliveredCallback {
    #[must_use]
    pub const fn correlation(&self) -> CorrelationId {
        self.correlation
    }

    #[must_use]
    pub fn token(&self) -> String {
        self.correlation.token()
    }

    pub fn fire(self, report: DeliveryReport) {
        let _ = self.events.send(TransportEvent::Delivered {
            correlation: self.correlation,
            report,
        });
    }
}

/// Hands out callbacks bound to the listener's channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { events }
    }

    /// Announce a dispatch.
    ///
    /// # Errors
    /// If the listener has shut down, in which case nothing could track the
    /// callbacks.
    pub fn register(&self, dispatch: Dispatch) -> Result<(), DeliveryError> {
        self.events
            .send(TransportEvent::Registered(dispatch))
            .map_err(|_| DeliveryError::Canceled)
    }

    #[must_use]
    pub fn sent(&self, correlation: CorrelationId) -> SentCallback {
        SentCallback {
            correlation,
            events: self.events.clone(),
        }
    }

    #[must_use]
    pub fn delivered(&self, correlation: CorrelationId) -> DeliveredCallback {
        DeliveredCallback {
            correlation,
            events: self.events.clone(),
        }
    }

    /// Rebuild a sent callback from the token a platform handed back.
    ///
    /// # Errors
    /// If the token was not produced by [`CorrelationId::token`].
    pub fn sent_for_token(&self, token: &str) -> Result<SentCallback, InvalidToken> {
        Ok(self.sent(token.parse()?))
    }

    /// # Errors
    /// If the token was not produced by [`CorrelationId::token`].
    pub fn delivered_for_token(&self, token: &str) -> Result<DeliveredCallback, InvalidToken> {
        Ok(self.delivered(token.parse()?))
    }

    /// A complete segment, with a delivered callback only when reports are
    /// wanted.
    #[must_use]
    pub fn segment(&self, correlation: CorrelationId, payload: Vec<u8>, reports: bool) -> Segment {
        Segment {
            payload,
            sent: self.sent(correlation),
            delivered: reports.then(|| self.delivered(correlation)),
        }
    }
}

/// A payload together with its callbacks.
#[derive(Debug)]
pub struct Segment {
    pub payload: Vec<u8>,
    pub sent: SentCallback,
    pub delivered: Option<DeliveredCallback>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport refused the request outright.
    #[error("Rejected by transport: {0}")]
    Rejected(String),

    /// The transport broke while handling the request.
    #[error("Transport fault: {0}")]
    Fault(String),
}

#[async_trait]
pub trait TransportAdapter: Send + Sync + std::fmt::Debug {
    /// Queue one segment. A `None` delivered callback means reports are off.
    async fn send(
        &self,
        destination: &str,
        payload: Vec<u8>,
        sent: SentCallback,
        delivered: Option<DeliveredCallback>,
    ) -> Result<(), TransportError>;

    /// Queue every part of a concatenated message.
    async fn send_multipart(
        &self,
        destination: &str,
        segments: Vec<Segment>,
    ) -> Result<(), TransportError> {
        for segment in segments {
            self.send(destination, segment.payload, segment.sent, segment.delivered)
                .await?;
        }
        Ok(())
    }
}

/// How a guarded transport call went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFault {
    Rejected(String),
    Fault(String),
    Panicked(String),
}

impl DispatchFault {
    /// Faults, unlike rejections, may not recur when the parts are sent one
    /// at a time.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_) | Self::Panicked(_))
    }
}

impl From<DispatchFault> for DeliveryError {
    fn from(fault: DispatchFault) -> Self {
        match fault {
            DispatchFault::Rejected(reason) | DispatchFault::Fault(reason) => {
                Self::Undeliverable(reason)
            }
            DispatchFault::Panicked(reason) => {
                Self::Undeliverable(format!("transport panicked: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Await a transport call, turning errors and panics into a
/// [`DispatchFault`].
pub async fn guarded<F>(call: F) -> Result<(), DispatchFault>
where
    F: Future<Output = Result<(), TransportError>> + Send,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(TransportError::Rejected(reason))) => Err(DispatchFault::Rejected(reason)),
        Ok(Err(TransportError::Fault(reason))) => Err(DispatchFault::Fault(reason)),
        Err(payload) => Err(DispatchFault::Panicked(panic_message(payload.as_ref()))),
    }
}
