//! Typed errors for the delivery path.
//!
//! [`DeliveryError`] is what a job body returns. Its classification drives the
//! executor: only [`DeliveryError::is_temporary`] failures are retried, every
//! other variant goes straight to the job's compensating hook.

use thiserror::Error;

use crate::{account::PushError, record::MessageId, store::StoreError};

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message can never be sent: bad destination, transport rejection or
    /// an encoding fault inside the transport.
    #[error("Undeliverable message: {0}")]
    Undeliverable(String),

    /// No secure session exists for the recipient. The user has to approve a
    /// downgrade to plaintext before the message can go out.
    #[error("Insecure fallback requires approval: {0}")]
    InsecureFallbackApproval(String),

    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// The server answered, but not with success.
    #[error("Non-successful response {code}: {message}")]
    NonSuccessfulResponse { code: u16, message: String },

    /// The master secret was evicted between scheduling and running.
    #[error("Master secret is not available")]
    MasterSecretUnavailable,

    #[error("Canceled")]
    Canceled,

    #[error("No such message: {0}")]
    NoSuchMessage(MessageId),

    #[error("Message store error: {0}")]
    Store(StoreError),

    /// The send could not be queued.
    #[error("Queue error: {0}")]
    Queue(#[from] sealpost_jobs::QueueError),
}

impl DeliveryError {
    /// Whether another attempt could succeed without outside intervention.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::MasterSecretUnavailable
        )
    }

    /// Whether the user must approve an insecure downgrade before retrying.
    #[must_use]
    pub const fn needs_fallback_approval(&self) -> bool {
        matches!(self, Self::InsecureFallbackApproval(_))
    }
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NoSuchMessage(id),
            other => Self::Store(other),
        }
    }
}

impl From<PushError> for DeliveryError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Network(message) => Self::TransientNetwork(message),
            PushError::NonSuccessfulResponse { code, message } => {
                Self::NonSuccessfulResponse { code, message }
            }
        }
    }
}
