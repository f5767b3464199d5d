//! Secure SMS delivery on top of the sealpost job queue.
//!
//! A [`DeliveryService`] queues [`SmsSendJob`]s that wait for the master key
//! and the radio, encrypt when the conversation is secure, split the payload
//! into segments and hand them to a [`TransportAdapter`]. Sent and delivered
//! callbacks flow back through the [`DeliveryListener`], which settles the
//! message's state.

pub mod account;
pub mod address;
pub mod config;
pub mod correlation;
pub mod crypto;
pub mod error;
pub mod jobs;
pub mod listener;
pub mod media;
pub mod multipart;
pub mod notify;
pub mod record;
pub mod service;
pub mod store;
pub mod transport;

pub use account::{AccountManager, PreKeyBundle, PreKeyGenerator, PushError};
pub use config::{Config, ConfigError, DeliveryConfig};
pub use correlation::{CorrelationId, InvalidToken};
pub use crypto::{KeyCache, MasterSecret, SessionCipher, SessionError};
pub use error::DeliveryError;
pub use jobs::{DeliveryContext, OutboundJob, RefreshPreKeysJob, SmsSendJob};
pub use listener::DeliveryListener;
pub use media::{
    Attachment, ImageCodec, MediaChecker, MediaConstraints, MediaError, MediaKind, MediaProfile,
};
pub use multipart::{MultipartError, MultipartHandler, SegmentKind};
pub use notify::{Notifier, TracingNotifier};
pub use record::{
    DeliveryRecord, DeliveryReport, MessageId, MessageState, SecurityFlags, ThreadId,
};
pub use service::{DeliveryService, DeliveryServiceBuilder};
pub use store::{InMemoryMessageStore, MessageStore, StoreError};
pub use transport::{
    DeliveredCallback, Dispatch, SendResult, SentCallback, TransportAdapter, TransportError,
    TransportEvent,
};
