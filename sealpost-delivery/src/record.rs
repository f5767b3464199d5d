//! The message-side view of a delivery: ids, states and flags read from the
//! external message store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted delivery state of a message.
///
/// Transitions only move forward: `Pending -> Sending -> {Sent | Failed |
/// PendingInsecureFallback}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Pending,
    Sending,
    Sent,
    Failed,
    PendingInsecureFallback,
}

impl MessageState {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sending => 1,
            Self::Sent | Self::Failed | Self::PendingInsecureFallback => 2,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` keeps the state monotonic.
    ///
    /// `Sending -> Sending` is allowed so that a job re-entering after a
    /// restart can mark the message again.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Sending, Self::Sending) => true,
            _ => next.rank() > self.rank(),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::PendingInsecureFallback => "pending-insecure-fallback",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub secure: bool,
    pub key_exchange: bool,
    pub end_session: bool,
}

/// Status reported back by the carrier once a part reaches the handset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryReport {
    Delivered,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub recipients: Vec<String>,
    pub body: String,
    /// Opaque type bits, echoed back in correlation tokens.
    pub message_type: u64,
    pub flags: SecurityFlags,
    pub state: MessageState,
    pub delivery_report: Option<DeliveryReport>,
    /// Media carried with the body, checked against the outgoing profile
    /// before the send is queued.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl DeliveryRecord {
    /// The single recipient of an SMS. Group sends are fanned out by the
    /// caller.
    #[must_use]
    pub fn individual_recipient(&self) -> Option<&str> {
        self.recipients.first().map(String::as_str)
    }

    /// The body must be encrypted before it leaves.
    #[must_use]
    pub const fn requires_encryption(&self) -> bool {
        self.flags.secure || self.flags.end_session
    }

    /// The body is framed as secure segments, encrypted or not.
    #[must_use]
    pub const fn takes_secure_path(&self) -> bool {
        self.flags.secure || self.flags.key_exchange || self.flags.end_session
    }
}
