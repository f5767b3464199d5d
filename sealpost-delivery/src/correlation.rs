//! Correlation ids attached to every transport segment.
//!
//! A transport hands the token back verbatim with its sent/delivered
//! callbacks. Everything needed to attribute the callback to a message is
//! encoded in the token itself, so callbacks that arrive after a restart,
//! when the in-memory correlation map is empty, can still be handled.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::record::MessageId;

const PREFIX: &str = "sp";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid correlation token: {0}")]
pub struct InvalidToken(pub String);

/// Identity of one segment of one dispatch of a message.
///
/// `dispatch` distinguishes attempts: a message that is re-sent gets a fresh
/// dispatch number, so late callbacks from the earlier attempt are not
/// counted against the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    pub message_id: MessageId,
    pub message_type: u64,
    pub sequence: u16,
    pub total: u16,
    pub dispatch: u64,
}

impl CorrelationId {
    /// `sp:<message>:<type>:<sequence>/<total>:<dispatch>`
    #[must_use]
    pub fn token(&self) -> String {
        self.to_string()
    }

    /// The key shared by every segment of the same dispatch.
    #[must_use]
    pub const fn dispatch_key(&self) -> (MessageId, u64) {
        (self.message_id, self.dispatch)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}:{}:{}:{}/{}:{}",
            self.message_id.0, self.message_type, self.sequence, self.total, self.dispatch
        )
    }
}

impl FromStr for CorrelationId {
    type Err = InvalidToken;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidToken(token.to_string());

        let mut fields = token.split(':');
        if fields.next() != Some(PREFIX) {
            return Err(invalid());
        }

        let (Some(message), Some(message_type), Some(position), Some(dispatch), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(invalid());
        };

        let (sequence, total) = position.split_once('/').ok_or_else(invalid)?;

        let id = Self {
            message_id: MessageId(message.parse().map_err(|_| invalid())?),
            message_type: message_type.parse().map_err(|_| invalid())?,
            sequence: sequence.parse().map_err(|_| invalid())?,
            total: total.parse().map_err(|_| invalid())?,
            dispatch: dispatch.parse().map_err(|_| invalid())?,
        };

        if id.total == 0 || id.sequence >= id.total {
            return Err(invalid());
        }

        Ok(id)
    }
}
