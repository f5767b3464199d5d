//! Read/update contract for the external message database.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::{
    media::Attachment,
    record::{DeliveryRecord, DeliveryReport, MessageId, MessageState, ThreadId},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message {0} not found")]
    NotFound(MessageId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: MessageState, to: MessageState },

    #[error("Message store backend error: {0}")]
    Backend(String),
}

/// The message database, as seen from the delivery path.
///
/// Implementations must reject transitions that would move a message
/// backwards (see [`MessageState::can_transition_to`]).
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    async fn message(&self, id: MessageId) -> Result<DeliveryRecord, StoreError>;

    /// Move a message to `state`, returning the state it was in before.
    async fn transition(&self, id: MessageId, state: MessageState)
    -> Result<MessageState, StoreError>;

    async fn mark_delivery_report(
        &self,
        id: MessageId,
        report: DeliveryReport,
    ) -> Result<(), StoreError>;

    /// Replace the message's attachments, e.g. with resized copies.
    async fn set_attachments(
        &self,
        id: MessageId,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError>;

    /// Everyone taking part in a conversation.
    async fn thread_recipients(&self, thread: ThreadId) -> Result<Vec<String>, StoreError>;

    async fn mark_sending(&self, id: MessageId) -> Result<MessageState, StoreError> {
        self.transition(id, MessageState::Sending).await
    }

    async fn mark_sent(&self, id: MessageId) -> Result<MessageState, StoreError> {
        self.transition(id, MessageState::Sent).await
    }

    async fn mark_failed(&self, id: MessageId) -> Result<MessageState, StoreError> {
        self.transition(id, MessageState::Failed).await
    }

    async fn mark_pending_insecure_fallback(
        &self,
        id: MessageId,
    ) -> Result<MessageState, StoreError> {
        self.transition(id, MessageState::PendingInsecureFallback)
            .await
    }
}

/// A [`MessageStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<MessageId, DeliveryRecord>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a message.
    pub fn insert(&self, record: DeliveryRecord) {
        self.messages.insert(record.id, record);
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<DeliveryRecord> {
        self.messages.get(&id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn message(&self, id: MessageId) -> Result<DeliveryRecord, StoreError> {
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: MessageId,
        state: MessageState,
    ) -> Result<MessageState, StoreError> {
        let mut entry = self
            .messages
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;

        let previous = entry.state;
        if !previous.can_transition_to(state) {
            return Err(StoreError::InvalidTransition {
                from: previous,
                to: state,
            });
        }

        entry.state = state;
        Ok(previous)
    }

    async fn mark_delivery_report(
        &self,
        id: MessageId,
        report: DeliveryReport,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .messages
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        entry.delivery_report = Some(report);
        Ok(())
    }

    async fn set_attachments(
        &self,
        id: MessageId,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .messages
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        entry.attachments = attachments;
        Ok(())
    }

    async fn thread_recipients(&self, thread: ThreadId) -> Result<Vec<String>, StoreError> {
        let mut recipients: Vec<String> = self
            .messages
            .iter()
            .filter(|entry| entry.thread_id == thread)
            .flat_map(|entry| entry.recipients.clone())
            .collect();
        recipients.sort();
        recipients.dedup();
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::record::SecurityFlags;

    fn message(id: u64, thread: u64, recipient: &str) -> DeliveryRecord {
        DeliveryRecord {
            id: MessageId(id),
            thread_id: ThreadId(thread),
            recipients: vec![recipient.to_string()],
            body: "hello".to_string(),
            message_type: 0,
            flags: SecurityFlags::default(),
            state: MessageState::Pending,
            delivery_report: None,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn transitions_are_monotonic() {
        let store = InMemoryMessageStore::new();
        store.insert(message(1, 1, "+15550100"));

        assert_eq!(
            store.mark_sending(MessageId(1)).await.ok(),
            Some(MessageState::Pending)
        );
        assert_eq!(
            store.mark_sent(MessageId(1)).await.ok(),
            Some(MessageState::Sending)
        );
        assert!(matches!(
            store.mark_failed(MessageId(1)).await,
            Err(StoreError::InvalidTransition {
                from: MessageState::Sent,
                to: MessageState::Failed
            })
        ));
        assert_eq!(
            store.get(MessageId(1)).map(|m| m.state),
            Some(MessageState::Sent)
        );
    }

    #[tokio::test]
    async fn missing_messages_are_reported() {
        let store = InMemoryMessageStore::new();
        assert!(matches!(
            store.mark_sending(MessageId(9)).await,
            Err(StoreError::NotFound(MessageId(9)))
        ));
        assert!(matches!(
            store.message(MessageId(9)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn thread_recipients_are_deduplicated() {
        let store = InMemoryMessageStore::new();
        store.insert(message(1, 4, "+15550100"));
        store.insert(message(2, 4, "+15550100"));
        store.insert(message(3, 4, "+15550111"));
        store.insert(message(4, 5, "+15550199"));

        let recipients = store.thread_recipients(ThreadId(4)).await.unwrap_or_default();
        assert_eq!(recipients, vec!["+15550100", "+15550111"]);
    }

    #[tokio::test]
    async fn delivery_reports_are_recorded() {
        let store = InMemoryMessageStore::new();
        store.insert(message(1, 1, "+15550100"));
        assert!(
            store
                .mark_delivery_report(MessageId(1), DeliveryReport::Delivered)
                .await
                .is_ok()
        );
        assert_eq!(
            store.get(MessageId(1)).and_then(|m| m.delivery_report),
            Some(DeliveryReport::Delivered)
        );
    }
}
