#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use sealpost_delivery::{
    CorrelationId, DeliveryConfig, DeliveryListener, DeliveryReport, Dispatch, MessageId,
    MessageState, MessageStore, SendResult, ThreadId, TransportEvent,
};
use support::{Harness, RECIPIENT, sms};
use tokio::{sync::mpsc, time::Instant};

fn listener(harness: &Harness) -> DeliveryListener {
    let (_tx, rx) = mpsc::unbounded_channel();
    DeliveryListener::new(
        rx,
        Arc::clone(&harness.messages) as Arc<dyn MessageStore>,
        Arc::clone(&harness.notifier) as _,
        harness.service.queue().clone(),
        DeliveryConfig::default(),
    )
}

fn dispatch(message: u64, total: u16, reports: bool) -> Dispatch {
    Dispatch {
        message_id: MessageId(message),
        message_type: 0x20,
        dispatch: 1,
        total,
        group: RECIPIENT.to_string(),
        thread_id: ThreadId(100 + message),
        recipients: vec![RECIPIENT.to_string()],
        reports_expected: reports,
        secure: false,
    }
}

fn sending(harness: &Harness, id: u64) {
    let mut record = sms(id, RECIPIENT, "body");
    record.state = MessageState::Sending;
    harness.messages.insert(record);
}

fn correlations(dispatch: &Dispatch) -> Vec<CorrelationId> {
    dispatch.correlations().collect()
}

#[tokio::test]
async fn test_message_is_sent_once_every_segment_is_sent() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 3, true);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;
    assert_eq!(listener.tracked_segments(), 3);

    for correlation in &ids[..2] {
        listener
            .handle(TransportEvent::Sent {
                correlation: *correlation,
                result: SendResult::Sent,
            })
            .await;
    }
    assert_eq!(harness.state(1), MessageState::Sending);

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[2],
            result: SendResult::Sent,
        })
        .await;
    assert_eq!(harness.state(1), MessageState::Sent);

    // Segments stay tracked until their delivery reports arrive.
    assert_eq!(listener.tracked_segments(), 3);
    for correlation in ids {
        listener
            .handle(TransportEvent::Delivered {
                correlation,
                report: DeliveryReport::Delivered,
            })
            .await;
    }
    assert_eq!(listener.tracked_segments(), 0);
    assert_eq!(
        harness
            .messages
            .get(MessageId(1))
            .and_then(|m| m.delivery_report),
        Some(DeliveryReport::Delivered)
    );
}

#[tokio::test]
async fn test_segments_without_reports_are_evicted_when_sent() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 2, false);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[0],
            result: SendResult::Sent,
        })
        .await;
    assert_eq!(listener.tracked_segments(), 1);

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[1],
            result: SendResult::Sent,
        })
        .await;
    assert_eq!(listener.tracked_segments(), 0);
    assert_eq!(harness.state(1), MessageState::Sent);
}

#[tokio::test]
async fn test_duplicate_sent_callbacks_are_ignored() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 2, false);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;

    for _ in 0..2 {
        listener
            .handle(TransportEvent::Sent {
                correlation: ids[0],
                result: SendResult::Sent,
            })
            .await;
    }
    assert_eq!(harness.state(1), MessageState::Sending);
}

#[tokio::test]
async fn test_first_failure_settles_the_dispatch() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 2, true);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[0],
            result: SendResult::NullPdu,
        })
        .await;
    assert_eq!(harness.state(1), MessageState::Failed);
    assert_eq!(listener.tracked_segments(), 0);
    assert_eq!(
        harness.notifier.failures(),
        vec![(ThreadId(101), vec![RECIPIENT.to_string()])]
    );

    // A late success for the other part cannot resurrect the message.
    listener
        .handle(TransportEvent::Sent {
            correlation: ids[1],
            result: SendResult::Sent,
        })
        .await;
    assert_eq!(harness.state(1), MessageState::Failed);
    assert_eq!(harness.notifier.failures().len(), 1);
}

#[tokio::test]
async fn test_stale_entries_are_swept() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    listener
        .handle(TransportEvent::Registered(dispatch(1, 4, true)))
        .await;
    assert_eq!(listener.tracked_segments(), 4);

    listener.sweep(Instant::now());
    assert_eq!(listener.tracked_segments(), 4);

    let ttl = Duration::from_secs(DeliveryConfig::default().correlation_ttl_secs);
    listener.sweep(Instant::now() + ttl);
    assert_eq!(listener.tracked_segments(), 0);
    assert_eq!(harness.state(1), MessageState::Sending);
}

#[tokio::test]
async fn test_report_ahead_of_sent_callback_still_counts_the_segment() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 2, true);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;

    listener
        .handle(TransportEvent::Delivered {
            correlation: ids[0],
            report: DeliveryReport::Delivered,
        })
        .await;
    assert_eq!(listener.tracked_segments(), 2);

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[0],
            result: SendResult::Sent,
        })
        .await;
    assert_eq!(harness.state(1), MessageState::Sending);
    assert_eq!(listener.tracked_segments(), 1);

    listener
        .handle(TransportEvent::Sent {
            correlation: ids[1],
            result: SendResult::GenericFailure,
        })
        .await;
    assert_eq!(harness.state(1), MessageState::Failed);
    assert_eq!(
        harness.notifier.failures(),
        vec![(ThreadId(101), vec![RECIPIENT.to_string()])]
    );
    assert_eq!(listener.tracked_segments(), 0);
}

#[tokio::test]
async fn test_reported_segments_are_evicted_once_sent() {
    let harness = Harness::new();
    sending(&harness, 1);
    let mut listener = listener(&harness);

    let registration = dispatch(1, 2, true);
    let ids = correlations(&registration);
    listener.handle(TransportEvent::Registered(registration)).await;

    for correlation in &ids {
        listener
            .handle(TransportEvent::Delivered {
                correlation: *correlation,
                report: DeliveryReport::Delivered,
            })
            .await;
    }
    for correlation in &ids {
        listener
            .handle(TransportEvent::Sent {
                correlation: *correlation,
                result: SendResult::Sent,
            })
            .await;
    }

    assert_eq!(harness.state(1), MessageState::Sent);
    assert_eq!(listener.tracked_segments(), 0);
}
