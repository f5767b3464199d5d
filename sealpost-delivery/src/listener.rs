//! Turns transport callbacks into message state.
//!
//! Every [`TransportEvent`] arrives on one channel and is handled by one task,
//! so message state is only ever mutated from here (and from the send job
//! before dispatch). The listener keeps an explicit correlation map of
//! in-flight segments. Entries are evicted when a segment reaches a terminal
//! callback, and a periodic sweep drops anything older than
//! `correlation_ttl_secs`.

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use sealpost_common::{Signal, audit, incoming, internal};
use sealpost_jobs::{JobQueue, QueueError};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::DeliveryConfig,
    correlation::CorrelationId,
    jobs::OutboundJob,
    notify::Notifier,
    record::{DeliveryReport, MessageId, ThreadId},
    store::{MessageStore, StoreError},
    transport::{Dispatch, SendResult, TransportEvent},
};

#[derive(Debug)]
struct SegmentEntry {
    registered_at: Instant,
    sent: Option<SendResult>,
    /// A delivery report overtook the sent callback.
    reported: bool,
}

#[derive(Debug)]
struct DispatchProgress {
    dispatch: Dispatch,
    registered_at: Instant,
    sent: u16,
    settled: bool,
}

/// Where to send a failure: the group to re-queue into and whom to notify.
#[derive(Debug)]
struct FailureTarget {
    message_id: MessageId,
    group: Option<String>,
    thread_id: ThreadId,
    recipients: Vec<String>,
}

pub struct DeliveryListener {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    queue: JobQueue<OutboundJob>,
    config: DeliveryConfig,
    segments: AHashMap<CorrelationId, SegmentEntry>,
    dispatches: AHashMap<(MessageId, u64), DispatchProgress>,
}

impl std::fmt::Debug for DeliveryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryListener")
            .field("segments", &self.segments.len())
            .field("dispatches", &self.dispatches.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryListener {
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        queue: JobQueue<OutboundJob>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            events,
            store,
            notifier,
            queue,
            config,
            segments: AHashMap::new(),
            dispatches: AHashMap::new(),
        }
    }

    /// Segments still waiting on a callback.
    #[must_use]
    pub fn tracked_segments(&self) -> usize {
        self.segments.len()
    }

    /// Handle events until shutdown, then drain whatever is already queued.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Delivery listener starting");

        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!("Transport event channel closed");
                        break;
                    };
                    self.handle(event).await;
                }
                _ = sweep.tick() => self.sweep(Instant::now()),
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Delivery listener received shutdown signal");
                        }
                        Err(err) => {
                            error!("Delivery listener shutdown channel error: {err}");
                        }
                    }
                    break;
                }
            }
        }

        while let Ok(event) = self.events.try_recv() {
            self.handle(event).await;
        }

        internal!(level = INFO, "Delivery listener shutdown complete");
    }

    pub async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Registered(dispatch) => self.register(dispatch),
            TransportEvent::Sent {
                correlation,
                result,
            } => self.on_sent(correlation, result).await,
            TransportEvent::Delivered {
                correlation,
                report,
            } => self.on_delivered(correlation, report).await,
        }
    }

    fn register(&mut self, dispatch: Dispatch) {
        let now = Instant::now();
        for correlation in dispatch.correlations() {
            self.segments.insert(
                correlation,
                SegmentEntry {
                    registered_at: now,
                    sent: None,
                    reported: false,
                },
            );
        }

        debug!(
            message_id = %dispatch.message_id,
            dispatch = dispatch.dispatch,
            total = dispatch.total,
            "Tracking dispatch"
        );

        self.dispatches.insert(
            (dispatch.message_id, dispatch.dispatch),
            DispatchProgress {
                dispatch,
                registered_at: now,
                sent: 0,
                settled: false,
            },
        );
    }

    async fn on_sent(&mut self, correlation: CorrelationId, result: SendResult) {
        incoming!(correlation = correlation; "Sent callback: {:?}", result);

        let Some(entry) = self.segments.get_mut(&correlation) else {
            return self.on_untracked_sent(correlation, result).await;
        };

        if entry.sent.is_some() {
            debug!(%correlation, "Duplicate sent callback");
            return;
        }
        entry.sent = Some(result);
        let reported = entry.reported;

        let key = correlation.dispatch_key();
        let Some(progress) = self.dispatches.get_mut(&key) else {
            self.segments.remove(&correlation);
            return;
        };

        if progress.settled {
            self.segments.remove(&correlation);
            self.forget_if_done(key);
            return;
        }

        if result.is_success() {
            progress.sent = progress.sent.saturating_add(1);
            let complete = progress.sent >= progress.dispatch.total;
            if complete {
                progress.settled = true;
            }
            if reported || !progress.dispatch.reports_expected {
                self.segments.remove(&correlation);
            }

            if complete {
                let message_id = correlation.message_id;
                match self.store.mark_sent(message_id).await {
                    Ok(_) => info!(%message_id, "Message sent"),
                    Err(err) => warn!(%message_id, error = %err, "Failed to mark message sent"),
                }
                self.forget_if_done(key);
            }
            return;
        }

        progress.settled = true;
        let target = FailureTarget {
            message_id: correlation.message_id,
            group: Some(progress.dispatch.group.clone()),
            thread_id: progress.dispatch.thread_id,
            recipients: progress.dispatch.recipients.clone(),
        };

        self.evict_dispatch(key);
        self.on_send_failure(target, result).await;
    }

    /// A callback for a segment this process never registered, typically one
    /// dispatched before a restart. Only the token is known, so each part is
    /// treated on its own.
    async fn on_untracked_sent(&self, correlation: CorrelationId, result: SendResult) {
        debug!(%correlation, ?result, "Sent callback for untracked segment");
        let message_id = correlation.message_id;

        if result.is_success() {
            match self.store.mark_sent(message_id).await {
                Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(err) => warn!(%message_id, error = %err, "Failed to mark message sent"),
            }
            return;
        }

        let record = match self.store.message(message_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(%message_id, error = %err, "Dropping failure for unknown message");
                return;
            }
        };

        if record.state.is_terminal() {
            return;
        }

        let target = FailureTarget {
            message_id,
            group: record.individual_recipient().map(ToString::to_string),
            thread_id: record.thread_id,
            recipients: record.recipients,
        };
        self.on_send_failure(target, result).await;
    }

    async fn on_send_failure(&self, target: FailureTarget, result: SendResult) {
        let message_id = target.message_id;

        if result.is_service_outage()
            && let Some(group) = target.group
        {
            info!(%message_id, ?result, "No service, re-queueing message");
            let job = OutboundJob::delivery(message_id, group, &self.config);
            match self.queue.enqueue(job).await {
                Ok(_) => return,
                Err(QueueError::ShuttingDown) => {
                    warn!(%message_id, "Queue shutting down, cannot re-queue message");
                }
                Err(err) => warn!(%message_id, error = %err, "Failed to re-queue message"),
            }
        }

        match self.store.mark_failed(message_id).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                debug!(%message_id, state = %from, "Message already settled");
                return;
            }
            Err(err) => {
                warn!(%message_id, error = %err, "Failed to mark message failed");
                return;
            }
        }

        self.notifier
            .delivery_failed(target.thread_id, &target.recipients)
            .await;
        audit::log_delivery_failure(
            &message_id.to_string(),
            &format!("send failed: {result:?}"),
            "failed",
        );
    }

    async fn on_delivered(&mut self, correlation: CorrelationId, report: DeliveryReport) {
        incoming!(correlation = correlation; "Delivered callback: {:?}", report);

        let message_id = correlation.message_id;
        if let Err(err) = self.store.mark_delivery_report(message_id, report).await {
            warn!(%message_id, error = %err, "Failed to record delivery report");
        }

        match self.segments.get_mut(&correlation) {
            Some(entry) if entry.sent.is_none() => {
                // Keep the segment so its sent callback still counts.
                debug!(%correlation, "Delivery report ahead of sent callback");
                entry.reported = true;
            }
            Some(_) => {
                self.segments.remove(&correlation);
                self.forget_if_done(correlation.dispatch_key());
            }
            None => {}
        }
    }

    fn evict_dispatch(&mut self, key: (MessageId, u64)) {
        if let Some(progress) = self.dispatches.remove(&key) {
            for correlation in progress.dispatch.correlations() {
                self.segments.remove(&correlation);
            }
        }
    }

    /// Drop a settled dispatch once none of its segments are tracked.
    fn forget_if_done(&mut self, key: (MessageId, u64)) {
        let Some(progress) = self.dispatches.get(&key) else {
            return;
        };

        if progress.settled
            && !progress
                .dispatch
                .correlations()
                .any(|c| self.segments.contains_key(&c))
        {
            self.dispatches.remove(&key);
        }
    }

    /// Evict everything registered more than `correlation_ttl_secs` before
    /// `now`.
    pub fn sweep(&mut self, now: Instant) {
        let ttl = Duration::from_secs(self.config.correlation_ttl_secs);
        let expired = |registered_at: Instant| now.saturating_duration_since(registered_at) >= ttl;

        let before = self.segments.len();
        self.segments.retain(|_, entry| !expired(entry.registered_at));
        self.dispatches
            .retain(|_, progress| !expired(progress.registered_at));

        let evicted = before - self.segments.len();
        if evicted > 0 {
            info!(evicted, "Evicted stale correlation entries");
        }
    }
}
