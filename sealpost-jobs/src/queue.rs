//! The job queue and its scheduling loop.
//!
//! All bookkeeping (pending jobs, running jobs, busy groups) lives behind a
//! single mutex that is never held across an await. Job bodies run on their
//! own tasks, bounded by [`ExecutorConfig::workers`], so a slow send never
//! holds up scheduling for unrelated groups.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use sealpost_common::{Signal, SystemSnapshot, SystemState, all_satisfied, audit, internal};
use sealpost_spool::{BackingStore, JobId, JobRecord};
use tokio::{
    sync::{Notify, broadcast},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    CancelOutcome, CancelReason, ExecutorConfig, Job, JobEvent, JobStatus, QueueError, RunContext,
};

const EVENT_CAPACITY: usize = 256;

struct QueuedJob<J> {
    job: Arc<J>,
    record: JobRecord,
    persistent: bool,
    /// Backoff deadline on the monotonic clock.
    not_before: Option<Instant>,
}

enum Slot {
    Pending(u64),
    Running {
        attempt: u32,
        canceled: Arc<AtomicBool>,
    },
}

struct QueueState<J> {
    /// Keyed by sequence, so iteration is enqueue order.
    pending: BTreeMap<u64, QueuedJob<J>>,
    index: HashMap<JobId, Slot>,
    busy_groups: HashSet<String>,
    next_sequence: u64,
    accepting: bool,
}

impl<J> QueueState<J> {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            index: HashMap::new(),
            busy_groups: HashSet::new(),
            next_sequence: 0,
            accepting: true,
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        sequence
    }

    /// Move up to `limit` runnable jobs from pending to running.
    ///
    /// Walks pending jobs in enqueue order. The first job seen for a group
    /// is that group's head; if it cannot run, nothing later in the group
    /// may run either. Also returns the earliest backoff deadline still in
    /// the future, so the caller knows when to look again.
    fn take_runnable(
        &mut self,
        snapshot: &SystemSnapshot,
        now: Instant,
        limit: usize,
    ) -> (Vec<(QueuedJob<J>, Arc<AtomicBool>)>, Option<Instant>) {
        let mut chosen = Vec::new();
        let mut wake_at: Option<Instant> = None;
        let mut seen_groups: HashSet<&str> = HashSet::new();

        for (sequence, queued) in &self.pending {
            let group = queued.record.group.as_deref();

            if let Some(group) = group
                && (self.busy_groups.contains(group) || !seen_groups.insert(group))
            {
                continue;
            }

            if let Some(at) = queued.not_before
                && at > now
            {
                wake_at = Some(wake_at.map_or(at, |current| current.min(at)));
                continue;
            }

            if !all_satisfied(&queued.record.requirements, snapshot) {
                continue;
            }

            if chosen.len() >= limit {
                break;
            }

            chosen.push(*sequence);
        }

        let mut runnable = Vec::with_capacity(chosen.len());
        for sequence in chosen {
            let Some(queued) = self.pending.remove(&sequence) else {
                continue;
            };

            if let Some(group) = &queued.record.group {
                self.busy_groups.insert(group.clone());
            }

            let canceled = Arc::new(AtomicBool::new(false));
            self.index.insert(
                queued.record.id,
                Slot::Running {
                    attempt: queued.record.retries_used + 1,
                    canceled: Arc::clone(&canceled),
                },
            );
            runnable.push((queued, canceled));
        }

        (runnable, wake_at)
    }

    /// Forget a running job and free its group.
    fn release(&mut self, record: &JobRecord) {
        self.index.remove(&record.id);
        if let Some(group) = &record.group {
            self.busy_groups.remove(group);
        }
    }
}

/// Owned form of [`CancelReason`], so it can be moved into the hook task.
enum Outcome<E> {
    Canceled,
    Failed(E),
    Exhausted(E),
    Panicked,
}

impl<E> Outcome<E> {
    const fn as_reason(&self) -> CancelReason<'_, E> {
        match self {
            Self::Canceled => CancelReason::Canceled,
            Self::Failed(err) => CancelReason::Failed(err),
            Self::Exhausted(err) => CancelReason::RetriesExhausted(err),
            Self::Panicked => CancelReason::Panicked,
        }
    }
}

struct Shared<J: Job> {
    state: Mutex<QueueState<J>>,
    store: Arc<dyn BackingStore>,
    system: SystemState,
    context: Arc<J::Context>,
    config: ExecutorConfig,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
    enqueue_lock: tokio::sync::Mutex<()>,
}

/// A durable, requirement-gated job queue.
///
/// Cloning is cheap and every clone drives the same queue.
///
/// ## Lifecycle
/// 1. [`JobQueue::new`]
/// 2. [`JobQueue::restore`] to pick up jobs persisted by a previous run
/// 3. [`JobQueue::serve`] until a shutdown signal arrives
pub struct JobQueue<J: Job> {
    shared: Arc<Shared<J>>,
}

impl<J: Job> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<J: Job> std::fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("JobQueue")
            .field("pending", &state.pending.len())
            .field(
                "running",
                &state.index.len().saturating_sub(state.pending.len()),
            )
            .field("busy_groups", &state.busy_groups)
            .field("store", &self.shared.store)
            .finish_non_exhaustive()
    }
}

impl<J: Job> JobQueue<J> {
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        store: Arc<dyn BackingStore>,
        system: SystemState,
        context: Arc<J::Context>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new()),
                store,
                system,
                context,
                config,
                wake: Notify::new(),
                events,
                enqueue_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn system(&self) -> &SystemState {
        &self.shared.system
    }

    #[must_use]
    pub fn context(&self) -> &Arc<J::Context> {
        &self.shared.context
    }

    /// Receive every status transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Status of a job that is still pending or running.
    #[must_use]
    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        match self.shared.state.lock().index.get(id)? {
            Slot::Pending(_) => Some(JobStatus::Pending),
            Slot::Running { attempt, .. } => Some(JobStatus::Running { attempt: *attempt }),
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.index.len().saturating_sub(state.pending.len())
    }

    /// Accept a job.
    ///
    /// Persistent jobs are written to the store before this returns; if that
    /// write fails the job is dropped and the error returned. The job's
    /// `on_added` hook then runs, and only after that can the job be picked
    /// up by [`JobQueue::serve`].
    ///
    /// # Errors
    /// If the queue is shutting down, the job cannot be encoded, or the
    /// store rejects the write.
    pub async fn enqueue(&self, job: J) -> Result<JobId, QueueError> {
        let shared = &self.shared;
        let _guard = shared.enqueue_lock.lock().await;

        if !shared.state.lock().accepting {
            return Err(QueueError::ShuttingDown);
        }

        let parameters = job.parameters();
        let payload = bincode::serde::encode_to_vec(&job, bincode::config::standard())?;
        let id = JobId::generate();
        let sequence = shared.state.lock().allocate_sequence();
        let kind = job.kind();

        let record = JobRecord {
            id,
            kind: kind.to_string(),
            sequence,
            group: parameters.group,
            requirements: parameters.requirements,
            retry_budget: parameters.retry_budget,
            retries_used: 0,
            next_run_at: None,
            enqueued_at: SystemTime::now(),
            payload,
        };

        if parameters.persistent {
            shared.store.write(&record).await?;
        }

        let tags: Vec<&str> = record.requirements.iter().map(|r| r.tag()).collect();
        audit::log_job_enqueued(&id.to_string(), kind, record.group.as_deref(), &tags);

        job.on_added(&shared.context).await;

        {
            let mut state = shared.state.lock();
            state.index.insert(id, Slot::Pending(sequence));
            state.pending.insert(
                sequence,
                QueuedJob {
                    job: Arc::new(job),
                    record,
                    persistent: parameters.persistent,
                    not_before: None,
                },
            );
        }

        shared.emit(id, kind, JobStatus::Pending);
        shared.wake.notify_one();

        Ok(id)
    }

    /// Load jobs persisted by a previous run.
    ///
    /// Records are re-queued in their original enqueue order with their
    /// remaining retry budget and any outstanding backoff. Records that can
    /// no longer be read or decoded are logged and left in the store.
    ///
    /// # Errors
    /// If the store cannot be listed.
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let shared = &self.shared;
        let _guard = shared.enqueue_lock.lock().await;

        let mut records = Vec::new();
        for id in shared.store.list().await? {
            match shared.store.read(&id).await {
                Ok(record) => records.push(record),
                Err(err) => warn!(job_id = %id, error = %err, "Skipping unreadable job record"),
            }
        }
        records.sort_by_key(|record| record.sequence);

        let wall_now = SystemTime::now();
        let now = Instant::now();
        let mut restored = 0;

        for mut record in records {
            let job: J =
                match bincode::serde::decode_from_slice(&record.payload, bincode::config::standard())
                {
                    Ok((job, _)) => job,
                    Err(err) => {
                        warn!(
                            job_id = %record.id,
                            kind = %record.kind,
                            error = %err,
                            "Skipping job record with undecodable payload"
                        );
                        continue;
                    }
                };

            let not_before = record
                .next_run_at
                .and_then(|at| at.duration_since(wall_now).ok())
                .map(|remaining| now + remaining);
            let id = record.id;
            let kind = job.kind();

            {
                let mut state = shared.state.lock();
                if state.index.contains_key(&id) {
                    continue;
                }

                state.next_sequence = state
                    .next_sequence
                    .max(record.sequence.saturating_add(1));
                if state.pending.contains_key(&record.sequence) {
                    record.sequence = state.allocate_sequence();
                }

                state.index.insert(id, Slot::Pending(record.sequence));
                state.pending.insert(
                    record.sequence,
                    QueuedJob {
                        job: Arc::new(job),
                        record,
                        persistent: true,
                        not_before,
                    },
                );
            }

            debug!(job_id = %id, kind, "Restored job");
            shared.emit(id, kind, JobStatus::Pending);
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "Restored persisted jobs");
            shared.wake.notify_one();
        }

        Ok(restored)
    }

    /// Cancel a job.
    ///
    /// A pending job is removed, its compensating hook runs, and its record is
    /// deleted. A running job is only flagged: it sees the request through
    /// [`RunContext::is_canceled`] and will not be retried.
    ///
    /// # Errors
    /// `NotFound` if the job is neither pending nor running.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, QueueError> {
        let queued = {
            let mut state = self.shared.state.lock();

            let sequence = match state.index.get(&id) {
                None => return Err(QueueError::NotFound(id)),
                Some(Slot::Running { canceled, .. }) => {
                    canceled.store(true, Ordering::SeqCst);
                    info!(job_id = %id, "Cancellation requested for running job");
                    return Ok(CancelOutcome::Signalled);
                }
                Some(Slot::Pending(sequence)) => *sequence,
            };

            state.index.remove(&id);
            state.pending.remove(&sequence)
        };

        let Some(queued) = queued else {
            return Err(QueueError::NotFound(id));
        };

        info!(job_id = %id, kind = queued.job.kind(), "Canceling pending job");

        let kind = queued.job.kind();
        let status = self
            .shared
            .compensate(queued.job, id, queued.persistent, Outcome::Canceled)
            .await;
        self.shared.emit(id, kind, status);

        Ok(CancelOutcome::Canceled)
    }

    /// Run the scheduler until a shutdown signal arrives.
    ///
    /// ## Graceful Shutdown
    /// 1. Stop accepting new jobs and stop starting pending ones
    /// 2. Wait for running jobs, up to `shutdown_timeout_secs`
    /// 3. Abandon whatever is left; persistent jobs re-run after restart
    ///
    /// # Errors
    /// Currently infallible; the signature leaves room for fatal store errors.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), QueueError> {
        internal!("Job queue starting");

        let shared = &self.shared;
        let mut system = shared.system.subscribe();
        let mut system_open = true;
        let mut workers = JoinSet::new();

        loop {
            let wake_at = shared.dispatch(&mut workers);
            let deadline = wake_at.unwrap_or_else(Instant::now);

            tokio::select! {
                () = shared.wake.notified() => {}
                changed = system.changed(), if system_open => {
                    if changed.is_err() {
                        system_open = false;
                    }
                }
                () = tokio::time::sleep_until(deadline), if wake_at.is_some() => {}
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "Job worker task failed");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Job queue received shutdown signal");
                        }
                        Err(err) => {
                            error!("Job queue shutdown channel error: {err}");
                        }
                    }
                    break;
                }
            }
        }

        shared.state.lock().accepting = false;

        let in_flight = workers.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight jobs to complete");
        }

        let timeout = Duration::from_secs(shared.config.shutdown_timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Shutdown timeout exceeded, unfinished persistent jobs will re-run on restart"
            );
            workers.abort_all();
        }

        internal!(level = INFO, "Job queue shutdown complete");
        Ok(())
    }
}

impl<J: Job> Shared<J> {
    fn emit(&self, id: JobId, kind: &'static str, status: JobStatus) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent { id, kind, status });
    }

    fn dispatch(self: &Arc<Self>, workers: &mut JoinSet<()>) -> Option<Instant> {
        let free = self.config.workers.max(1).saturating_sub(workers.len());
        let snapshot = self.system.snapshot();
        let (runnable, wake_at) = self
            .state
            .lock()
            .take_runnable(&snapshot, Instant::now(), free);

        for (queued, canceled) in runnable {
            workers.spawn(Arc::clone(self).execute(queued, canceled));
        }

        wake_at
    }

    async fn execute(self: Arc<Self>, queued: QueuedJob<J>, canceled: Arc<AtomicBool>) {
        let QueuedJob {
            job,
            record,
            persistent,
            ..
        } = queued;
        let id = record.id;
        let kind = job.kind();
        let attempt = record.retries_used + 1;

        internal!(level = DEBUG, job = id; "Running {} job, attempt {}", kind, attempt);
        self.emit(id, kind, JobStatus::Running { attempt });

        let body = {
            let job = Arc::clone(&job);
            let context = Arc::clone(&self.context);
            let run = RunContext::new(id, attempt, Arc::clone(&canceled));
            tokio::spawn(async move { job.on_run(&context, &run).await })
        };

        let outcome = match body.await {
            Ok(Ok(())) => return self.succeed(&record, persistent, kind).await,
            Ok(Err(err)) if canceled.load(Ordering::SeqCst) => {
                info!(job_id = %id, kind, error = %err, "Canceled job failed, not retrying");
                Outcome::Canceled
            }
            Ok(Err(err)) if job.should_retry(&err) && record.remaining_retries() > 0 => {
                return self.retry(job, record, persistent, canceled, &err).await;
            }
            Ok(Err(err)) if job.should_retry(&err) => Outcome::Exhausted(err),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(err) => {
                error!(job_id = %id, kind, error = %err, "Job panicked");
                Outcome::Panicked
            }
        };

        let status = self.compensate(job, id, persistent, outcome).await;
        self.state.lock().release(&record);
        self.emit(id, kind, status);
        self.wake.notify_one();
    }

    async fn succeed(&self, record: &JobRecord, persistent: bool, kind: &'static str) {
        debug!(job_id = %record.id, kind, "Job succeeded");

        if persistent {
            self.discard(&record.id).await;
        }

        self.state.lock().release(record);
        self.emit(record.id, kind, JobStatus::Succeeded);
        self.wake.notify_one();
    }

    async fn retry(
        &self,
        job: Arc<J>,
        mut record: JobRecord,
        persistent: bool,
        canceled: Arc<AtomicBool>,
        error: &J::Error,
    ) {
        let id = record.id;
        let kind = job.kind();
        let failed_attempt = record.retries_used + 1;

        record.retries_used += 1;
        let delay = self.config.retry.delay_for(record.retries_used);
        record.next_run_at = Some(SystemTime::now() + delay);
        record.sequence = self.state.lock().allocate_sequence();

        if persistent && let Err(err) = self.store.update(&record).await {
            warn!(job_id = %id, kind, error = %err, "Failed to persist retry state");
        }

        warn!(
            job_id = %id,
            kind,
            attempt = failed_attempt,
            remaining = record.remaining_retries(),
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Job failed, scheduling retry"
        );

        let requeued = {
            let mut state = self.state.lock();
            state.release(&record);

            // A cancel that raced the failure wins over the retry.
            if canceled.load(Ordering::SeqCst) {
                None
            } else {
                state.index.insert(id, Slot::Pending(record.sequence));
                state.pending.insert(
                    record.sequence,
                    QueuedJob {
                        job: Arc::clone(&job),
                        record,
                        persistent,
                        not_before: Some(Instant::now() + delay),
                    },
                );
                Some(())
            }
        };

        let status = if requeued.is_some() {
            JobStatus::FailedRetryable {
                attempt: failed_attempt,
                retry_in: delay,
            }
        } else {
            self.compensate(job, id, persistent, Outcome::Canceled).await
        };

        self.emit(id, kind, status);
        self.wake.notify_one();
    }

    /// Run the job's cancellation hook, then drop its persisted record.
    async fn compensate(
        &self,
        job: Arc<J>,
        id: JobId,
        persistent: bool,
        outcome: Outcome<J::Error>,
    ) -> JobStatus {
        let kind = job.kind();
        let status = match &outcome {
            Outcome::Canceled => JobStatus::Canceled,
            other => JobStatus::FailedTerminal {
                reason: other.as_reason().to_string(),
            },
        };

        if let JobStatus::FailedTerminal { reason } = &status {
            warn!(job_id = %id, kind, reason = %reason, "Job failed terminally");
        }

        let context = Arc::clone(&self.context);
        let hook = tokio::spawn(async move {
            job.on_canceled(&context, outcome.as_reason()).await;
        });

        if let Err(err) = hook.await {
            error!(job_id = %id, kind, error = %err, "Cancellation hook panicked");
        }

        if persistent {
            self.discard(&id).await;
        }

        status
    }

    async fn discard(&self, id: &JobId) {
        if let Err(err) = self.store.delete(id).await {
            warn!(job_id = %id, error = %err, "Failed to delete finished job from spool");
        }
    }
}
