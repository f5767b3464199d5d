#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sealpost_common::{RequirementKind, Signal, SystemState};
use sealpost_jobs::{
    CancelReason, ExecutorConfig, Job, JobEvent, JobId, JobParameters, JobQueue, JobStatus,
    RetryPolicy, RunContext,
};
use sealpost_spool::{BackingStore, TestBackingStore};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behaviour {
    Succeed,
    /// Sleep for the given milliseconds, then succeed.
    Sleep(u64),
    FailTransient,
    FailPermanent,
    /// Fail transiently until the given attempt, then succeed.
    SucceedOnAttempt(u32),
    Panic,
    /// Spin on the cancellation checkpoint, then fail transiently.
    WaitForCancel,
}

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("transient failure")]
    Transient,
    #[error("permanent failure")]
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Added(String),
    Started(String, u32),
    Finished(String),
    Compensated(String, String),
}

#[derive(Debug, Default)]
pub struct Recorder {
    entries: Mutex<Vec<Entry>>,
    running_groups: Mutex<HashSet<String>>,
    overlap: AtomicBool,
}

impl Recorder {
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    pub fn starts(&self) -> Vec<(String, u32)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Started(name, attempt) => Some((name, attempt)),
                _ => None,
            })
            .collect()
    }

    pub fn compensations(&self) -> Vec<(String, String)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Compensated(name, reason) => Some((name, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn saw_group_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    fn push(&self, entry: Entry) {
        self.entries.lock().push(entry);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJob {
    pub name: String,
    pub group: Option<String>,
    pub requirements: Vec<RequirementKind>,
    pub retry_budget: u32,
    pub persistent: bool,
    pub behaviour: Behaviour,
}

impl TestJob {
    pub fn new(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            group: None,
            requirements: Vec::new(),
            retry_budget: 0,
            persistent: true,
            behaviour,
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn requiring(mut self, requirement: RequirementKind) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub const fn with_retries(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub const fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }
}

#[async_trait]
impl Job for TestJob {
    type Context = Recorder;
    type Error = TestError;

    fn kind(&self) -> &'static str {
        "test"
    }

    fn parameters(&self) -> JobParameters {
        let mut builder = JobParameters::builder().retry_budget(self.retry_budget);
        if self.persistent {
            builder = builder.persistent();
        }
        if let Some(group) = &self.group {
            builder = builder.group(group.clone());
        }
        for requirement in &self.requirements {
            builder = builder.requirement(*requirement);
        }
        builder.build()
    }

    async fn on_added(&self, recorder: &Recorder) {
        recorder.push(Entry::Added(self.name.clone()));
    }

    async fn on_run(&self, recorder: &Recorder, run: &RunContext) -> Result<(), TestError> {
        recorder.push(Entry::Started(self.name.clone(), run.attempt()));

        if let Some(group) = &self.group
            && !recorder.running_groups.lock().insert(group.clone())
        {
            recorder.overlap.store(true, Ordering::SeqCst);
        }

        let result = match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Behaviour::FailTransient => Err(TestError::Transient),
            Behaviour::FailPermanent => Err(TestError::Permanent),
            Behaviour::SucceedOnAttempt(n) if run.attempt() >= n => Ok(()),
            Behaviour::SucceedOnAttempt(_) => Err(TestError::Transient),
            Behaviour::Panic => panic!("job {} exploded", self.name),
            Behaviour::WaitForCancel => {
                while !run.is_canceled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(TestError::Transient)
            }
        };

        if let Some(group) = &self.group {
            recorder.running_groups.lock().remove(group);
        }
        recorder.push(Entry::Finished(self.name.clone()));

        result
    }

    fn should_retry(&self, error: &TestError) -> bool {
        matches!(error, TestError::Transient)
    }

    async fn on_canceled(&self, recorder: &Recorder, reason: CancelReason<'_, TestError>) {
        recorder.push(Entry::Compensated(self.name.clone(), reason.to_string()));
    }
}

pub struct Harness {
    pub queue: JobQueue<TestJob>,
    pub store: TestBackingStore,
    pub system: SystemState,
    pub recorder: Arc<Recorder>,
    shutdown: broadcast::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

pub fn fast_config(workers: usize) -> ExecutorConfig {
    ExecutorConfig {
        workers,
        retry: RetryPolicy {
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 1_000,
            retry_jitter_factor: 0.0,
        },
        shutdown_timeout_secs: 5,
    }
}

impl Harness {
    pub fn new(workers: usize, system: SystemState) -> Self {
        Self::with_store(workers, system, TestBackingStore::new())
    }

    pub fn with_store(workers: usize, system: SystemState, store: TestBackingStore) -> Self {
        let recorder = Arc::new(Recorder::default());
        let backing: Arc<dyn BackingStore> = Arc::new(store.clone());
        let queue = JobQueue::new(
            fast_config(workers),
            backing,
            system.clone(),
            Arc::clone(&recorder),
        );
        let (shutdown, _) = broadcast::channel(1);

        Self {
            queue,
            store,
            system,
            recorder,
            shutdown,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        let queue = self.queue.clone();
        let rx = self.shutdown.subscribe();
        self.handle = Some(tokio::spawn(async move {
            queue.serve(rx).await.expect("serve");
        }));
    }

    pub async fn stop(&mut self) {
        self.shutdown.send(Signal::Shutdown).expect("queue is listening");
        if let Some(handle) = self.handle.take() {
            handle.await.expect("serve task");
        }
    }
}

/// Wait until `id` reaches a terminal status and return it.
pub async fn wait_terminal(events: &mut broadcast::Receiver<JobEvent>, id: JobId) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("event stream");
            if event.id == id && event.status.is_terminal() {
                return event.status;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

/// Wait until every id in `ids` reaches a terminal status.
pub async fn wait_all_terminal(
    events: &mut broadcast::Receiver<JobEvent>,
    ids: &[JobId],
) -> HashMap<JobId, JobStatus> {
    tokio::time::timeout(Duration::from_secs(30), async {
        let mut finished = HashMap::new();
        while finished.len() < ids.len() {
            let event = events.recv().await.expect("event stream");
            if ids.contains(&event.id) && event.status.is_terminal() {
                finished.insert(event.id, event.status);
            }
        }
        finished
    })
    .await
    .expect("jobs did not finish in time")
}
