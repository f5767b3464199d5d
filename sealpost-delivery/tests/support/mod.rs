#![allow(dead_code)]

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sealpost_common::{Signal, SystemState};
use sealpost_delivery::{
    AccountManager, Attachment, DeliveredCallback, DeliveryConfig, DeliveryRecord,
    DeliveryService, ImageCodec, InMemoryMessageStore, MasterSecret, MediaError, MessageId,
    MessageState, Notifier, PreKeyBundle,
    PreKeyGenerator, PushError, SecurityFlags, SendResult, SentCallback, SessionCipher,
    SessionError, ThreadId, TransportAdapter, TransportError, transport::Segment,
};
use sealpost_jobs::{ExecutorConfig, JobEvent, JobId, JobStatus, RetryPolicy};
use sealpost_spool::{BackingStore, TestBackingStore};
use tokio::{sync::broadcast, task::JoinHandle};

pub const RECIPIENT: &str = "+15550100";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSegment {
    pub destination: String,
    pub payload: Vec<u8>,
    pub token: String,
}

/// Records every segment and fires its sent callback straight away, with
/// scripted results (`Sent` once the script runs out).
#[derive(Debug, Default)]
pub struct FakeTransport {
    sends: Mutex<Vec<SentSegment>>,
    delivered: Mutex<Vec<DeliveredCallback>>,
    results: Mutex<VecDeque<SendResult>>,
    multipart_fault: AtomicBool,
    panic_on_send: AtomicBool,
    reject: AtomicBool,
    multipart_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn sends(&self) -> Vec<SentSegment> {
        self.sends.lock().clone()
    }

    pub fn take_delivered(&self) -> Vec<DeliveredCallback> {
        std::mem::take(&mut *self.delivered.lock())
    }

    pub fn script(&self, results: impl IntoIterator<Item = SendResult>) {
        self.results.lock().extend(results);
    }

    pub fn set_multipart_fault(&self, fault: bool) {
        self.multipart_fault.store(fault, Ordering::SeqCst);
    }

    pub fn set_panic_on_send(&self, panic: bool) {
        self.panic_on_send.store(panic, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn multipart_calls(&self) -> usize {
        self.multipart_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for FakeTransport {
    async fn send(
        &self,
        destination: &str,
        payload: Vec<u8>,
        sent: SentCallback,
        delivered: Option<DeliveredCallback>,
    ) -> Result<(), TransportError> {
        if self.panic_on_send.load(Ordering::SeqCst) {
            panic!("null segment for {destination}");
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("invalid pdu".into()));
        }

        self.sends.lock().push(SentSegment {
            destination: destination.to_string(),
            payload,
            token: sent.token(),
        });
        if let Some(delivered) = delivered {
            self.delivered.lock().push(delivered);
        }

        let result = self.results.lock().pop_front().unwrap_or(SendResult::Sent);
        sent.fire(result);
        Ok(())
    }

    async fn send_multipart(
        &self,
        destination: &str,
        segments: Vec<Segment>,
    ) -> Result<(), TransportError> {
        self.multipart_calls.fetch_add(1, Ordering::SeqCst);
        if self.multipart_fault.load(Ordering::SeqCst) {
            return Err(TransportError::Fault("multipart divide failed".into()));
        }

        for segment in segments {
            self.send(destination, segment.payload, segment.sent, segment.delivered)
                .await?;
        }
        Ok(())
    }
}

/// "Encrypts" by prefixing, for recipients with an established session.
#[derive(Debug, Default)]
pub struct FakeSessions {
    established: Mutex<HashSet<String>>,
}

impl FakeSessions {
    pub fn establish(&self, recipient: &str) {
        self.established.lock().insert(recipient.to_string());
    }

    pub fn ciphertext(plaintext: &[u8]) -> Vec<u8> {
        [b"enc:".as_slice(), plaintext].concat()
    }
}

#[async_trait]
impl SessionCipher for FakeSessions {
    async fn encrypt(
        &self,
        _master: &MasterSecret,
        recipient: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        if self.established.lock().contains(recipient) {
            Ok(Self::ciphertext(plaintext))
        } else {
            Err(SessionError::NoSession(recipient.to_string()))
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    failures: Mutex<Vec<(ThreadId, Vec<String>)>>,
}

impl RecordingNotifier {
    pub fn failures(&self) -> Vec<(ThreadId, Vec<String>)> {
        self.failures.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn delivery_failed(&self, thread: ThreadId, recipients: &[String]) {
        self.failures.lock().push((thread, recipients.to_vec()));
    }
}

#[derive(Debug, Default)]
pub struct FakeAccounts {
    pub push_registered: AtomicBool,
    pub signed_registered: AtomicBool,
    pub available: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub upload_attempts: AtomicUsize,
    upload_results: Mutex<VecDeque<Result<(), PushError>>>,
    uploaded: Mutex<Vec<PreKeyBundle>>,
}

impl FakeAccounts {
    pub fn registered(available: usize, signed: bool) -> Self {
        let accounts = Self::default();
        accounts.push_registered.store(true, Ordering::SeqCst);
        accounts.signed_registered.store(signed, Ordering::SeqCst);
        accounts.available.store(available, Ordering::SeqCst);
        accounts
    }

    pub fn script_uploads(&self, results: impl IntoIterator<Item = Result<(), PushError>>) {
        self.upload_results.lock().extend(results);
    }

    pub fn uploaded(&self) -> Vec<PreKeyBundle> {
        self.uploaded.lock().clone()
    }
}

#[async_trait]
impl AccountManager for FakeAccounts {
    async fn is_push_registered(&self) -> bool {
        self.push_registered.load(Ordering::SeqCst)
    }

    async fn is_signed_pre_key_registered(&self) -> bool {
        self.signed_registered.load(Ordering::SeqCst)
    }

    async fn set_signed_pre_key_registered(&self, registered: bool) {
        self.signed_registered.store(registered, Ordering::SeqCst);
    }

    async fn pre_key_count(&self) -> Result<usize, PushError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn upload_pre_keys(&self, bundle: &PreKeyBundle) -> Result<(), PushError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        self.upload_results.lock().pop_front().unwrap_or(Ok(()))?;
        self.uploaded.lock().push(bundle.clone());
        self.available
            .fetch_add(bundle.pre_keys.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePreKeys;

impl PreKeyGenerator for FakePreKeys {
    fn generate(&self, _master: &MasterSecret) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: vec![1; 32],
            pre_keys: (0..100u8).map(|i| vec![i; 32]).collect(),
            last_resort_key: vec![0xff; 32],
            signed_pre_key: vec![2; 64],
        }
    }
}

/// Images carry their dimensions in the first 8 bytes. Scaling clamps the
/// dimensions and truncates the data to the byte ceiling.
#[derive(Debug, Default)]
pub struct FakeCodec {
    pub scaled: AtomicUsize,
}

pub fn image(width: u32, height: u32, size: usize) -> Attachment {
    let mut data = Vec::with_capacity(size.max(8));
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.resize(size.max(8), 0);
    Attachment::new("image/jpeg", data)
}

impl ImageCodec for FakeCodec {
    fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), MediaError> {
        let header = data
            .get(..8)
            .ok_or_else(|| MediaError::Decode("short image".into()))?;
        let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        Ok((width, height))
    }

    fn scale(
        &self,
        data: &[u8],
        max_width: u32,
        max_height: u32,
        max_size: usize,
    ) -> Result<Vec<u8>, MediaError> {
        self.scaled.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.dimensions(data)?;
        Ok(image(
            width.min(max_width),
            height.min(max_height),
            data.len().min(max_size),
        )
        .data)
    }
}

pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        workers: 2,
        retry: RetryPolicy {
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 1_000,
            retry_jitter_factor: 0.0,
        },
        shutdown_timeout_secs: 5,
    }
}

pub fn sms(id: u64, recipient: &str, body: &str) -> DeliveryRecord {
    DeliveryRecord {
        id: MessageId(id),
        thread_id: ThreadId(100 + id),
        recipients: vec![recipient.to_string()],
        body: body.to_string(),
        message_type: 0x20,
        flags: SecurityFlags::default(),
        state: MessageState::Pending,
        delivery_report: None,
        attachments: Vec::new(),
    }
}

pub fn secure_sms(id: u64, recipient: &str, body: &str) -> DeliveryRecord {
    DeliveryRecord {
        flags: SecurityFlags {
            secure: true,
            ..SecurityFlags::default()
        },
        ..sms(id, recipient, body)
    }
}

pub struct Harness {
    pub service: Arc<DeliveryService>,
    pub messages: Arc<InMemoryMessageStore>,
    pub transport: Arc<FakeTransport>,
    pub sessions: Arc<FakeSessions>,
    pub notifier: Arc<RecordingNotifier>,
    pub accounts: Arc<FakeAccounts>,
    pub codec: Arc<FakeCodec>,
    pub spool: TestBackingStore,
    pub system: SystemState,
    shutdown: broadcast::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            DeliveryConfig::default(),
            TestBackingStore::new(),
            Arc::new(InMemoryMessageStore::new()),
            FakeAccounts::default(),
        )
    }

    pub fn with_accounts(accounts: FakeAccounts) -> Self {
        Self::with_parts(
            DeliveryConfig::default(),
            TestBackingStore::new(),
            Arc::new(InMemoryMessageStore::new()),
            accounts,
        )
    }

    pub fn with_parts(
        delivery: DeliveryConfig,
        spool: TestBackingStore,
        messages: Arc<InMemoryMessageStore>,
        accounts: FakeAccounts,
    ) -> Self {
        let system = SystemState::default();
        let transport = Arc::new(FakeTransport::default());
        let sessions = Arc::new(FakeSessions::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let accounts = Arc::new(accounts);
        let codec = Arc::new(FakeCodec::default());
        let backing: Arc<dyn BackingStore> = Arc::new(spool.clone());

        let service = DeliveryService::builder()
            .executor(fast_config())
            .delivery(delivery)
            .backing_store(backing)
            .system(system.clone())
            .message_store(Arc::clone(&messages) as _)
            .sessions(Arc::clone(&sessions) as _)
            .transport(Arc::clone(&transport) as _)
            .notifier(Arc::clone(&notifier) as _)
            .accounts(Arc::clone(&accounts) as _)
            .pre_keys(Arc::new(FakePreKeys))
            .image_codec(Arc::clone(&codec) as _)
            .build()
            .expect("service builds");
        let (shutdown, _) = broadcast::channel(1);

        Self {
            service: Arc::new(service),
            messages,
            transport,
            sessions,
            notifier,
            accounts,
            codec,
            spool,
            system,
            shutdown,
            handle: None,
        }
    }

    /// Satisfy every requirement a job can declare.
    pub fn ready(&self) {
        self.system.set_network_available(true);
        self.system.set_service_bound(true);
        self.unlock();
    }

    pub fn unlock(&self) {
        self.service
            .keys()
            .unlock(MasterSecret::new(vec![7u8; 32]));
    }

    pub fn state(&self, id: u64) -> MessageState {
        self.messages
            .get(MessageId(id))
            .expect("message exists")
            .state
    }

    pub fn start(&mut self) {
        let service = Arc::clone(&self.service);
        let rx = self.shutdown.subscribe();
        self.handle = Some(tokio::spawn(async move {
            service.serve(rx).await.expect("serve");
        }));
    }

    pub async fn stop(&mut self) {
        self.shutdown.send(Signal::Shutdown).expect("service is listening");
        if let Some(handle) = self.handle.take() {
            handle.await.expect("serve task");
        }
    }

    pub async fn send(&self, id: u64) -> JobId {
        self.service
            .send_message(MessageId(id), RECIPIENT)
            .await
            .expect("enqueue")
    }

    pub async fn wait_for_state(&self, id: u64, state: MessageState) {
        let messages = Arc::clone(&self.messages);
        wait_until(move || {
            messages
                .get(MessageId(id))
                .is_some_and(|message| message.state == state)
        })
        .await;
    }
}

/// Poll `condition` until it holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition did not hold in time");
}

/// Every status `id` goes through, up to and including the terminal one.
pub async fn statuses_until_terminal(
    events: &mut broadcast::Receiver<JobEvent>,
    id: JobId,
) -> Vec<JobStatus> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event stream");
            if event.id != id {
                continue;
            }
            let terminal = event.status.is_terminal();
            seen.push(event.status);
            if terminal {
                return seen;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

pub async fn wait_terminal(events: &mut broadcast::Receiver<JobEvent>, id: JobId) -> JobStatus {
    statuses_until_terminal(events, id)
        .await
        .pop()
        .expect("at least one status")
}
