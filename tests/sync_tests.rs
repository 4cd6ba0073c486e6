// tests/sync_tests.rs
//
// Synchronizer behavior against a scripted transport. Paused-time tests
// drive the adaptive control loop without real waiting.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tbl_assess::client::PipelineError;
use tbl_assess::client::store::QueueStore;
use tbl_assess::client::sync::{AttemptSyncer, EnqueueOutcome, SyncOptions};
use tbl_assess::client::transport::{AttemptTransport, TransportError};
use tbl_assess::models::attempt::{
    AttemptResponse, BulkAttemptResult, BulkAttemptStatus, BulkSubmitResponse,
    SubmitAttemptRequest,
};

enum BulkReply {
    AllCreated,
    Fail(TransportError),
    /// Results list omits the first input pair — malformed per-item shape.
    MissingFirst,
}

/// Transport with programmable replies. Scripts are consumed per call;
/// an exhausted script answers success.
struct ScriptedTransport {
    delay: Duration,
    single_calls: AtomicUsize,
    bulk_calls: AtomicUsize,
    single_script: Mutex<VecDeque<Result<AttemptResponse, TransportError>>>,
    bulk_script: Mutex<VecDeque<BulkReply>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            single_calls: AtomicUsize::new(0),
            bulk_calls: AtomicUsize::new(0),
            single_script: Mutex::new(VecDeque::new()),
            bulk_script: Mutex::new(VecDeque::new()),
        }
    }

    fn script_single(&self, reply: Result<AttemptResponse, TransportError>) {
        self.single_script.lock().unwrap().push_back(reply);
    }

    fn script_bulk(&self, reply: BulkReply) {
        self.bulk_script.lock().unwrap().push_back(reply);
    }

    fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }
}

fn created() -> AttemptResponse {
    AttemptResponse {
        correct: true,
        already_attempted: false,
    }
}

#[async_trait]
impl AttemptTransport for ScriptedTransport {
    async fn submit(
        &self,
        _attempt: &SubmitAttemptRequest,
        _timeout: Duration,
    ) -> Result<AttemptResponse, TransportError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.single_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(created()))
    }

    async fn submit_bulk(
        &self,
        attempts: &[SubmitAttemptRequest],
        _timeout: Duration,
    ) -> Result<BulkSubmitResponse, TransportError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.bulk_script.lock().unwrap().pop_front();
        let all_created = |skip: usize| BulkSubmitResponse {
            results: attempts
                .iter()
                .skip(skip)
                .map(|a| BulkAttemptResult {
                    presentation_id: a.presentation_id,
                    answer_id: a.answer_id,
                    status: BulkAttemptStatus::Created,
                })
                .collect(),
        };
        match scripted {
            None | Some(BulkReply::AllCreated) => Ok(all_created(0)),
            Some(BulkReply::Fail(err)) => Err(err),
            Some(BulkReply::MissingFirst) => Ok(all_created(1)),
        }
    }
}

async fn build_syncer(
    transport: std::sync::Arc<ScriptedTransport>,
) -> (AttemptSyncer, QueueStore) {
    let store = QueueStore::in_memory().await.unwrap();
    let syncer = AttemptSyncer::new(store.clone(), transport, SyncOptions::default());
    (syncer, store)
}

const KEY: &str = "pw|alice";

#[tokio::test]
async fn multi_item_queue_drains_through_the_bulk_endpoint() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    let (syncer, store) = build_syncer(transport.clone()).await;

    for answer_id in 1..=3 {
        store.enqueue(7, answer_id, 1, KEY).await.unwrap();
    }

    syncer.sync_now(KEY).await;

    assert_eq!(transport.bulk_calls(), 1);
    assert_eq!(transport.single_calls(), 0);
    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());

    // Healthy batch: concurrency crept up from its default.
    let snapshot = syncer.subscribe(KEY).borrow().clone();
    assert_eq!(snapshot.concurrency, SyncOptions::default().initial_concurrency + 1);
    assert_eq!(snapshot.pending, 0);
    assert!(!snapshot.syncing);
}

#[tokio::test]
async fn queueing_twice_returns_the_same_pending_record() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    // Keep the item pending: every submission attempt fails transiently.
    for _ in 0..8 {
        transport.script_single(Err(TransportError::Server(500)));
        transport.script_bulk(BulkReply::Fail(TransportError::Server(500)));
    }
    let (syncer, store) = build_syncer(transport.clone()).await;

    let first = match syncer.queue_attempt(7, 42, 3, KEY).await.unwrap() {
        EnqueueOutcome::Queued(record) => record,
        other => panic!("expected queued outcome, got {:?}", other),
    };
    let second = match syncer.queue_attempt(7, 42, 3, KEY).await.unwrap() {
        EnqueueOutcome::Queued(record) => record,
        other => panic!("expected queued outcome, got {:?}", other),
    };

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(store.pending_for_key(KEY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bulk_failure_retries_every_item_via_the_single_endpoint() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_bulk(BulkReply::Fail(TransportError::Server(500)));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 1, 1, KEY).await.unwrap();
    store.enqueue(7, 2, 1, KEY).await.unwrap();

    syncer.sync_now(KEY).await;

    assert_eq!(transport.bulk_calls(), 1);
    assert_eq!(transport.single_calls(), 2);
    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());
}

#[tokio::test]
async fn definitive_reject_drops_the_queued_copy() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::Rejected(422)));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();
    syncer.sync_now(KEY).await;

    // Dropped, not retried: a second tick issues no further calls.
    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());
    syncer.sync_now(KEY).await;
    assert_eq!(transport.single_calls(), 1);
}

#[tokio::test]
async fn transient_failure_keeps_the_item_and_steps_concurrency_down() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::Server(503)));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();
    syncer.sync_now(KEY).await;

    let pending = store.pending_for_key(KEY).await.unwrap();
    assert_eq!(pending.len(), 1);

    let options = SyncOptions::default();
    let snapshot = syncer.subscribe(KEY).borrow().clone();
    assert_eq!(
        snapshot.concurrency,
        (options.initial_concurrency - options.concurrency_step).max(options.min_concurrency)
    );
    assert_eq!(snapshot.failure_streak, 1);
    assert!(snapshot.last_error_at.is_some());
}

#[tokio::test]
async fn slow_healthy_batch_raises_the_adaptive_timeout() {
    // A deliberately slow (2000ms) successful batch drives the next timeout
    // to twice the observed duration.
    let transport = std::sync::Arc::new(ScriptedTransport::with_delay(Duration::from_millis(
        2000,
    )));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();
    syncer.sync_now(KEY).await;

    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());
    let snapshot = syncer.subscribe(KEY).borrow().clone();
    assert!(
        (4000..=4100).contains(&snapshot.timeout_ms),
        "expected ~2x the 2000ms batch, got {}ms",
        snapshot.timeout_ms
    );
}

#[tokio::test]
async fn fast_batches_clamp_the_timeout_to_its_floor() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();
    syncer.sync_now(KEY).await;

    let snapshot = syncer.subscribe(KEY).borrow().clone();
    assert_eq!(
        snapshot.timeout_ms,
        SyncOptions::default().min_timeout.as_millis() as u64
    );
}

#[tokio::test]
async fn congestion_inflates_the_timeout_multiplicatively() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::Timeout));
    transport.script_single(Err(TransportError::Timeout));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();

    let initial_ms = SyncOptions::default().initial_timeout.as_millis() as u64;

    syncer.sync_now(KEY).await;
    let after_one = syncer.subscribe(KEY).borrow().clone();
    assert_eq!(after_one.timeout_ms, (initial_ms as f64 * 1.4) as u64);

    syncer.sync_now(KEY).await;
    let after_two = syncer.subscribe(KEY).borrow().clone();
    assert!(after_two.timeout_ms > after_one.timeout_ms);
    assert!(after_two.timeout_ms <= SyncOptions::default().max_timeout.as_millis() as u64);

    assert_eq!(store.pending_for_key(KEY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limit_opens_a_cooldown_window_for_the_key() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::RateLimited));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 42, 3, KEY).await.unwrap();

    syncer.sync_now(KEY).await;
    assert_eq!(transport.single_calls(), 1);
    let snapshot = syncer.subscribe(KEY).borrow().clone();
    assert!(snapshot.cooling_down);
    assert_eq!(snapshot.rate_limit_streak, 1);

    // Retrying before the window elapses must not touch the network.
    syncer.sync_now(KEY).await;
    assert_eq!(transport.single_calls(), 1);
    assert_eq!(store.pending_for_key(KEY).await.unwrap().len(), 1);

    // Base window is 1s (+ up to 25% jitter); 3s is safely past it.
    tokio::time::sleep(Duration::from_secs(3)).await;
    syncer.sync_now(KEY).await;
    assert_eq!(transport.single_calls(), 2);
    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_queue_rows_are_purged_without_a_network_call() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    let (syncer, store) = build_syncer(transport.clone()).await;

    // presentation_id 0 can never submit.
    store.enqueue(0, 42, 3, KEY).await.unwrap();
    syncer.sync_now(KEY).await;

    assert!(store.pending_for_key(KEY).await.unwrap().is_empty());
    assert_eq!(transport.single_calls(), 0);
    assert_eq!(transport.bulk_calls(), 0);
}

#[tokio::test]
async fn bulk_result_missing_an_item_keeps_that_item_queued() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_bulk(BulkReply::MissingFirst);
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 1, 1, KEY).await.unwrap();
    store.enqueue(7, 2, 1, KEY).await.unwrap();

    syncer.sync_now(KEY).await;

    let pending = store.pending_for_key(KEY).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].answer_id, 1);

    let snapshot = syncer.subscribe(KEY).borrow().clone();
    let last_batch = snapshot.last_batch.expect("batch stats");
    assert!(last_batch.server_error);
    assert_eq!(last_batch.confirmed, 1);
    assert_eq!(last_batch.retained, 1);
}

#[tokio::test]
async fn independent_keys_sync_independently() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    // The first key's item is rate limited; the second key must be unaffected.
    transport.script_single(Err(TransportError::RateLimited));
    let (syncer, store) = build_syncer(transport.clone()).await;

    store.enqueue(7, 1, 1, "pw|alice").await.unwrap();
    store.enqueue(8, 1, 1, "pw|bob").await.unwrap();

    syncer.sync_now("pw|alice").await;
    syncer.sync_now("pw|bob").await;

    assert_eq!(store.pending_for_key("pw|alice").await.unwrap().len(), 1);
    assert!(store.pending_for_key("pw|bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_store_falls_back_to_direct_submission() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    let store = QueueStore::in_memory().await.unwrap();
    let syncer = AttemptSyncer::new(store.clone(), transport.clone(), SyncOptions::default());

    // Simulate the durable store dying under the app.
    store.close().await;

    let outcome = syncer.queue_attempt(7, 42, 3, KEY).await.unwrap();
    match outcome {
        EnqueueOutcome::SubmittedDirect(response) => assert!(response.correct),
        other => panic!("expected direct submission, got {:?}", other),
    }
    assert_eq!(transport.single_calls(), 1);
}

#[tokio::test]
async fn direct_submission_retries_transient_failures_within_its_bound() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::Server(500)));
    transport.script_single(Err(TransportError::Server(503)));
    let store = QueueStore::in_memory().await.unwrap();
    let syncer = AttemptSyncer::new(store.clone(), transport.clone(), SyncOptions::default());
    store.close().await;

    let outcome = syncer.queue_attempt(7, 42, 3, KEY).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::SubmittedDirect(_)));
    assert_eq!(transport.single_calls(), 3);
}

#[tokio::test]
async fn direct_submission_does_not_retry_definitive_rejects() {
    let transport = std::sync::Arc::new(ScriptedTransport::new());
    transport.script_single(Err(TransportError::Rejected(404)));
    let store = QueueStore::in_memory().await.unwrap();
    let syncer = AttemptSyncer::new(store.clone(), transport.clone(), SyncOptions::default());
    store.close().await;

    let err = syncer.queue_attempt(7, 42, 3, KEY).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Submission(TransportError::Rejected(404))
    ));
    assert_eq!(transport.single_calls(), 1);
}
