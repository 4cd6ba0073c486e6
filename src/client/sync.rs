// src/client/sync.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;

use crate::client::PipelineError;
use crate::client::store::{QueueStore, QueuedAttempt};
use crate::client::transport::{AttemptTransport, TransportError};
use crate::models::attempt::{AttemptResponse, BulkSubmitResponse, SubmitAttemptRequest};

/// Tuning knobs for the synchronizer. Defaults mirror production behavior;
/// tests tighten the intervals.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub initial_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Step removed from the concurrency limit after a server-error batch.
    /// Recovery adds 1 per healthy batch.
    pub concurrency_step: usize,
    pub initial_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// EMA smoothing factor for observed batch durations.
    pub timeout_smoothing: f64,
    /// Multiplier applied to the current timeout while congested, instead
    /// of recalculating from the EMA.
    pub timeout_inflation: f64,
    pub sync_interval: Duration,
    /// First 429 cooldown window; doubles per consecutive 429, plus jitter.
    pub cooldown_base: Duration,
    pub cooldown_cap: Duration,
    /// Bounded retry for the degraded direct-submit path.
    pub direct_retry_limit: u32,
    pub direct_retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            initial_concurrency: 5,
            min_concurrency: 2,
            max_concurrency: 25,
            concurrency_step: 2,
            initial_timeout: Duration::from_millis(5000),
            min_timeout: Duration::from_millis(3000),
            max_timeout: Duration::from_millis(15000),
            timeout_smoothing: 0.25,
            timeout_inflation: 1.4,
            sync_interval: Duration::from_secs(5),
            cooldown_base: Duration::from_secs(1),
            cooldown_cap: Duration::from_secs(60),
            direct_retry_limit: 3,
            direct_retry_delay: Duration::from_millis(500),
        }
    }
}

/// What happened to one submitted batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub size: usize,
    /// Confirmed by the server (created or already attempted); local copies deleted.
    pub confirmed: usize,
    /// Definitively rejected; local copies deleted, never retried.
    pub dropped: usize,
    /// Still queued for a later tick.
    pub retained: usize,
    pub duration_ms: u64,
    pub server_error: bool,
    pub timed_out: bool,
    pub rate_limited: bool,
    /// Every item in a multi-item batch was rejected; the tick stops early.
    pub fatal_block: bool,
}

/// Broadcast on every state transition so a UI or test harness can assert
/// on internal state without inspecting storage.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    pub pending: usize,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub failure_streak: u32,
    pub rate_limit_streak: u32,
    pub first_error_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cooling_down: bool,
    pub last_batch: Option<BatchOutcome>,
    pub syncing: bool,
}

/// Adaptive control state for one presentation key.
struct KeyState {
    concurrency: usize,
    timeout: Duration,
    ema_ms: Option<f64>,
    cooldown_until: Option<Instant>,
    rate_limit_streak: u32,
    failure_streak: u32,
    first_error_at: Option<chrono::DateTime<chrono::Utc>>,
    last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    last_batch: Option<BatchOutcome>,
}

struct KeyEntry {
    /// Binary tick lock: a call that finds it held returns immediately.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<KeyState>,
    snapshot: watch::Sender<SyncSnapshot>,
    timer: Mutex<Option<AbortHandle>>,
    /// Set by `stop`: detaches the key from connectivity triggers until the
    /// next enqueue.
    stopped: AtomicBool,
}

struct SyncerInner {
    store: QueueStore,
    transport: Arc<dyn AttemptTransport>,
    options: SyncOptions,
    keys: Mutex<HashMap<String, Arc<KeyEntry>>>,
}

/// Result of handing an attempt to the pipeline.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Durably queued; the synchronizer owns delivery from here.
    Queued(QueuedAttempt),
    /// Degraded path: the store was unavailable, so the attempt went
    /// straight to the server.
    SubmittedDirect(AttemptResponse),
}

/// Background reconciliation of queued attempts against the server, one
/// independent loop per presentation key.
///
/// All per-key mutable state (locks, timers, adaptive limits) lives in this
/// instance's registry; constructing isolated syncers in tests needs no
/// global teardown.
#[derive(Clone)]
pub struct AttemptSyncer {
    inner: Arc<SyncerInner>,
}

impl AttemptSyncer {
    pub fn new(
        store: QueueStore,
        transport: Arc<dyn AttemptTransport>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SyncerInner {
                store,
                transport,
                options,
                keys: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Durably enqueues an attempt and nudges the synchronizer for its key.
    ///
    /// Re-queuing an already-pending answer is a no-op returning the
    /// existing record. If the store is unavailable the attempt falls back
    /// to a direct submission with a bounded retry — the caller never
    /// crashes because storage would not open.
    pub async fn queue_attempt(
        &self,
        presentation_id: i64,
        answer_id: i64,
        question_id: i64,
        presentation_key: &str,
    ) -> Result<EnqueueOutcome, PipelineError> {
        match self
            .inner
            .store
            .enqueue(presentation_id, answer_id, question_id, presentation_key)
            .await
        {
            Ok((record, _created)) => {
                self.ensure_timer(presentation_key);
                self.trigger(presentation_key);
                Ok(EnqueueOutcome::Queued(record))
            }
            Err(err) => {
                tracing::warn!(
                    "Queue store unavailable ({}), falling back to direct submission",
                    err
                );
                self.submit_direct(presentation_id, answer_id).await
            }
        }
    }

    /// Runs one synchronization tick for the key and waits for it to finish.
    /// A tick already in flight absorbs the call (no-op, not queued).
    pub async fn sync_now(&self, presentation_key: &str) {
        self.run_tick(presentation_key).await;
    }

    /// Fire-and-forget tick.
    pub fn trigger(&self, presentation_key: &str) {
        let syncer = self.clone();
        let key = presentation_key.to_string();
        tokio::spawn(async move {
            syncer.run_tick(&key).await;
        });
    }

    /// Connectivity regained: nudge every key that has not been stopped.
    pub fn notify_online(&self) {
        let keys: Vec<String> = self
            .inner
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| !entry.stopped.load(Ordering::SeqCst))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.trigger(&key);
        }
    }

    /// Observability feed for one key.
    pub fn subscribe(&self, presentation_key: &str) -> watch::Receiver<SyncSnapshot> {
        self.entry(presentation_key).snapshot.subscribe()
    }

    /// Stops the recurring timer for a key and detaches it from the
    /// connectivity trigger. In-flight requests are not aborted; their
    /// completions only clear confirmed items, which is safe after a stop.
    pub fn stop(&self, presentation_key: &str) {
        if let Some(entry) = self.inner.keys.lock().unwrap().get(presentation_key) {
            entry.stopped.store(true, Ordering::SeqCst);
            if let Some(handle) = entry.timer.lock().unwrap().take() {
                handle.abort();
            }
        }
    }

    fn entry(&self, key: &str) -> Arc<KeyEntry> {
        let mut keys = self.inner.keys.lock().unwrap();
        keys.entry(key.to_string())
            .or_insert_with(|| {
                let options = &self.inner.options;
                Arc::new(KeyEntry {
                    gate: tokio::sync::Mutex::new(()),
                    state: Mutex::new(KeyState {
                        concurrency: options
                            .initial_concurrency
                            .clamp(options.min_concurrency, options.max_concurrency),
                        timeout: options
                            .initial_timeout
                            .clamp(options.min_timeout, options.max_timeout),
                        ema_ms: None,
                        cooldown_until: None,
                        rate_limit_streak: 0,
                        failure_streak: 0,
                        first_error_at: None,
                        last_error_at: None,
                        last_batch: None,
                    }),
                    snapshot: watch::Sender::new(SyncSnapshot::default()),
                    timer: Mutex::new(None),
                    stopped: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Starts the 5s interval loop for a key, once. The first interval tick
    /// fires immediately and is consumed here: the enqueue that started the
    /// timer already triggered a tick of its own.
    fn ensure_timer(&self, key: &str) {
        let entry = self.entry(key);
        entry.stopped.store(false, Ordering::SeqCst);
        let mut timer = entry.timer.lock().unwrap();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let syncer = self.clone();
        let key_owned = key.to_string();
        let period = self.inner.options.sync_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                syncer.run_tick(&key_owned).await;
            }
        });
        *timer = Some(handle.abort_handle());
    }

    /// One drain-and-submit pass for a key.
    async fn run_tick(&self, key: &str) {
        let entry = self.entry(key);
        // Overlapping runs for the same key are no-ops; other keys are
        // untouched because each has its own gate.
        let Ok(_guard) = entry.gate.try_lock() else {
            return;
        };

        let pending = match self.inner.store.pending_for_key(key).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!("Failed to read queue for {}: {}", key, err);
                return;
            }
        };

        // Structurally invalid rows can never submit; purge without a
        // network call.
        let mut valid = Vec::with_capacity(pending.len());
        for record in pending {
            if record.is_structurally_valid() {
                valid.push(record);
            } else {
                tracing::warn!("Purging malformed queued attempt {}", record.id);
                if let Err(err) = self.inner.store.delete(&record.id).await {
                    tracing::warn!("Failed to purge {}: {}", record.id, err);
                }
            }
        }

        self.publish(&entry, valid.len(), true);

        let mut index = 0;
        let mut retained_total = 0;
        while index < valid.len() {
            let (concurrency, timeout, cooling) = {
                let state = entry.state.lock().unwrap();
                let cooling = state
                    .cooldown_until
                    .is_some_and(|until| Instant::now() < until);
                (state.concurrency, state.timeout, cooling)
            };
            if cooling {
                // Rate-limit window still open: no requests for this key.
                break;
            }

            let end = (index + concurrency).min(valid.len());
            let batch = &valid[index..end];
            index = end;

            let started = Instant::now();
            let mut outcome = self.submit_batch(&entry, batch, timeout).await;
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            retained_total += outcome.retained;
            let fatal = outcome.fatal_block;

            self.adapt(&entry, &outcome);
            self.publish(&entry, valid.len() - index + retained_total, true);

            if fatal {
                break;
            }
        }

        let pending_now = self
            .inner
            .store
            .pending_for_key(key)
            .await
            .map(|p| p.len())
            .unwrap_or(0);
        self.publish(&entry, pending_now, false);
    }

    /// Submits one batch: bulk endpoint for multi-item batches, falling back
    /// to per-item singles when the bulk call fails; single-item batches go
    /// straight to the single endpoint.
    async fn submit_batch(
        &self,
        entry: &Arc<KeyEntry>,
        batch: &[QueuedAttempt],
        timeout: Duration,
    ) -> BatchOutcome {
        if batch.len() > 1 {
            let requests: Vec<SubmitAttemptRequest> = batch
                .iter()
                .map(|record| SubmitAttemptRequest {
                    presentation_id: record.presentation_id,
                    answer_id: record.answer_id,
                })
                .collect();

            match self.inner.transport.submit_bulk(&requests, timeout).await {
                Ok(response) => return self.reconcile_bulk(batch, &response).await,
                Err(TransportError::RateLimited) => {
                    self.start_cooldown(entry);
                    return BatchOutcome {
                        size: batch.len(),
                        retained: batch.len(),
                        rate_limited: true,
                        ..Default::default()
                    };
                }
                Err(err) => {
                    tracing::debug!(
                        "Bulk submission of {} attempts failed ({}); retrying via single endpoint",
                        batch.len(),
                        err
                    );
                }
            }
        }

        self.submit_singles(entry, batch, timeout).await
    }

    /// Applies a bulk response: every reported status is a final server
    /// decision, so the local copy is deleted whether the server accepted or
    /// definitively rejected. An item missing from the results list is a
    /// server-error signal and stays queued.
    async fn reconcile_bulk(
        &self,
        batch: &[QueuedAttempt],
        response: &BulkSubmitResponse,
    ) -> BatchOutcome {
        use crate::models::attempt::BulkAttemptStatus;

        let mut statuses: HashMap<(i64, i64), BulkAttemptStatus> = HashMap::new();
        for result in &response.results {
            statuses.insert((result.presentation_id, result.answer_id), result.status);
        }

        let mut outcome = BatchOutcome {
            size: batch.len(),
            ..Default::default()
        };

        for record in batch {
            match statuses.get(&(record.presentation_id, record.answer_id)) {
                Some(status) => {
                    if let Err(err) = self.inner.store.delete(&record.id).await {
                        tracing::warn!("Failed to clear synced attempt {}: {}", record.id, err);
                        outcome.retained += 1;
                        continue;
                    }
                    match status {
                        BulkAttemptStatus::Created | BulkAttemptStatus::AlreadyAttempted => {
                            outcome.confirmed += 1;
                        }
                        BulkAttemptStatus::NotFound | BulkAttemptStatus::Invalid => {
                            tracing::info!(
                                "Attempt {} definitively rejected in bulk ({:?}); dropped",
                                record.id,
                                status
                            );
                            outcome.dropped += 1;
                        }
                    }
                }
                None => {
                    outcome.retained += 1;
                    outcome.server_error = true;
                }
            }
        }

        outcome
    }

    /// Concurrent per-item submissions, bounded by the batch size (which is
    /// already capped at the key's concurrency limit).
    async fn submit_singles(
        &self,
        entry: &Arc<KeyEntry>,
        batch: &[QueuedAttempt],
        timeout: Duration,
    ) -> BatchOutcome {
        enum Disposition {
            Confirmed,
            Dropped,
            Retained,
            RateLimited,
            TimedOut,
            ServerError,
        }

        let mut set = JoinSet::new();
        for record in batch {
            let transport = Arc::clone(&self.inner.transport);
            let store = self.inner.store.clone();
            let request = SubmitAttemptRequest {
                presentation_id: record.presentation_id,
                answer_id: record.answer_id,
            };
            let id = record.id.clone();
            set.spawn(async move {
                match transport.submit(&request, timeout).await {
                    Ok(_) => match store.delete(&id).await {
                        Ok(()) => Disposition::Confirmed,
                        Err(err) => {
                            tracing::warn!("Failed to clear synced attempt {}: {}", id, err);
                            Disposition::Retained
                        }
                    },
                    Err(TransportError::Rejected(status)) => {
                        // The server will never accept this pair; keeping it
                        // queued would retry forever.
                        tracing::info!("Attempt {} rejected ({}); dropped from queue", id, status);
                        match store.delete(&id).await {
                            Ok(()) => Disposition::Dropped,
                            Err(err) => {
                                tracing::warn!("Failed to drop {}: {}", id, err);
                                Disposition::Retained
                            }
                        }
                    }
                    Err(TransportError::RateLimited) => Disposition::RateLimited,
                    Err(TransportError::Timeout) => Disposition::TimedOut,
                    Err(err) => {
                        tracing::debug!("Attempt {} submission failed: {}", id, err);
                        Disposition::ServerError
                    }
                }
            });
        }

        let mut outcome = BatchOutcome {
            size: batch.len(),
            ..Default::default()
        };

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Disposition::Confirmed) => outcome.confirmed += 1,
                Ok(Disposition::Dropped) => outcome.dropped += 1,
                Ok(Disposition::Retained) => outcome.retained += 1,
                Ok(Disposition::RateLimited) => {
                    outcome.retained += 1;
                    outcome.rate_limited = true;
                }
                Ok(Disposition::TimedOut) => {
                    outcome.retained += 1;
                    outcome.timed_out = true;
                }
                Ok(Disposition::ServerError) => {
                    outcome.retained += 1;
                    outcome.server_error = true;
                }
                Err(err) => {
                    tracing::warn!("Submission task failed: {}", err);
                    outcome.retained += 1;
                    outcome.server_error = true;
                }
            }
        }

        if outcome.rate_limited {
            self.start_cooldown(entry);
        }

        // A multi-item batch rejected wholesale cannot make progress this
        // tick; surviving batches wait for the next trigger.
        outcome.fatal_block = batch.len() > 1 && outcome.dropped == batch.len();

        outcome
    }

    /// Opens (or extends) the 429 cooldown window: exponential growth per
    /// consecutive 429 with jitter, capped.
    fn start_cooldown(&self, entry: &Arc<KeyEntry>) {
        let options = &self.inner.options;
        let mut state = entry.state.lock().unwrap();
        state.rate_limit_streak += 1;
        let exponent = (state.rate_limit_streak - 1).min(10);
        let base_ms = options.cooldown_base.as_millis() as u64;
        let window_ms = (base_ms * 2u64.pow(exponent)).min(options.cooldown_cap.as_millis() as u64);
        let jitter_ms = rand::rng().random_range(0..=window_ms / 4);
        state.cooldown_until = Some(Instant::now() + Duration::from_millis(window_ms + jitter_ms));
        tracing::debug!(
            "Rate limited (streak {}); cooling down for {}ms",
            state.rate_limit_streak,
            window_ms + jitter_ms
        );
    }

    /// Per-batch control loop: concurrency steps down on server-error
    /// signals and creeps back up on healthy batches; the timeout tracks
    /// 2x the EMA of observed durations, inflating multiplicatively while
    /// congested. Definitive 4xx rejects move neither.
    fn adapt(&self, entry: &Arc<KeyEntry>, outcome: &BatchOutcome) {
        let options = &self.inner.options;
        let mut state = entry.state.lock().unwrap();
        let now = chrono::Utc::now();

        state.last_batch = Some(outcome.clone());

        let congested = outcome.server_error || outcome.timed_out;
        if congested {
            state.failure_streak += 1;
            state.first_error_at.get_or_insert(now);
            state.last_error_at = Some(now);
            state.concurrency = state
                .concurrency
                .saturating_sub(options.concurrency_step)
                .max(options.min_concurrency);
            let inflated = state.timeout.as_millis() as f64 * options.timeout_inflation;
            state.timeout = clamp_timeout(inflated, options);
        } else if outcome.rate_limited {
            state.failure_streak += 1;
            state.first_error_at.get_or_insert(now);
            state.last_error_at = Some(now);
            // Concurrency untouched; the cooldown window does the throttling.
        } else {
            state.failure_streak = 0;
            state.first_error_at = None;
            state.rate_limit_streak = 0;
            state.cooldown_until = None;
            let observed = outcome.duration_ms as f64;
            let ema = match state.ema_ms {
                None => observed,
                Some(previous) => previous + options.timeout_smoothing * (observed - previous),
            };
            state.ema_ms = Some(ema);
            state.timeout = clamp_timeout(2.0 * ema, options);
            state.concurrency = (state.concurrency + 1).min(options.max_concurrency);
        }
    }

    fn publish(&self, entry: &Arc<KeyEntry>, pending: usize, syncing: bool) {
        let state = entry.state.lock().unwrap();
        let snapshot = SyncSnapshot {
            pending,
            concurrency: state.concurrency,
            timeout_ms: state.timeout.as_millis() as u64,
            failure_streak: state.failure_streak,
            rate_limit_streak: state.rate_limit_streak,
            first_error_at: state.first_error_at,
            last_error_at: state.last_error_at,
            cooling_down: state
                .cooldown_until
                .is_some_and(|until| Instant::now() < until),
            last_batch: state.last_batch.clone(),
            syncing,
        };
        entry.snapshot.send_replace(snapshot);
    }

    /// Degraded path for when the durable store cannot accept the enqueue:
    /// a direct, non-queued submission with a bounded retry.
    async fn submit_direct(
        &self,
        presentation_id: i64,
        answer_id: i64,
    ) -> Result<EnqueueOutcome, PipelineError> {
        let options = &self.inner.options;
        let request = SubmitAttemptRequest {
            presentation_id,
            answer_id,
        };

        let mut tries = 0;
        loop {
            tries += 1;
            match self
                .inner
                .transport
                .submit(&request, options.initial_timeout)
                .await
            {
                Ok(response) => return Ok(EnqueueOutcome::SubmittedDirect(response)),
                Err(err) if err.is_retryable() && tries < options.direct_retry_limit => {
                    tokio::time::sleep(options.direct_retry_delay).await;
                }
                Err(err) => return Err(PipelineError::Submission(err)),
            }
        }
    }
}

fn clamp_timeout(ms: f64, options: &SyncOptions) -> Duration {
    let clamped = ms.clamp(
        options.min_timeout.as_millis() as f64,
        options.max_timeout.as_millis() as f64,
    );
    Duration::from_millis(clamped as u64)
}
