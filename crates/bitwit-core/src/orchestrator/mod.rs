//! Single-flight batch orchestrator.
//!
//! Owns the process-wide batch state. `start_batch` performs the
//! idle-to-running check-and-set under one mutex, then hands the iterations
//! to a background task and returns. Iterations are strictly sequential.
//!
//! Every accepted batch gets a new generation number. `reset` bumps the
//! generation, so an iteration still in flight when the batch is abandoned
//! finishes writing its own lines but no longer advances any bookkeeping.
//!
//! ```text
//! Idle ──start_batch(N)──▶ Running(N, 0) ──run──▶ Running(N, 1) ... Running(N, N)
//!  ▲                                                                   │
//!  ├──────────── marker appended, last_batch recorded ◀────────────────┘
//!  └──────────── reset() (no marker)
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pipeline::RunExecutor;
use crate::runlog::LogSink;

/// Pause between iterations when none is configured.
pub const DEFAULT_RUN_DELAY: Duration = Duration::from_secs(5);

/// Batch run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running { total: u32, completed: u32 },
}

impl BatchState {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchState::Running { .. })
    }
}

/// Summary of a batch that finished or was abandoned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: u32,
    pub completed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the batch was ended by `reset` rather than by its last run
    pub abandoned: bool,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    #[serde(flatten)]
    pub state: BatchState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub succeeded: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub last_batch: Option<BatchSummary>,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Acknowledgement returned by an accepted `start_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchTicket {
    pub batch_id: Uuid,
    pub total: u32,
}

struct ActiveBatch {
    id: Uuid,
    total: u32,
    completed: u32,
    succeeded: u32,
    failed: u32,
    started_at: DateTime<Utc>,
}

impl ActiveBatch {
    fn summary(&self, abandoned: bool) -> BatchSummary {
        BatchSummary {
            batch_id: self.id,
            total: self.total,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
            started_at: self.started_at,
            finished_at: Utc::now(),
            abandoned,
        }
    }
}

struct Inner {
    generation: u64,
    active: Option<ActiveBatch>,
    last_batch: Option<BatchSummary>,
}

impl Inner {
    fn snapshot(&self) -> BatchStatus {
        match &self.active {
            Some(active) => BatchStatus {
                state: BatchState::Running {
                    total: active.total,
                    completed: active.completed,
                },
                batch_id: Some(active.id),
                succeeded: active.succeeded,
                failed: active.failed,
                started_at: Some(active.started_at),
                last_batch: self.last_batch.clone(),
            },
            None => BatchStatus {
                state: BatchState::Idle,
                batch_id: None,
                succeeded: 0,
                failed: 0,
                started_at: None,
                last_batch: self.last_batch.clone(),
            },
        }
    }
}

/// Runs batches of pipeline iterations, one batch at a time.
pub struct BatchOrchestrator {
    executor: Arc<RunExecutor>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<BatchStatus>,
    run_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(executor: Arc<RunExecutor>) -> Self {
        let inner = Inner {
            generation: 0,
            active: None,
            last_batch: None,
        };
        let (status_tx, _) = watch::channel(inner.snapshot());
        Self {
            executor,
            inner: Mutex::new(inner),
            status_tx,
            run_delay: DEFAULT_RUN_DELAY,
        }
    }

    /// Pause between consecutive iterations of a batch.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    fn sink(&self) -> &Arc<LogSink> {
        self.executor.sink()
    }

    /// Accept a batch of `count` runs and start it in the background.
    ///
    /// Fails with `InvalidArgument` when `count` is below 1 and with
    /// `AlreadyRunning` while another batch is active. Returns as soon as the
    /// batch is accepted.
    pub fn start_batch(self: &Arc<Self>, count: i64) -> Result<BatchTicket> {
        let total = u32::try_from(count)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "count must be a positive integer, got {}",
                    count
                ))
            })?;

        let (ticket, generation) = {
            let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
            if let Some(active) = &inner.active {
                return Err(Error::AlreadyRunning {
                    total: active.total,
                    completed: active.completed,
                });
            }

            inner.generation += 1;
            let ticket = BatchTicket {
                batch_id: Uuid::new_v4(),
                total,
            };
            inner.active = Some(ActiveBatch {
                id: ticket.batch_id,
                total,
                completed: 0,
                succeeded: 0,
                failed: 0,
                started_at: Utc::now(),
            });
            self.publish(&inner);
            (ticket, inner.generation)
        };

        info!(batch_id = %ticket.batch_id, total, "Batch accepted");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_batch(generation, ticket).await;
        });

        Ok(ticket)
    }

    /// Abandon the active batch, if any. Returns whether one was abandoned.
    ///
    /// Calling this while idle is a no-op.
    pub fn reset(&self) -> bool {
        let mut inner = self.lock_inner();
        inner.generation += 1;

        match inner.active.take() {
            Some(active) => {
                warn!(
                    batch_id = %active.id,
                    total = active.total,
                    completed = active.completed,
                    "Batch abandoned by reset"
                );
                inner.last_batch = Some(active.summary(true));
                self.publish(&inner);
                true
            }
            None => false,
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> BatchStatus {
        self.lock_inner().snapshot()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until no batch is running.
    pub async fn wait_idle(&self) -> BatchStatus {
        let mut rx = self.subscribe();
        match rx.wait_for(|status| !status.is_running()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    async fn run_batch(self: Arc<Self>, generation: u64, ticket: BatchTicket) {
        let total = ticket.total;

        for iteration in 1..=total {
            if !self.begin(generation, iteration, total) {
                debug!(batch_id = %ticket.batch_id, iteration, "Batch no longer current, stopping");
                return;
            }

            let outcome = self.executor.run_once().await;
            if let Err(e) = &outcome {
                warn!(batch_id = %ticket.batch_id, iteration, error = %e, "Run failed, continuing batch");
            }

            if !self.record(generation, iteration, outcome.is_ok()) {
                debug!(batch_id = %ticket.batch_id, iteration, "Run finished after reset, not counted");
                return;
            }

            if iteration < total && !self.run_delay.is_zero() {
                tokio::time::sleep(self.run_delay).await;
            }
        }
    }

    /// Count one finished iteration. Returns false if the batch was
    /// abandoned meanwhile.
    fn record(&self, generation: u64, iteration: u32, succeeded: bool) -> bool {
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            return false;
        }
        let Some(active) = inner.active.as_mut() else {
            return false;
        };

        active.completed += 1;
        if succeeded {
            active.succeeded += 1;
            self.audit(&format!("BitWit run {} completed.", iteration));
        } else {
            active.failed += 1;
        }

        if active.completed >= active.total {
            let summary = active.summary(false);
            // Marker goes out while the lock is held so reset cannot slip in
            if let Err(e) = self.sink().append_completion_marker(summary.total) {
                error!(batch_id = %summary.batch_id, error = %e, "Failed to write completion marker");
            }
            info!(
                batch_id = %summary.batch_id,
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Batch finished"
            );
            inner.active = None;
            inner.last_batch = Some(summary);
        }

        self.publish(&inner);
        true
    }

    /// Write the start line of an iteration if the batch is still current.
    ///
    /// Check and write share one critical section with `reset`, so an
    /// iteration is in flight only if its start line predates the reset.
    fn begin(&self, generation: u64, iteration: u32, total: u32) -> bool {
        let inner = self.lock_inner();
        if inner.generation != generation || inner.active.is_none() {
            return false;
        }
        self.audit(&format!("Starting BitWit run {} of {}...", iteration, total));
        true
    }

    fn audit(&self, line: &str) {
        if let Err(e) = self.sink().append(line) {
            error!(error = %e, "Failed to write to run log");
        }
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(inner.snapshot());
    }

    // The batch task must never get stuck on a poisoned lock
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, RunOutput};
    use crate::runlog::is_completion_marker;
    use crate::settings::{Settings, SettingsPatch, SettingsStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations, optionally sleeping and failing.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl Counting {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Pipeline for Counting {
        async fn run(&self, _settings: &Settings, output: &RunOutput) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            output.line(format!("pipeline call {}", n));
            if self.fail {
                return Err(Error::pipeline("simulated outage"));
            }
            Ok(())
        }
    }

    /// First call blocks until released; later calls pass straight through.
    #[derive(Default)]
    struct Gated {
        calls: AtomicUsize,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Pipeline for Gated {
        async fn run(&self, _settings: &Settings, output: &RunOutput) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            output.line(format!("gated call {}", n));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: std::sync::Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl Pipeline for Recording {
        async fn run(&self, settings: &Settings, _output: &RunOutput) -> Result<()> {
            let chance = settings.fraction("REPLY_CHANCE").unwrap_or(-1.0);
            self.seen.lock().unwrap().push(chance);
            Ok(())
        }
    }

    struct Harness {
        orchestrator: Arc<BatchOrchestrator>,
        settings: Arc<SettingsStore>,
        sink: Arc<LogSink>,
    }

    fn harness(pipeline: Arc<dyn Pipeline>) -> Harness {
        let settings = Arc::new(SettingsStore::in_memory());
        let sink = Arc::new(LogSink::in_memory(10_000));
        let executor = Arc::new(RunExecutor::new(
            Arc::clone(&settings),
            Arc::clone(&sink),
            pipeline,
        ));
        let orchestrator =
            Arc::new(BatchOrchestrator::new(executor).with_run_delay(Duration::ZERO));
        Harness {
            orchestrator,
            settings,
            sink,
        }
    }

    fn marker_count(sink: &LogSink) -> usize {
        sink.tail(usize::MAX)
            .iter()
            .filter(|l| is_completion_marker(l))
            .count()
    }

    #[tokio::test]
    async fn test_batch_runs_n_times_and_writes_one_marker() {
        for n in [1u32, 2, 5] {
            let pipeline = Arc::new(Counting::default());
            let h = harness(pipeline.clone());

            h.orchestrator.start_batch(n as i64).unwrap();
            let status = h.orchestrator.wait_idle().await;

            assert_eq!(pipeline.calls(), n as usize);
            assert_eq!(marker_count(&h.sink), 1);
            let summary = status.last_batch.unwrap();
            assert_eq!(summary.completed, n);
            assert_eq!(summary.succeeded, n);
            assert!(!summary.abandoned);
        }
    }

    #[tokio::test]
    async fn test_three_run_batch_ends_with_marker_and_idle() {
        let h = harness(Arc::new(Counting::default()));

        tokio_test::assert_ok!(h.orchestrator.start_batch(3));
        let status = h.orchestrator.wait_idle().await;

        assert_eq!(status.state, BatchState::Idle);
        assert_eq!(
            h.sink.tail(1),
            vec!["All 3 BitWit runs completed in background thread."]
        );
        let lines = h.sink.tail(100);
        assert_eq!(lines[0], "Starting BitWit run 1 of 3...");
        assert!(lines.contains(&"BitWit run 3 completed.".to_string()));
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_rejected() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(50)));
        let h = harness(pipeline.clone());

        let ticket = h.orchestrator.start_batch(2).unwrap();
        assert_eq!(ticket.total, 2);
        let before = h.orchestrator.status().state;

        let err = h.orchestrator.start_batch(1).unwrap_err();
        assert!(err.is_already_running());
        let after = h.orchestrator.status().state;
        assert_eq!(after, before);
        match after {
            BatchState::Running { total, completed } => {
                assert_eq!(total, 2);
                assert_eq!(completed, 0);
            }
            other => panic!("expected running, got {:?}", other),
        }

        h.orchestrator.wait_idle().await;
        assert_eq!(pipeline.calls(), 2);
        assert_eq!(
            h.sink.tail(1),
            vec!["All 2 BitWit runs completed in background thread."]
        );
    }

    #[tokio::test]
    async fn test_non_positive_count_is_invalid() {
        let pipeline = Arc::new(Counting::default());
        let h = harness(pipeline.clone());

        assert!(h.orchestrator.start_batch(0).unwrap_err().is_invalid_argument());
        assert!(h.orchestrator.start_batch(-3).unwrap_err().is_invalid_argument());
        assert_eq!(h.orchestrator.status().state, BatchState::Idle);
        assert_eq!(pipeline.calls(), 0);
    }

    #[tokio::test]
    async fn test_reset_when_idle_is_noop() {
        let h = harness(Arc::new(Counting::default()));
        assert!(!h.orchestrator.reset());
        assert!(!h.orchestrator.reset());
        assert_eq!(h.orchestrator.status().state, BatchState::Idle);
        assert!(h.orchestrator.status().last_batch.is_none());
    }

    #[tokio::test]
    async fn test_reset_mid_batch_stops_further_runs() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(100)));
        let h = harness(pipeline.clone());

        h.orchestrator.start_batch(5).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(h.orchestrator.reset());
        let status = h.orchestrator.status();
        assert_eq!(status.state, BatchState::Idle);
        assert!(status.last_batch.as_ref().unwrap().abandoned);

        // Let the in-flight run finish
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(pipeline.calls(), 1);
        assert_eq!(marker_count(&h.sink), 0);
        let lines = h.sink.tail(100);
        assert!(lines.contains(&"pipeline call 1".to_string()));
        assert!(!lines.contains(&"BitWit run 1 completed.".to_string()));
        assert_eq!(h.orchestrator.status().last_batch.unwrap().completed, 0);
    }

    #[tokio::test]
    async fn test_new_batch_after_reset_is_unaffected_by_old_run() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(60)));
        let h = harness(pipeline.clone());

        h.orchestrator.start_batch(3).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.orchestrator.reset();

        h.orchestrator.start_batch(1).unwrap();
        let status = h.orchestrator.wait_idle().await;

        let summary = status.last_batch.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(marker_count(&h.sink), 1);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_begin_iteration() {
        let pipeline = Arc::new(Gated::default());
        let h = harness(pipeline.clone());

        h.orchestrator.start_batch(3).unwrap();
        pipeline.entered.notified().await;
        let stale = h.orchestrator.lock_inner().generation;
        h.orchestrator.reset();
        let lines_before = h.sink.len();

        assert!(!h.orchestrator.begin(stale, 2, 3));
        assert_eq!(h.sink.len(), lines_before);

        h.orchestrator.start_batch(1).unwrap();
        let current = h.orchestrator.lock_inner().generation;
        assert!(h.orchestrator.begin(current, 1, 1));
        h.orchestrator.wait_idle().await;
    }

    #[tokio::test]
    async fn test_no_iteration_starts_after_reset() {
        let pipeline = Arc::new(Gated::default());
        let h = harness(pipeline.clone());

        h.orchestrator.start_batch(3).unwrap();
        pipeline.entered.notified().await;
        assert!(h.orchestrator.reset());

        // The replacement batch runs while the abandoned run is still held
        h.orchestrator.start_batch(1).unwrap();
        let status = h.orchestrator.wait_idle().await;
        assert_eq!(status.last_batch.unwrap().total, 1);

        pipeline.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
        let lines = h.sink.tail(100);
        assert!(lines.contains(&"gated call 1".to_string()));
        assert!(!lines.iter().any(|l| l == "Starting BitWit run 2 of 3..."));
        assert_eq!(marker_count(&h.sink), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_batch() {
        let pipeline = Arc::new(Counting::failing());
        let h = harness(pipeline.clone());

        h.orchestrator.start_batch(3).unwrap();
        let status = h.orchestrator.wait_idle().await;

        assert_eq!(pipeline.calls(), 3);
        let summary = status.last_batch.unwrap();
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(
            h.sink.tail(1),
            vec!["All 3 BitWit runs completed in background thread."]
        );
        let errors = h
            .sink
            .tail(100)
            .iter()
            .filter(|l| l.starts_with("Error during BitWit run:"))
            .count();
        assert_eq!(errors, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_accept_exactly_one() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(20)));
        let h = harness(pipeline.clone());
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&h.orchestrator);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    orchestrator.start_batch(1).is_ok()
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        h.orchestrator.wait_idle().await;
        assert_eq!(pipeline.calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_uses_committed_settings() {
        let recording = Arc::new(Recording::default());
        let h = harness(recording.clone());

        let mut patch = SettingsPatch::new();
        patch.insert("REPLY_CHANCE".to_string(), json!(0.9));
        h.settings.replace(patch).unwrap();

        h.orchestrator.start_batch(2).unwrap();
        h.orchestrator.wait_idle().await;

        assert_eq!(*recording.seen.lock().unwrap(), vec![0.9, 0.9]);
    }

    #[tokio::test]
    async fn test_subscribers_see_progress() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(10)));
        let h = harness(pipeline);
        let mut rx = h.orchestrator.subscribe();

        h.orchestrator.start_batch(2).unwrap();
        let running = rx.wait_for(|s| s.is_running()).await.unwrap().clone();
        assert!(running.batch_id.is_some());

        let done = rx
            .wait_for(|s| !s.is_running() && s.last_batch.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(done.last_batch.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn test_status_serializes_flat() {
        let pipeline = Arc::new(Counting::slow(Duration::from_millis(50)));
        let h = harness(pipeline);

        let idle = serde_json::to_value(h.orchestrator.status()).unwrap();
        assert_eq!(idle["state"], "idle");
        assert!(idle.get("total").is_none());

        h.orchestrator.start_batch(2).unwrap();
        let running = serde_json::to_value(h.orchestrator.status()).unwrap();
        assert_eq!(running["state"], "running");
        assert_eq!(running["total"], 2);
        assert_eq!(running["completed"], 0);

        h.orchestrator.wait_idle().await;
    }
}
