//! The multi-process worker orchestrator (spec.md §4.2). Public
//! contract: `start() -> ok | startup-failure`, `process_batch(config,
//! data) -> batch_stats`, `shutdown(timeout) -> ok`.

pub mod backpressure;
pub mod candidates;
pub mod dispatch;
pub mod locks;
pub mod persistence;
pub mod queues;
pub mod worker_pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use crate::contracts::FormResult;
use crate::models::{ResultStatus, TaskEnvelope};
use crate::repository::Repository;

const STARTUP_READY_WORKERS_DEFAULT: usize = 4;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const OVERFLOW_POLL_INTERVAL: Duration = Duration::from_secs(30);
const BATCH_COLLECTION_CEILING: Duration = Duration::from_secs(5 * 60);
const BATCH_NO_ACTIVITY_CEILING: Duration = Duration::from_secs(30 * 60);
const RUN_SELF_TERMINATE_HOURS: i64 = 5;
const CANDIDATES_PER_BATCH: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub prohibition_detected: usize,
    pub bot_protection_detected: usize,
}

pub struct OrchestratorConfig {
    pub worker_count: usize,
    pub worker_binary: String,
    pub persistence_mode: persistence::PersistenceMode,
    pub max_parallel_db_writes: usize,
    pub max_buffer_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: STARTUP_READY_WORKERS_DEFAULT,
            worker_binary: "form-sender-worker".to_string(),
            persistence_mode: persistence::PersistenceMode::Buffered,
            max_parallel_db_writes: persistence::DEFAULT_MAX_PARALLEL_DB_WRITES,
            max_buffer_size: persistence::DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Owns the worker pool, queues, result buffer, and shutdown signal for
/// a single orchestrator run (spec.md §4.2, §5).
pub struct Orchestrator {
    config: OrchestratorConfig,
    repo: Arc<dyn Repository>,
    workers: Mutex<Vec<worker_pool::WorkerHandle>>,
    result_rx: Mutex<Option<mpsc::Receiver<crate::models::ResultEnvelope>>>,
    result_tx: mpsc::Sender<crate::models::ResultEnvelope>,
    buffer: Arc<persistence::ResultBuffer>,
    write_semaphore: Semaphore,
    stop_flag: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    backpressure: Mutex<backpressure::BackpressureTracker>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, repo: Arc<dyn Repository>) -> Self {
        let (result_tx, result_rx) = mpsc::channel(config.max_buffer_size.max(64));
        let max_parallel_db_writes = config.max_parallel_db_writes;
        Self {
            config,
            repo,
            workers: Mutex::new(Vec::new()),
            result_rx: Mutex::new(Some(result_rx)),
            result_tx,
            buffer: persistence::ResultBuffer::new(),
            write_semaphore: Semaphore::new(max_parallel_db_writes),
            stop_flag: AtomicBool::new(false),
            started_at: Mutex::new(None),
            backpressure: Mutex::new(backpressure::BackpressureTracker::default()),
        }
    }

    /// Spawns N worker processes and blocks until all report ready
    /// within the startup deadline (spec.md §4.2.1).
    pub async fn start(&self) -> FormResult<()> {
        *self.started_at.lock() = Some(Instant::now());
        let mut workers = Vec::with_capacity(self.config.worker_count);
        for i in 0..self.config.worker_count {
            let worker_id = format!("worker-{i}");
            let handle = worker_pool::spawn_worker(worker_id, &self.config.worker_binary, self.result_tx.clone())
                .await?;
            workers.push(handle);
        }
        {
            let mut rx_guard = self.result_rx.lock();
            let rx = rx_guard.as_mut().expect("result receiver taken before start");
            worker_pool::await_all_ready(rx, self.config.worker_count).await?;
        }
        *self.workers.lock() = workers;
        log::info!(target: "form_core::orchestrator", "orchestrator started with {} workers", self.config.worker_count);
        Ok(())
    }

    /// Self-termination check (spec.md §5 "Per-run: the orchestrator
    /// self-terminates after 5 h elapsed since start").
    pub fn past_run_deadline(&self) -> bool {
        self.started_at
            .lock()
            .map(|at| at.elapsed() >= Duration::from_secs(RUN_SELF_TERMINATE_HOURS as u64 * 3600))
            .unwrap_or(false)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst) || self.past_run_deadline()
    }

    /// Processes one batch: fetch up to 10 candidates, evaluate each
    /// (prohibition pre-filter or enqueue), collect results until the
    /// batch ceiling or no-activity ceiling trips (spec.md §4.2.2,
    /// §5).
    pub async fn process_batch(
        &self,
        candidates: Vec<crate::models::CompanyRecord>,
        client_data: serde_json::Value,
        targeting_id: i64,
    ) -> FormResult<BatchStats> {
        let mut stats = BatchStats::default();
        let mut dispatched = 0usize;

        for company in candidates.into_iter().take(CANDIDATES_PER_BATCH) {
            if self.should_stop() {
                break;
            }
            match dispatch::evaluate_candidate(company, client_data.clone(), targeting_id).await {
                dispatch::DispatchDecision::Enqueue(task) => {
                    let worker_index = dispatched % self.config.worker_count.max(1);
                    let mut workers = self.workers.lock();
                    if let Some(worker) = workers.get_mut(worker_index) {
                        worker.send_task(&task).await?;
                        dispatched += 1;
                    }
                }
                dispatch::DispatchDecision::ProhibitionDetected { company_id } => {
                    dispatch::record_prohibition_locally(self.repo.as_ref(), targeting_id, company_id).await?;
                    stats.prohibition_detected += 1;
                    stats.failed += 1;
                    stats.processed += 1;
                }
                dispatch::DispatchDecision::ValidationRejected { company_id, reason } => {
                    log::warn!(target: "form_core::orchestrator", company_id, reason = reason.as_str(); "candidate rejected by validation");
                    stats.failed += 1;
                    stats.processed += 1;
                }
            }
        }

        self.collect_batch_results(dispatched, &mut stats, targeting_id).await?;
        Ok(stats)
    }

    async fn collect_batch_results(
        &self,
        expected: usize,
        stats: &mut BatchStats,
        targeting_id: i64,
    ) -> FormResult<()> {
        let deadline = Instant::now() + BATCH_COLLECTION_CEILING;
        let mut last_activity = Instant::now();
        let mut last_health_check = Instant::now();
        let mut last_progress_log = Instant::now();
        let mut last_overflow_poll = Instant::now();
        let mut received = 0usize;

        let mut rx_guard = self.result_rx.lock();
        let rx = rx_guard.as_mut().expect("result receiver taken before start");

        while received < expected {
            if Instant::now() >= deadline || last_activity.elapsed() >= BATCH_NO_ACTIVITY_CEILING {
                log::warn!(target: "form_core::orchestrator", received, expected; "batch collection ceiling reached with tasks still pending");
                break;
            }
            if last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
                last_health_check = Instant::now();
            }
            if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                log::info!(target: "form_core::orchestrator", received, expected; "batch progress");
                last_progress_log = Instant::now();
            }
            if last_overflow_poll.elapsed() >= OVERFLOW_POLL_INTERVAL {
                let _ = persistence::replay_fallback_dir(
                    &std::env::temp_dir().join("form_sender_overflow"),
                    self.repo.as_ref(),
                )
                .await;
                last_overflow_poll = Instant::now();
            }

            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(envelope)) => {
                    last_activity = Instant::now();
                    received += 1;
                    self.handle_result(envelope, stats, targeting_id).await?;
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        Ok(())
    }

    async fn handle_result(
        &self,
        envelope: crate::models::ResultEnvelope,
        stats: &mut BatchStats,
        targeting_id: i64,
    ) -> FormResult<()> {
        stats.processed += 1;
        let success = matches!(envelope.status, ResultStatus::Success);
        if success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
        if envelope.bot_protection_detected {
            stats.bot_protection_detected += 1;
        }
        let Some(record_id) = envelope.record_id else { return Ok(()) };

        persistence::apply_company_flag_updates(self.repo.as_ref(), record_id, envelope.bot_protection_detected)
            .await?;

        match self.config.persistence_mode {
            persistence::PersistenceMode::Immediate => {
                persistence::persist_immediate(
                    self.repo.as_ref(),
                    &self.write_semaphore,
                    targeting_id,
                    record_id,
                    success,
                    envelope.error_message.as_deref(),
                    None,
                )
                .await?;
            }
            persistence::PersistenceMode::Buffered => {
                let record = if success {
                    crate::models::SubmissionRecord::success(targeting_id, record_id)
                } else {
                    let detail = crate::error_classifier::classify_detail(
                        envelope.error_message.as_deref().unwrap_or(""),
                        None,
                        None,
                        None,
                    );
                    crate::models::SubmissionRecord::failure(
                        targeting_id,
                        record_id,
                        envelope.error_type.clone().unwrap_or_else(|| "SYSTEM".to_string()),
                        detail,
                    )
                };
                self.buffer.push(record);
                let level = self
                    .backpressure
                    .lock()
                    .observe(&targeting_id.to_string(), self.buffer.len(), self.config.max_buffer_size);
                self.apply_backpressure_action(level).await?;
                if self
                    .buffer
                    .should_flush(persistence::DEFAULT_BATCH_SIZE, Duration::from_secs(persistence::DEFAULT_BUFFER_TIMEOUT_SECS))
                {
                    self.buffer.flush(self.repo.as_ref(), None, None).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_backpressure_action(&self, level: backpressure::BackpressureLevel) -> FormResult<()> {
        match backpressure::action_for(level) {
            backpressure::BackpressureAction::Accept => {}
            backpressure::BackpressureAction::PartialFlush { fraction, max_items } => {
                self.buffer.flush(self.repo.as_ref(), Some(fraction), Some(max_items)).await?;
            }
            backpressure::BackpressureAction::PartialFlushThenSleep { fraction, max_items, sleep } => {
                self.buffer.flush(self.repo.as_ref(), Some(fraction), Some(max_items)).await?;
                tokio::time::sleep(sleep).await;
            }
            backpressure::BackpressureAction::ForcedFlushes { attempts, spacing } => {
                for _ in 0..attempts {
                    self.buffer.flush(self.repo.as_ref(), None, None).await?;
                    if backpressure::level_for(self.buffer.len(), self.config.max_buffer_size)
                        < backpressure::BackpressureLevel::L2
                    {
                        break;
                    }
                    tokio::time::sleep(spacing).await;
                }
            }
            backpressure::BackpressureAction::Overflow => {
                // The buffer is at or past capacity: flush it in full
                // rather than let it keep growing unbounded.
                self.buffer.flush(self.repo.as_ref(), None, None).await?;
            }
        }
        Ok(())
    }

    /// Pushes N shutdown envelopes, drains the result queue
    /// cooperatively for up to `timeout`, then terminates every worker
    /// (spec.md §5 "Graceful shutdown").
    pub async fn shutdown(&self, timeout: Duration) -> FormResult<()> {
        self.request_stop();
        {
            let mut workers = self.workers.lock();
            for worker in workers.iter_mut() {
                let _ = worker.send_task(&TaskEnvelope::shutdown(uuid::Uuid::new_v4().to_string())).await;
            }
        }

        let deadline = Instant::now() + timeout;
        {
            let mut rx_guard = self.result_rx.lock();
            if let Some(rx) = rx_guard.as_mut() {
                while Instant::now() < deadline {
                    match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                        Ok(Some(envelope)) if envelope.status == ResultStatus::WorkerShutdown => continue,
                        Ok(Some(envelope)) => {
                            self.buffer.push(crate::models::SubmissionRecord::failure(
                                0,
                                envelope.record_id.unwrap_or_default(),
                                "SYSTEM".to_string(),
                                crate::error_classifier::ClassifyDetail::default(),
                            ));
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            worker.terminate_then_kill().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallel_db_writes, persistence::DEFAULT_MAX_PARALLEL_DB_WRITES);
        assert_eq!(config.max_buffer_size, persistence::DEFAULT_MAX_BUFFER_SIZE);
    }
}
