//! Background reconciler: one task per running execution, polling the
//! cloud job and patching `job_executions` until a terminal state is
//! reached (spec.md §4.3.4), grounded on
//! `original_source/src/dispatcher/batch_monitor.py`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::contracts::{FormErrorKind, FormResult};
use crate::dispatcher::cloud_job::{CloudBatchClient, JobState, StatusEvent};
use crate::models::{job_execution::monitor_state_patch, JobExecutionStatus};
use crate::repository::Repository;
use crate::utils::jst::now_jst;

pub const MIN_MONITOR_INTERVAL_SECONDS: u64 = 30;
pub const MAX_SUPABASE_RETRIES: u32 = 3;
pub const SUPABASE_RETRY_DELAY_SECONDS: u64 = 2;

/// Monitor-state strings that mean "this execution is already done";
/// matches `TERMINAL_MONITOR_STATES` in the original implementation.
const TERMINAL_MONITOR_STATES: &[&str] = &["SUCCEEDED", "FAILED", "TIMEOUT", "CANCELLED", "CANCELLATION_IN_PROGRESS"];

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

impl MonitorSettings {
    pub fn normalized(self) -> Self {
        let interval = self.interval_seconds.max(MIN_MONITOR_INTERVAL_SECONDS);
        Self {
            interval_seconds: interval,
            timeout_seconds: self.timeout_seconds.max(interval),
        }
    }
}

/// Retries a fallible async DB operation up to `MAX_SUPABASE_RETRIES`
/// times with a fixed `SUPABASE_RETRY_DELAY_SECONDS` gap, logging and
/// swallowing the final failure (best-effort, matching the original's
/// "warn and move on" semantics).
async fn retry_best_effort<F, Fut>(operation: &str, execution_id: &str, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = FormResult<()>>,
{
    for attempt in 0..MAX_SUPABASE_RETRIES {
        match f().await {
            Ok(()) => return,
            Err(e) => {
                if attempt + 1 == MAX_SUPABASE_RETRIES {
                    log::warn!(
                        target: "form_core::dispatcher::monitor",
                        operation, execution_id, error = e.message.as_str();
                        "db operation failed after retries"
                    );
                } else {
                    tokio::time::sleep(Duration::from_secs(SUPABASE_RETRY_DELAY_SECONDS)).await;
                }
            }
        }
    }
}

async fn get_execution_with_retry(
    repo: &dyn Repository,
    execution_id: &str,
) -> Option<crate::models::JobExecutionRow> {
    for attempt in 0..MAX_SUPABASE_RETRIES {
        match repo.get_execution(execution_id).await {
            Ok(row) => return row,
            Err(_) if attempt + 1 < MAX_SUPABASE_RETRIES => {
                tokio::time::sleep(Duration::from_secs(SUPABASE_RETRY_DELAY_SECONDS)).await;
            }
            Err(_) => return None,
        }
    }
    None
}

fn monitor_state(row: &crate::models::JobExecutionRow) -> String {
    row.metadata
        .get("batch")
        .and_then(|b| b.get("monitor"))
        .and_then(|m| m.get("state"))
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_uppercase()
}

fn build_event_payload(events: &[StatusEvent]) -> Vec<serde_json::Value> {
    events
        .iter()
        .map(|e| {
            serde_json::json!({
                "description": e.description,
                "event_time": e.event_time.map(|t| t.with_timezone(&crate::utils::jst::jst_offset()).to_rfc3339()),
            })
        })
        .collect()
}

async fn record_terminal_state(
    repo: &dyn Repository,
    execution_id: &str,
    status: JobExecutionStatus,
    status_literal: &str,
    reason: Option<&str>,
    state_name: &str,
    events: &[StatusEvent],
) {
    let Some(row) = get_execution_with_retry(repo, execution_id).await else { return };
    let current = format!("{:?}", row.status).to_lowercase();
    if current != "running" && current != status_literal {
        return;
    }

    let recorded_at = now_jst();
    let patch = monitor_state_patch(
        state_name,
        reason,
        Some(build_event_payload(events).iter().map(|v| v.to_string()).collect()),
        recorded_at,
    );
    retry_best_effort("update_metadata", execution_id, || repo.update_metadata(execution_id, &patch)).await;
    retry_best_effort("update_status", execution_id, || {
        repo.update_status(execution_id, status, Some(recorded_at.with_timezone(&chrono::Utc)))
    })
    .await;
}

async fn record_monitor_progress(repo: &dyn Repository, execution_id: &str, state_name: &str) {
    let patch = monitor_state_patch(state_name, None, None, now_jst());
    retry_best_effort("update_metadata", execution_id, || repo.update_metadata(execution_id, &patch)).await;
}

/// Runs the poll loop for a single execution to completion (spec.md
/// §4.3.4). Intended to be spawned as its own task per execution.
pub async fn monitor_execution(
    repo: Arc<dyn Repository>,
    client: Arc<dyn CloudBatchClient>,
    execution_id: String,
    job_name: String,
    settings: MonitorSettings,
) {
    let settings = settings.normalized();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(settings.timeout_seconds);
    let started_patch = monitor_state_patch("monitoring", None, None, now_jst());
    retry_best_effort("update_metadata", &execution_id, || repo.update_metadata(&execution_id, &started_patch)).await;

    loop {
        if tokio::time::Instant::now() >= deadline {
            record_terminal_state(
                repo.as_ref(),
                &execution_id,
                JobExecutionStatus::Failed,
                "failed",
                Some("batch_timeout"),
                "TIMEOUT",
                &[],
            )
            .await;
            return;
        }

        let Some(row) = get_execution_with_retry(repo.as_ref(), &execution_id).await else {
            tokio::time::sleep(Duration::from_secs(settings.interval_seconds)).await;
            continue;
        };

        let running_or_cancelled = matches!(row.status, JobExecutionStatus::Running | JobExecutionStatus::Cancelled);
        if !running_or_cancelled {
            return;
        }
        if row.status == JobExecutionStatus::Cancelled && TERMINAL_MONITOR_STATES.contains(&monitor_state(&row).as_str()) {
            return;
        }

        let status = match client.get_job(&job_name).await {
            Ok(status) => status,
            Err(e) if e.kind == FormErrorKind::NotFoundError => {
                record_terminal_state(
                    repo.as_ref(),
                    &execution_id,
                    JobExecutionStatus::Cancelled,
                    "cancelled",
                    Some("batch_job_not_found"),
                    "CANCELLED",
                    &[],
                )
                .await;
                return;
            }
            Err(e) if !e.retryable => {
                log::error!(
                    target: "form_core::dispatcher::monitor",
                    execution_id = execution_id.as_str(), error = e.message.as_str();
                    "batch monitor received permanent error, stopping polling"
                );
                record_terminal_state(
                    repo.as_ref(),
                    &execution_id,
                    JobExecutionStatus::Failed,
                    "failed",
                    Some("batch_monitor_permanent_error"),
                    "FAILED",
                    &[],
                )
                .await;
                return;
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(settings.interval_seconds)).await;
                continue;
            }
        };

        match status.state {
            JobState::Succeeded => {
                record_terminal_state(
                    repo.as_ref(),
                    &execution_id,
                    JobExecutionStatus::Succeeded,
                    "succeeded",
                    None,
                    "SUCCEEDED",
                    &[],
                )
                .await;
                return;
            }
            JobState::Failed => {
                record_terminal_state(
                    repo.as_ref(),
                    &execution_id,
                    JobExecutionStatus::Failed,
                    "failed",
                    Some("batch_failed"),
                    "FAILED",
                    &status.status_events,
                )
                .await;
                return;
            }
            JobState::DeletionInProgress => {
                if monitor_state(&row) != "DELETION_IN_PROGRESS" {
                    record_monitor_progress(repo.as_ref(), &execution_id, "DELETION_IN_PROGRESS").await;
                }
                tokio::time::sleep(Duration::from_secs(settings.interval_seconds)).await;
            }
            state if state.is_cancellation() => {
                record_terminal_state(
                    repo.as_ref(),
                    &execution_id,
                    JobExecutionStatus::Cancelled,
                    "cancelled",
                    Some("batch_cancelled"),
                    "CANCELLED",
                    &status.status_events,
                )
                .await;
                return;
            }
            _ => {
                tokio::time::sleep(Duration::from_secs(settings.interval_seconds)).await;
            }
        }
    }
}

/// Keeps track of the one monitor task per execution (spec.md §5
/// "Monitor runs one lightweight scheduler task per active execution,
/// kept in a mutex-guarded map").
#[derive(Default)]
pub struct MonitorRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a monitor for `execution_id` unless one is already
    /// running; opportunistically reaps finished handles.
    pub fn schedule(
        self: &Arc<Self>,
        repo: Arc<dyn Repository>,
        client: Arc<dyn CloudBatchClient>,
        execution_id: String,
        job_name: String,
        settings: MonitorSettings,
    ) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&execution_id) {
            return;
        }
        let handle = tokio::spawn(monitor_execution(repo, client, execution_id.clone(), job_name, settings));
        tasks.insert(execution_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_raised_to_the_documented_minimum() {
        let settings = MonitorSettings { interval_seconds: 5, timeout_seconds: 10 }.normalized();
        assert_eq!(settings.interval_seconds, MIN_MONITOR_INTERVAL_SECONDS);
        assert_eq!(settings.timeout_seconds, MIN_MONITOR_INTERVAL_SECONDS);
    }

    #[test]
    fn timeout_floor_tracks_interval() {
        let settings = MonitorSettings { interval_seconds: 60, timeout_seconds: 10 }.normalized();
        assert_eq!(settings.timeout_seconds, 60);
    }
}
