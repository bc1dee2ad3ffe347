//! Worker process lifecycle (spec.md §4.2.1, §9 "Process-level
//! isolation"). Workers are real OS processes, communicating over
//! stdio JSON-lines, never in-process tasks, so a browser crash in one
//! worker cannot corrupt its siblings.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::contracts::{FormError, FormResult};
use crate::models::{ResultEnvelope, ResultStatus, TaskEnvelope};
use crate::utils::logger::log_worker_event;

const READY_DEADLINE: Duration = Duration::from_secs(60);
const TERMINATE_JOIN: Duration = Duration::from_secs(5);
const KILL_JOIN: Duration = Duration::from_secs(2);

pub struct WorkerHandle {
    pub worker_id: String,
    child: Child,
    stdin: tokio::process::ChildStdin,
}

impl WorkerHandle {
    pub async fn send_task(&mut self, task: &TaskEnvelope) -> FormResult<()> {
        let mut line = serde_json::to_string(task).map_err(FormError::from)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FormError::internal(format!("failed writing task to worker stdin: {e}")))?;
        Ok(())
    }

    /// `terminate → join(5s) → kill → join(2s)` (spec.md §5 "Graceful
    /// shutdown"). SIGTERM gives the worker a chance to close its
    /// browser cleanly before the hard kill.
    pub async fn terminate_then_kill(&mut self) -> FormResult<()> {
        if let Some(pid) = self.child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
        if timeout(TERMINATE_JOIN, self.child.wait()).await.is_ok() {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| FormError::internal(format!("failed to kill worker: {e}")))?;
        let _ = timeout(KILL_JOIN, self.child.wait()).await;
        Ok(())
    }
}

/// Spawns a single worker process wired to a shared stdout reader task
/// that republishes every `ResultEnvelope` line onto `result_tx`.
pub async fn spawn_worker(
    worker_id: String,
    worker_binary: &str,
    result_tx: mpsc::Sender<ResultEnvelope>,
) -> FormResult<WorkerHandle> {
    let mut child = Command::new(worker_binary)
        .arg("--worker-id")
        .arg(&worker_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| FormError::internal(format!("failed to spawn worker {worker_id}: {e}")))?;

    let stdin = child.stdin.take().ok_or_else(|| FormError::internal("worker stdin missing"))?;
    let stdout = child.stdout.take().ok_or_else(|| FormError::internal("worker stdout missing"))?;

    let reader_worker_id = worker_id.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(envelope) = serde_json::from_str::<ResultEnvelope>(&line) {
                let _ = result_tx.send(envelope).await;
            } else {
                log::warn!(target: "form_core::worker_pool", worker_id = reader_worker_id.as_str(); "unparseable worker output line");
            }
        }
    });

    Ok(WorkerHandle { worker_id, child, stdin })
}

/// Blocks until `expected` `WORKER_READY` envelopes arrive or the
/// startup deadline elapses (spec.md §4.2.1).
pub async fn await_all_ready(
    result_rx: &mut mpsc::Receiver<ResultEnvelope>,
    expected: usize,
) -> FormResult<()> {
    let mut ready = 0usize;
    let deadline = tokio::time::Instant::now() + READY_DEADLINE;
    while ready < expected {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(FormError::internal(format!(
                "startup failure: only {ready}/{expected} workers reported ready within 60s"
            )));
        }
        match timeout(remaining, result_rx.recv()).await {
            Ok(Some(envelope)) if envelope.status == ResultStatus::WorkerReady => {
                ready += 1;
                log_worker_event(&envelope.worker_id, "ready", None);
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => {
                return Err(FormError::internal(format!(
                    "startup failure: only {ready}/{expected} workers reported ready within 60s"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn await_all_ready_succeeds_once_expected_count_reports_in() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ResultEnvelope::worker_ready("w1")).await.unwrap();
        tx.send(ResultEnvelope::worker_ready("w2")).await.unwrap();
        await_all_ready(&mut rx, 2).await.unwrap();
    }
}
