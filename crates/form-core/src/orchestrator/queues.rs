//! Bounded task/result queues (spec.md §5 "Shared resources"). Backed
//! by `tokio::sync::mpsc` with a fixed capacity; overflow on `try_send`
//! is retried with backoff before being treated as `QueueOverflowError`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::contracts::{FormError, FormResult};
use crate::models::{ResultEnvelope, TaskEnvelope};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const OVERFLOW_RETRY_ATTEMPTS: u32 = 3;
const OVERFLOW_BACKOFF_BASE_MS: u64 = 1000;

pub struct TaskQueue {
    sender: mpsc::Sender<TaskEnvelope>,
    receiver: mpsc::Receiver<TaskEnvelope>,
}

impl TaskQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver }
    }

    pub fn sender(&self) -> mpsc::Sender<TaskEnvelope> {
        self.sender.clone()
    }

    /// Enqueue with retry-then-skip on overflow (spec.md §5 "Shared
    /// resources": 3 attempts, backoff 1/2/4 s).
    pub async fn enqueue(&self, task: TaskEnvelope) -> FormResult<()> {
        let mut last_err = None;
        for attempt in 0..OVERFLOW_RETRY_ATTEMPTS {
            match self.sender.try_send(task.clone()) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let backoff = OVERFLOW_BACKOFF_BASE_MS * 2u64.pow(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    last_err = Some(FormError::internal("task queue overflow"));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(FormError::internal("task queue closed"));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| FormError::internal("task queue overflow")))
    }

    /// 100 ms poll with a cooperative stop check (spec.md §4.2.1).
    pub async fn poll(&mut self) -> Option<TaskEnvelope> {
        timeout(POLL_TIMEOUT, self.receiver.recv()).await.ok().flatten()
    }
}

pub struct ResultQueue {
    sender: mpsc::Sender<ResultEnvelope>,
    receiver: mpsc::Receiver<ResultEnvelope>,
}

impl ResultQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver }
    }

    pub fn sender(&self) -> mpsc::Sender<ResultEnvelope> {
        self.sender.clone()
    }

    pub async fn poll(&mut self) -> Option<ResultEnvelope> {
        timeout(POLL_TIMEOUT, self.receiver.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskEnvelope;

    #[tokio::test]
    async fn enqueue_and_poll_round_trip() {
        let mut queue = TaskQueue::bounded(4);
        queue.enqueue(TaskEnvelope::shutdown("t1")).await.unwrap();
        let got = queue.poll().await;
        assert!(got.is_some());
        assert!(got.unwrap().is_shutdown());
    }
}
