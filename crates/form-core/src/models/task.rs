use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::company::CompanyRecord;

/// In-memory task envelope pushed onto the orchestrator's task queue
/// (spec.md §3). Lives only from enqueue to worker consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub task_type: TaskType,
    pub company_data: Option<CompanyRecord>,
    pub client_data: Option<Value>,
    pub targeting_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Company,
    Shutdown,
}

impl TaskEnvelope {
    pub fn shutdown(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: TaskType::Shutdown,
            company_data: None,
            client_data: None,
            targeting_id: 0,
        }
    }

    pub fn company(
        task_id: impl Into<String>,
        company: CompanyRecord,
        client_data: Value,
        targeting_id: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: TaskType::Company,
            company_data: Some(company),
            client_data: Some(client_data),
            targeting_id,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.task_type == TaskType::Shutdown
    }
}

/// In-memory result envelope published by a worker (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: String,
    pub worker_id: String,
    pub record_id: Option<i64>,
    pub status: ResultStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub instruction_valid_updated: bool,
    #[serde(default)]
    pub bot_protection_detected: bool,
    pub additional_data: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    WorkerReady,
    WorkerShutdown,
    Success,
    Failed,
    Error,
    ProhibitionDetected,
}

impl ResultEnvelope {
    pub fn worker_ready(worker_id: impl Into<String>) -> Self {
        Self {
            task_id: String::new(),
            worker_id: worker_id.into(),
            record_id: None,
            status: ResultStatus::WorkerReady,
            error_type: None,
            error_message: None,
            processing_time_ms: None,
            instruction_valid_updated: false,
            bot_protection_detected: false,
            additional_data: None,
        }
    }

    pub fn worker_shutdown(worker_id: impl Into<String>) -> Self {
        Self {
            task_id: String::new(),
            worker_id: worker_id.into(),
            record_id: None,
            status: ResultStatus::WorkerShutdown,
            error_type: None,
            error_message: None,
            processing_time_ms: None,
            instruction_valid_updated: false,
            bot_protection_detected: false,
            additional_data: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            ResultStatus::Failed | ResultStatus::Error | ResultStatus::ProhibitionDetected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_task_is_recognized() {
        let task = TaskEnvelope::shutdown("t1");
        assert!(task.is_shutdown());
    }

    #[test]
    fn result_failure_classification() {
        let mut r = ResultEnvelope::worker_ready("w1");
        assert!(!r.is_failure());
        r.status = ResultStatus::Failed;
        assert!(r.is_failure());
        r.status = ResultStatus::Success;
        assert!(!r.is_failure());
    }
}
