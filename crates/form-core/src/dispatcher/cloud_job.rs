//! The cloud-job launch seam (spec.md §4.3.3): environment construction
//! for Cloud Run execution-overrides and Cloud Batch machine-shape
//! sizing, behind a `CloudBatchClient` trait so the dispatcher never
//! hard-codes a specific cloud SDK.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contracts::FormResult;
use crate::dispatcher::schemas::FormSenderTask;

const MEMORY_ROUND_MB: i64 = 256;
const MEMORY_ROUND_MIN_MB: i64 = 1024;
const FALLBACK_MIN_VCPU: i64 = 4;
const FALLBACK_MIN_MEMORY_MB: i64 = 10_240;
const LOW_MEMORY_WARNING_THRESHOLD_MB: i64 = 8192;
const LOW_MEMORY_WARNING_MIN_WORKERS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    DeletionInProgress,
    CancellationInProgress,
    Cancelled,
    Unspecified,
}

impl JobState {
    pub fn is_cancellation(self) -> bool {
        matches!(self, JobState::CancellationInProgress | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub description: Option<String>,
    pub event_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudJobStatus {
    pub state: JobState,
    pub status_events: Vec<StatusEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResult {
    pub execution_name: String,
    pub operation_name: Option<String>,
}

/// Launch/poll/cancel seam implemented against Cloud Run jobs or Cloud
/// Batch depending on `FormSenderTask::mode` (spec.md §4.3.3).
#[async_trait]
pub trait CloudBatchClient: Send + Sync {
    async fn launch_cloud_run(&self, task: &FormSenderTask, env: BTreeMap<String, String>) -> FormResult<LaunchResult>;
    async fn launch_batch(&self, task: &FormSenderTask, env: BTreeMap<String, String>, shape: MachineShape) -> FormResult<LaunchResult>;
    async fn get_job(&self, job_name: &str) -> FormResult<CloudJobStatus>;
    async fn cancel(&self, job_name: &str) -> FormResult<()>;
}

/// Builds the container environment common to both dispatch modes
/// (spec.md §4.3.3's variable list).
#[allow(clippy::too_many_arguments)]
pub fn build_execution_env(
    task: &FormSenderTask,
    job_execution_id: &str,
    client_config_url: &str,
) -> FormResult<BTreeMap<String, String>> {
    let (bucket, object) = task.gcs_blob_components()?;
    let mut env = BTreeMap::new();
    env.insert("FORM_SENDER_CLIENT_CONFIG_URL".to_string(), client_config_url.to_string());
    env.insert("FORM_SENDER_CLIENT_CONFIG_OBJECT".to_string(), object);
    env.insert("FORM_SENDER_CLIENT_CONFIG_PATH".to_string(), bucket);
    env.insert("FORM_SENDER_ENV".to_string(), "cloud_run".to_string());
    env.insert("FORM_SENDER_LOG_SANITIZE".to_string(), "1".to_string());
    env.insert("FORM_SENDER_WORKFLOW_TRIGGER".to_string(), task.workflow_trigger.clone());
    env.insert("FORM_SENDER_TOTAL_SHARDS".to_string(), task.execution.shards.to_string());
    env.insert("FORM_SENDER_MAX_WORKERS".to_string(), task.execution.workers_per_workflow.to_string());
    env.insert("FORM_SENDER_TARGETING_ID".to_string(), task.targeting_id.to_string());
    env.insert("FORM_SENDER_TEST_MODE".to_string(), task.test_mode.to_string());
    env.insert("COMPANY_TABLE".to_string(), task.tables.company_table.clone());
    env.insert("SEND_QUEUE_TABLE".to_string(), task.tables.send_queue_table.clone());
    env.insert(
        "FORM_SENDER_TABLE_MODE".to_string(),
        if task.tables.use_extra_table { "extra".to_string() } else { "default".to_string() },
    );
    env.insert("JOB_EXECUTION_ID".to_string(), job_execution_id.to_string());
    env.insert("JOB_EXECUTION_META".to_string(), task.job_execution_meta());
    if let Some(cpu_class) = task.cpu_class {
        let value = match cpu_class {
            crate::dispatcher::schemas::CpuClass::Standard => "standard",
            crate::dispatcher::schemas::CpuClass::Low => "low",
            crate::dispatcher::schemas::CpuClass::GcpSpot => "gcp_spot",
        };
        env.insert("FORM_SENDER_CPU_CLASS".to_string(), value.to_string());
    }
    if let Some(submissions_table) = &task.tables.submissions_table {
        env.insert("SUBMISSIONS_TABLE".to_string(), submissions_table.clone());
    }
    if let Some(branch) = &task.branch {
        env.insert("FORM_SENDER_GIT_REF".to_string(), branch.clone());
    }
    Ok(env)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MachineShape {
    pub vcpu: i64,
    pub memory_mb: i64,
    pub machine_type: Option<String>,
    pub memory_warning: bool,
}

fn round_up_to(value: i64, multiple: i64) -> i64 {
    ((value + multiple - 1) / multiple) * multiple
}

/// Parses `n2d-custom-<vcpu>-<mem>` shapes; anything else is treated as
/// not recognizable and left untouched.
fn parse_custom_shape(machine_type: &str) -> Option<(i64, i64)> {
    let rest = machine_type.strip_prefix("n2d-custom-")?;
    let mut parts = rest.splitn(2, '-');
    let vcpu = parts.next()?.parse::<i64>().ok()?;
    let mem = parts.next()?.parse::<i64>().ok()?;
    Some((vcpu, mem))
}

/// Computes the Cloud Batch machine shape for a task's `batch` options
/// (spec.md §4.3.3): `vcpu = max(1, vcpu_per_worker) * workers`;
/// `memory_mb` rounded up to 256 MB with a 1024 MB floor; a requested
/// custom shape that can't satisfy the computed memory falls back to
/// `n2d-custom-max(vcpu,4)-max(memory,10240)`.
pub fn compute_machine_shape(task: &FormSenderTask) -> MachineShape {
    let workers = task.execution.workers_per_workflow.max(1);
    let batch = task.batch.as_ref();
    let vcpu_per_worker = batch.and_then(|b| b.vcpu_per_worker).unwrap_or(1).max(1);
    let memory_per_worker_mb = batch.and_then(|b| b.memory_per_worker_mb).unwrap_or(1024);
    let memory_buffer_mb = batch.and_then(|b| b.memory_buffer_mb).unwrap_or(0);

    let vcpu = vcpu_per_worker * workers;
    let raw_memory_mb = workers * memory_per_worker_mb + memory_buffer_mb;
    let memory_mb = round_up_to(raw_memory_mb, MEMORY_ROUND_MB).max(MEMORY_ROUND_MIN_MB);

    let machine_type = batch.and_then(|b| b.machine_type.clone());
    let resolved_machine_type = machine_type.as_deref().and_then(|mt| {
        parse_custom_shape(mt).map(|(shape_vcpu, shape_mem)| {
            if shape_mem < memory_mb {
                format!(
                    "n2d-custom-{}-{}",
                    shape_vcpu.max(FALLBACK_MIN_VCPU),
                    shape_mem.max(FALLBACK_MIN_MEMORY_MB).max(memory_mb)
                )
            } else {
                mt.to_string()
            }
        })
    }).or(machine_type);

    let memory_warning = memory_mb < LOW_MEMORY_WARNING_THRESHOLD_MB && workers >= LOW_MEMORY_WARNING_MIN_WORKERS;
    if memory_warning {
        log::warn!(
            target: "form_core::dispatcher::cloud_job",
            memory_mb, workers;
            "computed machine memory below the recommended floor for this worker count"
        );
    }

    MachineShape {
        vcpu,
        memory_mb,
        machine_type: resolved_machine_type,
        memory_warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::schemas::{BatchOptions, ExecutionConfig, Metadata, TableConfig};

    fn task_with_batch(batch: BatchOptions, workers: i64) -> FormSenderTask {
        FormSenderTask {
            execution_id: None,
            targeting_id: 1,
            client_config_ref: "https://storage.googleapis.com/b/o?X-Goog-Algorithm=GOOG4-RSA-SHA256".to_string(),
            client_config_object: "gs://b/o".to_string(),
            tables: TableConfig::default(),
            execution: ExecutionConfig {
                run_total: 10,
                parallelism: 4,
                run_index_base: 0,
                shards: 1,
                workers_per_workflow: workers,
            },
            test_mode: false,
            branch: None,
            workflow_trigger: "automated".to_string(),
            metadata: Metadata::default(),
            cpu_class: None,
            mode: crate::dispatcher::schemas::DispatchMode::Batch,
            batch: Some(batch),
        }
    }

    fn default_batch() -> BatchOptions {
        BatchOptions {
            enabled: true,
            max_parallelism: None,
            prefer_spot: true,
            allow_on_demand_fallback: true,
            machine_type: None,
            signed_url_ttl_hours: None,
            signed_url_refresh_threshold_seconds: None,
            vcpu_per_worker: Some(2),
            memory_per_worker_mb: Some(2048),
            memory_buffer_mb: Some(512),
            max_attempts: None,
            memory_warning: None,
            computed_memory_mb: None,
        }
    }

    #[test]
    fn computes_vcpu_and_memory_from_worker_count() {
        let task = task_with_batch(default_batch(), 4);
        let shape = compute_machine_shape(&task);
        assert_eq!(shape.vcpu, 8);
        // (4*2048 + 512) = 8704, rounded up to next 256 => 8704 already a multiple
        assert_eq!(shape.memory_mb, 8704);
    }

    #[test]
    fn falls_back_when_custom_shape_cannot_satisfy_memory() {
        let mut batch = default_batch();
        batch.machine_type = Some("n2d-custom-2-2048".to_string());
        let task = task_with_batch(batch, 4);
        let shape = compute_machine_shape(&task);
        assert_eq!(shape.machine_type.as_deref(), Some("n2d-custom-4-10240"));
    }

    #[test]
    fn warns_on_low_memory_for_many_workers() {
        let mut batch = default_batch();
        batch.memory_per_worker_mb = Some(1024);
        batch.memory_buffer_mb = Some(0);
        batch.vcpu_per_worker = Some(1);
        let task = task_with_batch(batch, 4);
        let shape = compute_machine_shape(&task);
        assert!(shape.memory_warning);
    }
}
