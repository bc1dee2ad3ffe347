//! `FormSenderTask` and its nested request types (spec.md §6, §4.3.1),
//! grounded on `original_source/src/dispatcher/schemas.py`.

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::contracts::{FormError, FormResult};
use crate::invariants::ensure_http_url;

static BRANCH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9/_.-]+$").unwrap());
static EXECUTION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-]+$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub use_extra_table: bool,
    #[serde(default = "default_company_table")]
    pub company_table: String,
    #[serde(default = "default_send_queue_table")]
    pub send_queue_table: String,
    #[serde(default)]
    pub submissions_table: Option<String>,
}

fn default_company_table() -> String {
    "companies".to_string()
}

fn default_send_queue_table() -> String {
    "send_queue".to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            use_extra_table: false,
            company_table: default_company_table(),
            send_queue_table: default_send_queue_table(),
            submissions_table: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub run_total: i64,
    pub parallelism: i64,
    pub run_index_base: i64,
    pub shards: i64,
    pub workers_per_workflow: i64,
}

impl ExecutionConfig {
    pub fn validate(&self) -> FormResult<()> {
        if self.run_total < 1 {
            return Err(FormError::validation("run_total must be >= 1"));
        }
        if self.parallelism < 1 {
            return Err(FormError::validation("parallelism must be >= 1"));
        }
        if self.run_index_base < 0 {
            return Err(FormError::validation("run_index_base must be >= 0"));
        }
        if self.shards < 1 {
            return Err(FormError::validation("shards must be >= 1"));
        }
        if self.workers_per_workflow < 1 {
            return Err(FormError::validation("workers_per_workflow must be >= 1"));
        }
        if self.parallelism > self.run_total {
            return Err(FormError::validation("parallelism must be less than or equal to run_total"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub triggered_at_jst: Option<String>,
    pub gas_trigger: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default)]
    pub enabled: bool,
    pub max_parallelism: Option<i64>,
    #[serde(default = "default_true")]
    pub prefer_spot: bool,
    #[serde(default = "default_true")]
    pub allow_on_demand_fallback: bool,
    pub machine_type: Option<String>,
    pub signed_url_ttl_hours: Option<i64>,
    pub signed_url_refresh_threshold_seconds: Option<i64>,
    pub vcpu_per_worker: Option<i64>,
    pub memory_per_worker_mb: Option<i64>,
    pub memory_buffer_mb: Option<i64>,
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub memory_warning: Option<bool>,
    #[serde(default)]
    pub computed_memory_mb: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl BatchOptions {
    pub fn validate(&self) -> FormResult<()> {
        if let Some(v) = self.max_parallelism {
            if v < 1 {
                return Err(FormError::validation("batch.max_parallelism must be >= 1"));
            }
        }
        if let Some(v) = self.signed_url_ttl_hours {
            if !(1..=168).contains(&v) {
                return Err(FormError::validation("batch.signed_url_ttl_hours must be in 1..=168"));
            }
        }
        if let Some(v) = self.signed_url_refresh_threshold_seconds {
            if !(60..=604_800).contains(&v) {
                return Err(FormError::validation(
                    "batch.signed_url_refresh_threshold_seconds must be in 60..=604800",
                ));
            }
        }
        if let Some(v) = self.vcpu_per_worker {
            if v < 1 {
                return Err(FormError::validation("batch.vcpu_per_worker must be >= 1"));
            }
        }
        if let Some(v) = self.memory_per_worker_mb {
            if v < 1024 {
                return Err(FormError::validation("batch.memory_per_worker_mb must be >= 1024"));
            }
        }
        if let Some(v) = self.max_attempts {
            if v < 1 {
                return Err(FormError::validation("batch.max_attempts must be >= 1"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUrlRefreshRequest {
    pub client_config_object: String,
    pub execution_id: Option<String>,
    pub signed_url_ttl_hours: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CpuClass {
    Standard,
    Low,
    GcpSpot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    CloudRun,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSenderTask {
    pub execution_id: Option<String>,
    pub targeting_id: i64,
    pub client_config_ref: String,
    pub client_config_object: String,
    #[serde(default)]
    pub tables: TableConfig,
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub test_mode: bool,
    pub branch: Option<String>,
    #[serde(default = "default_workflow_trigger")]
    pub workflow_trigger: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub cpu_class: Option<CpuClass>,
    #[serde(default = "default_mode")]
    pub mode: DispatchMode,
    pub batch: Option<BatchOptions>,
}

fn default_workflow_trigger() -> String {
    "automated".to_string()
}

fn default_mode() -> DispatchMode {
    DispatchMode::CloudRun
}

impl FormSenderTask {
    /// Full field-level validation plus the `batch` normalization rule
    /// (presence of `batch` forces `mode=batch`, and forces
    /// `batch.enabled=true`), matching `normalize_batch_mode` in the
    /// original schema.
    pub fn validate_and_normalize(mut self) -> FormResult<Self> {
        if !self.client_config_object.starts_with("gs://") {
            return Err(FormError::validation("client_config_object must be a gs:// URI"));
        }
        ensure_http_url(&self.client_config_ref, "client_config_ref")?;
        if url::Url::parse(&self.client_config_ref)
            .map(|u| u.host_str().unwrap_or("").is_empty())
            .unwrap_or(true)
        {
            return Err(FormError::validation("client_config_ref must include host"));
        }

        self.execution.validate()?;

        if let Some(branch) = &self.branch {
            if branch.len() > 255 {
                return Err(FormError::validation("branch name too long"));
            }
            if branch.starts_with('-') {
                return Err(FormError::validation("branch cannot start with hyphen"));
            }
            if !BRANCH_PATTERN.is_match(branch) {
                return Err(FormError::validation(
                    "branch must contain only alphanumeric, /, _, ., - characters",
                ));
            }
        }

        if let Some(execution_id) = &self.execution_id {
            let trimmed = execution_id.trim();
            if trimmed.is_empty() {
                return Err(FormError::validation("execution_id cannot be blank"));
            }
            if trimmed.len() > 128 {
                return Err(FormError::validation("execution_id too long"));
            }
            if !EXECUTION_ID_PATTERN.is_match(trimmed) {
                return Err(FormError::validation("execution_id must be alphanumeric or hyphenated"));
            }
            self.execution_id = Some(trimmed.to_string());
        }

        if let Some(batch) = &self.batch {
            batch.validate()?;
            let mut batch = batch.clone();
            batch.enabled = true;
            self.batch = Some(batch);
            self.mode = DispatchMode::Batch;
        }

        Ok(self)
    }

    pub fn batch_enabled(&self) -> bool {
        self.mode == DispatchMode::Batch
    }

    /// `min(parallelism, run_total, batch.max_parallelism?)`, floored at 1
    /// (spec.md §4.3.3).
    pub fn effective_parallelism(&self) -> i64 {
        let base = self.execution.parallelism.min(self.execution.run_total).max(1);
        if !self.batch_enabled() {
            return base;
        }
        match self.batch.as_ref().and_then(|b| b.max_parallelism) {
            Some(cap) => base.min(cap).max(1),
            None => base,
        }
    }

    /// Base64-encoded JSON of `{run_index_base, shards,
    /// workers_per_workflow, test_mode}` for `JOB_EXECUTION_META`
    /// (spec.md §4.3.3).
    pub fn job_execution_meta(&self) -> String {
        let payload = serde_json::json!({
            "run_index_base": self.execution.run_index_base,
            "shards": self.execution.shards,
            "workers_per_workflow": self.execution.workers_per_workflow,
            "test_mode": self.test_mode,
        });
        base64::engine::general_purpose::STANDARD.encode(payload.to_string())
    }

    /// `(bucket, blob_name)` parsed out of the `gs://bucket/path` URI.
    pub fn gcs_blob_components(&self) -> FormResult<(String, String)> {
        let rest = self
            .client_config_object
            .strip_prefix("gs://")
            .ok_or_else(|| FormError::validation("client_config_object must be a gs:// URI"))?;
        let mut parts = rest.splitn(2, '/');
        let bucket = parts.next().unwrap_or_default().to_string();
        let blob = parts.next().unwrap_or_default().to_string();
        if bucket.is_empty() || blob.is_empty() {
            return Err(FormError::validation("client_config_object must include bucket and object path"));
        }
        Ok((bucket, blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FormSenderTask {
        FormSenderTask {
            execution_id: None,
            targeting_id: 1,
            client_config_ref: "https://storage.googleapis.com/bucket/object?X-Goog-Algorithm=GOOG4-RSA-SHA256".to_string(),
            client_config_object: "gs://bucket/object".to_string(),
            tables: TableConfig::default(),
            execution: ExecutionConfig {
                run_total: 10,
                parallelism: 4,
                run_index_base: 0,
                shards: 1,
                workers_per_workflow: 4,
            },
            test_mode: false,
            branch: None,
            workflow_trigger: default_workflow_trigger(),
            metadata: Metadata::default(),
            cpu_class: None,
            mode: DispatchMode::CloudRun,
            batch: None,
        }
    }

    #[test]
    fn valid_task_passes() {
        assert!(sample().validate_and_normalize().is_ok());
    }

    #[test]
    fn rejects_non_gs_config_object() {
        let mut task = sample();
        task.client_config_object = "https://bucket/object".to_string();
        assert!(task.validate_and_normalize().is_err());
    }

    #[test]
    fn rejects_parallelism_above_run_total() {
        let mut task = sample();
        task.execution.parallelism = 100;
        assert!(task.validate_and_normalize().is_err());
    }

    #[test]
    fn rejects_branch_starting_with_hyphen() {
        let mut task = sample();
        task.branch = Some("-feature".to_string());
        assert!(task.validate_and_normalize().is_err());
    }

    #[test]
    fn presence_of_batch_forces_batch_mode() {
        let mut task = sample();
        task.batch = Some(BatchOptions {
            enabled: false,
            max_parallelism: Some(2),
            prefer_spot: true,
            allow_on_demand_fallback: true,
            machine_type: None,
            signed_url_ttl_hours: None,
            signed_url_refresh_threshold_seconds: None,
            vcpu_per_worker: None,
            memory_per_worker_mb: None,
            memory_buffer_mb: None,
            max_attempts: None,
            memory_warning: None,
            computed_memory_mb: None,
        });
        let normalized = task.validate_and_normalize().unwrap();
        assert_eq!(normalized.mode, DispatchMode::Batch);
        assert!(normalized.batch.unwrap().enabled);
    }

    #[test]
    fn effective_parallelism_respects_batch_cap() {
        let mut task = sample();
        task.batch = Some(BatchOptions {
            enabled: true,
            max_parallelism: Some(2),
            prefer_spot: true,
            allow_on_demand_fallback: true,
            machine_type: None,
            signed_url_ttl_hours: None,
            signed_url_refresh_threshold_seconds: None,
            vcpu_per_worker: None,
            memory_per_worker_mb: None,
            memory_buffer_mb: None,
            max_attempts: None,
            memory_warning: None,
            computed_memory_mb: None,
        });
        let normalized = task.validate_and_normalize().unwrap();
        assert_eq!(normalized.effective_parallelism(), 2);
    }
}
