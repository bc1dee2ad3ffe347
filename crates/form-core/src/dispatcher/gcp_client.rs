//! A `CloudBatchClient` implementation over the bare Cloud Run Admin
//! and Cloud Batch REST APIs, grounded on
//! `original_source/src/dispatcher/gcp.py`'s `CloudRunJobRunner` and
//! `CloudBatchJobRunner` (job path layout, task-group/parallelism
//! shape, allocation policy). Authenticates the way a workload running
//! on GCE/Cloud Run itself would: a bearer token pulled from the
//! instance metadata server, never a service-account key file.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::contracts::{FormError, FormResult};
use crate::dispatcher::cloud_job::{CloudBatchClient, CloudJobStatus, JobState, LaunchResult, MachineShape, StatusEvent};
use crate::dispatcher::gcp_auth::metadata_access_token;
use crate::dispatcher::schemas::FormSenderTask;

#[derive(Debug, Clone)]
pub struct GcpSettings {
    pub project_id: String,
    pub location: String,
    pub cloud_run_job_name: String,
    pub batch_project_id: String,
    pub batch_location: String,
    pub batch_container_image: String,
    pub batch_job_prefix: String,
    pub batch_service_account_email: Option<String>,
}

pub struct GcpBatchClient {
    client: reqwest::Client,
    settings: GcpSettings,
}

impl GcpBatchClient {
    pub fn new(settings: GcpSettings) -> Self {
        Self { client: reqwest::Client::new(), settings }
    }

    fn job_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/jobs/{}",
            self.settings.project_id, self.settings.location, self.settings.cloud_run_job_name
        )
    }

    fn batch_parent(&self) -> String {
        format!("projects/{}/locations/{}", self.settings.batch_project_id, self.settings.batch_location)
    }

    async fn authed(&self, request: reqwest::RequestBuilder) -> FormResult<reqwest::RequestBuilder> {
        let token = metadata_access_token(&self.client).await?;
        Ok(request.bearer_auth(token))
    }

    fn sanitize_job_prefix(&self) -> String {
        let lowered = self.settings.batch_job_prefix.to_lowercase();
        let cleaned: String = lowered.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '-' }).collect();
        let trimmed = cleaned.trim_matches('-');
        if trimmed.is_empty() { "form-sender".to_string() } else { trimmed.to_string() }
    }
}

#[async_trait]
impl CloudBatchClient for GcpBatchClient {
    async fn launch_cloud_run(&self, _task: &FormSenderTask, env: BTreeMap<String, String>) -> FormResult<LaunchResult> {
        let url = format!("https://{}-run.googleapis.com/v2/{}:run", self.settings.location, self.job_path());
        let env_vars: Vec<Value> = env.into_iter().map(|(k, v)| json!({ "name": k, "value": v })).collect();
        let payload = json!({
            "overrides": {
                "containerOverrides": [{ "env": env_vars }],
            }
        });
        let request = self.authed(self.client.post(&url).json(&payload)).await?;
        let response = request
            .send()
            .await
            .map_err(|e| FormError::provider(format!("cloud run launch failed: {e}"), true))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(FormError::provider(format!("cloud run launch returned {status}: {body}"), status.as_u16() >= 500));
        }
        let operation_name = body["name"].as_str().map(str::to_string);
        let execution_name = body["metadata"]["name"].as_str().map(str::to_string).or_else(|| operation_name.clone());
        Ok(LaunchResult { execution_name: execution_name.unwrap_or_default(), operation_name })
    }

    async fn launch_batch(&self, task: &FormSenderTask, env: BTreeMap<String, String>, shape: MachineShape) -> FormResult<LaunchResult> {
        let job_id = format!("{}-{:x}", self.sanitize_job_prefix(), rand::random::<u64>());
        let parent = self.batch_parent();
        let url = format!("https://batch.googleapis.com/v1/{parent}/jobs?job_id={job_id}");

        let provisioning_model = if task.batch.as_ref().map(|b| b.prefer_spot).unwrap_or(true) { "SPOT" } else { "STANDARD" };
        let mut instances = vec![json!({
            "policy": {
                "machineType": shape.machine_type.clone().unwrap_or_else(|| format!("n2d-custom-{}-{}", shape.vcpu, shape.memory_mb)),
                "provisioningModel": provisioning_model,
            }
        })];
        if provisioning_model == "SPOT" && task.batch.as_ref().map(|b| b.allow_on_demand_fallback).unwrap_or(true) {
            instances.push(json!({
                "policy": {
                    "machineType": shape.machine_type.clone().unwrap_or_else(|| format!("n2d-custom-{}-{}", shape.vcpu, shape.memory_mb)),
                    "provisioningModel": "STANDARD",
                }
            }));
        }

        let task_count = task.execution.run_total;
        let parallelism = task.effective_parallelism();
        let max_retry_count = (task.batch.as_ref().and_then(|b| b.max_attempts).unwrap_or(1) - 1).max(0);

        let payload = json!({
            "taskGroups": [{
                "taskSpec": {
                    "runnables": [{ "container": { "imageUri": self.settings.batch_container_image } }],
                    "environment": { "variables": env },
                    "computeResource": { "cpuMilli": shape.vcpu * 1000, "memoryMib": shape.memory_mb },
                    "maxRetryCount": max_retry_count,
                },
                "taskCount": task_count,
                "parallelism": parallelism,
            }],
            "allocationPolicy": {
                "instances": instances,
                "serviceAccount": self.settings.batch_service_account_email.as_ref().map(|email| json!({ "email": email })),
            },
            "labels": { "workload": "form_sender", "targeting_id": task.targeting_id.to_string() },
        });

        let request = self.authed(self.client.post(&url).json(&payload)).await?;
        let response = request
            .send()
            .await
            .map_err(|e| FormError::provider(format!("batch job launch failed: {e}"), true))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(FormError::provider(format!("batch job launch returned {status}: {body}"), status.as_u16() >= 500));
        }
        let execution_name = body["name"].as_str().unwrap_or(&format!("{parent}/jobs/{job_id}")).to_string();
        Ok(LaunchResult { execution_name, operation_name: None })
    }

    async fn get_job(&self, job_name: &str) -> FormResult<CloudJobStatus> {
        let url = format!("https://batch.googleapis.com/v1/{job_name}");
        let request = self.authed(self.client.get(&url)).await?;
        let response = request
            .send()
            .await
            .map_err(|e| FormError::provider(format!("batch job poll failed: {e}"), true))?;
        let status_code = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status_code.is_success() {
            return Err(FormError::provider(format!("batch job poll returned {status_code}: {body}"), status_code.as_u16() >= 500));
        }
        let state_str = body["status"]["state"].as_str().unwrap_or("STATE_UNSPECIFIED");
        let state = match state_str {
            "QUEUED" => JobState::Queued,
            "SCHEDULED" => JobState::Scheduled,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed,
            "DELETION_IN_PROGRESS" => JobState::DeletionInProgress,
            _ => JobState::Unspecified,
        };
        let status_events = body["status"]["statusEvents"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|event| StatusEvent {
                description: event["description"].as_str().map(str::to_string),
                event_time: event["eventTime"].as_str().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&chrono::Utc)),
            })
            .collect();
        Ok(CloudJobStatus { state, status_events })
    }

    async fn cancel(&self, job_name: &str) -> FormResult<()> {
        let url = format!("https://batch.googleapis.com/v1/{job_name}");
        let request = self.authed(self.client.delete(&url)).await?;
        let response = request
            .send()
            .await
            .map_err(|e| FormError::provider(format!("batch job cancel failed: {e}"), true))?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(FormError::provider(format!("batch job cancel returned {status}"), status.as_u16() >= 500));
        }
        Ok(())
    }
}
