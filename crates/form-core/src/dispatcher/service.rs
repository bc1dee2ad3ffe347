//! The dispatcher's HTTP surface (spec.md §4.3.1): six endpoints over
//! the `FormSenderTask` submission flow, backed by a `Repository`, a
//! `CloudBatchClient`, and a `SignedUrlSigner`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::contracts::FormError;
use crate::dispatcher::cloud_job::{build_execution_env, compute_machine_shape, CloudBatchClient};
use crate::dispatcher::monitor::{MonitorRegistry, MonitorSettings};
use crate::dispatcher::schemas::{FormSenderTask, SignedUrlRefreshRequest};
use crate::dispatcher::signed_url::{ensure_fresh_signed_url, SignedUrlSigner};
use crate::models::{job_execution::JobExecutionRow, JobExecutionStatus};
use crate::repository::{CloudJobMode, Repository};

#[derive(Clone)]
pub struct DispatcherState {
    pub repo: Arc<dyn Repository>,
    pub cloud: Arc<dyn CloudBatchClient>,
    pub signer: Arc<dyn SignedUrlSigner>,
    pub monitor: Arc<MonitorRegistry>,
    pub default_ttl_hours: i64,
    pub default_refresh_threshold_seconds: i64,
    pub default_monitor_settings: MonitorSettings,
}

pub fn router(state: DispatcherState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/form-sender/validate-config", post(validate_config))
        .route("/v1/form-sender/tasks", post(submit_task))
        .route("/v1/form-sender/signed-url/refresh", post(refresh_signed_url))
        .route("/v1/form-sender/executions", get(list_executions))
        .route("/v1/form-sender/executions/{id}/cancel", post(cancel_execution))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

fn validation_response(err: FormError) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { detail: err.message }))
}

fn internal_response(err: FormError) -> (StatusCode, Json<ErrorBody>) {
    log::error!(target: "form_core::dispatcher::service", error = err.message.as_str(); "unhandled dispatcher error");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { detail: "internal error".to_string() }))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct ValidateConfigRequest {
    client_config: serde_json::Value,
}

/// Accepts the same shape a `FormSenderTask.client_config_object`
/// payload would resolve to and reports whether it transforms cleanly
/// (spec.md §4.3.1).
async fn validate_config(
    Json(req): Json<ValidateConfigRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    match serde_json::from_value::<FormSenderTask>(req.client_config) {
        Ok(task) => match task.validate_and_normalize() {
            Ok(_) => Ok(Json(json!({"status": "ok"}))),
            Err(e) => Err(validation_response(e)),
        },
        Err(e) => Err(validation_response(FormError::validation(e.to_string()))),
    }
}

#[derive(Serialize)]
struct SubmitTaskResponse {
    status: &'static str,
    job_execution_id: String,
    cloud_run_operation: Option<String>,
}

async fn submit_task(
    State(state): State<DispatcherState>,
    Json(req): Json<FormSenderTask>,
) -> Result<Json<SubmitTaskResponse>, (StatusCode, Json<ErrorBody>)> {
    let task = req.validate_and_normalize().map_err(validation_response)?;

    let existing = state
        .repo
        .find_active_execution(task.targeting_id, task.execution.run_index_base)
        .await
        .map_err(internal_response)?;
    if let Some(existing) = existing {
        return Ok(Json(SubmitTaskResponse {
            status: "duplicate",
            job_execution_id: existing.execution_id,
            cloud_run_operation: None,
        }));
    }

    let (bucket, object) = task.gcs_blob_components().map_err(validation_response)?;
    let ttl_hours = task.batch.as_ref().and_then(|b| b.signed_url_ttl_hours).unwrap_or(state.default_ttl_hours);
    let refresh_threshold = task
        .batch
        .as_ref()
        .and_then(|b| b.signed_url_refresh_threshold_seconds)
        .unwrap_or(state.default_refresh_threshold_seconds);
    let fresh_url = ensure_fresh_signed_url(
        state.signer.as_ref(),
        &task.client_config_ref,
        &bucket,
        &object,
        ttl_hours,
        refresh_threshold,
    )
    .await
    .map_err(internal_response)?;

    let execution_id = task.execution_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let env = build_execution_env(&task, &execution_id, &fresh_url).map_err(validation_response)?;

    let (mode, launch_result) = if task.batch_enabled() {
        let shape = compute_machine_shape(&task);
        let result = state.cloud.launch_batch(&task, env, shape).await.map_err(internal_response)?;
        (CloudJobMode::Batch, result)
    } else {
        let result = state.cloud.launch_cloud_run(&task, env).await.map_err(internal_response)?;
        (CloudJobMode::CloudRun, result)
    };

    let row = JobExecutionRow {
        execution_id: execution_id.clone(),
        targeting_id: task.targeting_id,
        run_index_base: task.execution.run_index_base,
        task_count: task.execution.run_total,
        parallelism: task.effective_parallelism(),
        shards: task.execution.shards,
        workers_per_workflow: task.execution.workers_per_workflow,
        status: JobExecutionStatus::Running,
        started_at: chrono::Utc::now(),
        ended_at: None,
        metadata: json!({
            "cloud_operation_name": launch_result.operation_name,
            "cloud_execution_name": launch_result.execution_name,
        }),
    };
    state
        .repo
        .insert_execution(row, launch_result.operation_name.clone(), Some(launch_result.execution_name.clone()), mode)
        .await
        .map_err(internal_response)?;

    state.monitor.schedule(
        state.repo.clone(),
        state.cloud.clone(),
        execution_id.clone(),
        launch_result.execution_name.clone(),
        state.default_monitor_settings,
    );

    Ok(Json(SubmitTaskResponse {
        status: "queued",
        job_execution_id: execution_id,
        cloud_run_operation: launch_result.operation_name,
    }))
}

async fn refresh_signed_url(
    State(state): State<DispatcherState>,
    Json(req): Json<SignedUrlRefreshRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    if !req.client_config_object.starts_with("gs://") {
        return Err(validation_response(FormError::validation("client_config_object must be a gs:// URI")));
    }
    let rest = &req.client_config_object["gs://".len()..];
    let mut parts = rest.splitn(2, '/');
    let bucket = parts.next().unwrap_or_default();
    let object = parts.next().unwrap_or_default();
    if bucket.is_empty() || object.is_empty() {
        return Err(validation_response(FormError::validation(
            "client_config_object must include bucket and object path",
        )));
    }

    let ttl_hours = req.signed_url_ttl_hours.unwrap_or(state.default_ttl_hours).max(1);
    let url = state
        .signer
        .sign(bucket, object, ttl_hours)
        .await
        .map_err(internal_response)?;
    Ok(Json(json!({"signed_url": url})))
}

#[derive(Deserialize)]
struct ListExecutionsQuery {
    status: Option<String>,
    targeting_id: Option<i64>,
}

async fn list_executions(
    State(state): State<DispatcherState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<JobExecutionRow>>, (StatusCode, Json<ErrorBody>)> {
    let status = match query.status.as_deref() {
        Some("running") => Some(JobExecutionStatus::Running),
        Some("succeeded") => Some(JobExecutionStatus::Succeeded),
        Some("failed") => Some(JobExecutionStatus::Failed),
        Some("cancelled") => Some(JobExecutionStatus::Cancelled),
        Some(other) if !other.is_empty() => {
            return Err(validation_response(FormError::validation(format!("unknown status filter '{other}'"))));
        }
        _ => None,
    };
    let rows = state
        .repo
        .list_executions(status, query.targeting_id)
        .await
        .map_err(internal_response)?;
    Ok(Json(rows))
}

async fn cancel_execution(
    State(state): State<DispatcherState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let row = state.repo.get_execution(&id).await.map_err(internal_response)?;
    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, Json(ErrorBody { detail: "execution not found".to_string() })));
    };
    if row.status != JobExecutionStatus::Running {
        return Ok(Json(json!({"status": format!("{:?}", row.status).to_lowercase()})));
    }

    let job_name = row
        .metadata
        .get("cloud_execution_name")
        .and_then(|v| v.as_str())
        .or_else(|| row.metadata.get("cloud_operation_name").and_then(|v| v.as_str()))
        .unwrap_or_default();
    state.cloud.cancel(job_name).await.map_err(internal_response)?;
    state
        .repo
        .update_status(&id, JobExecutionStatus::Cancelled, Some(chrono::Utc::now()))
        .await
        .map_err(internal_response)?;

    Ok(Json(json!({"status": "cancelled"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_with_detail_field() {
        let body = ErrorBody { detail: "bad request".to_string() };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["detail"], "bad request");
    }
}
