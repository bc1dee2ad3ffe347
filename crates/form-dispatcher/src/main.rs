//! Entry point for the cloud-batch dispatcher service (spec.md §4.3):
//! an axum HTTP server fronting `Repository`/`CloudBatchClient`/
//! `SignedUrlSigner`, plus the background monitor registry. Grounded
//! on the teacher's service-binary shape (logger init, env-driven
//! settings, axum server bootstrap) rather than any single file, since
//! the teacher's own binaries are CLI/GUI tools, not HTTP services.

use std::sync::Arc;

use form_core::dispatcher::gcp_client::{GcpBatchClient, GcpSettings};
use form_core::dispatcher::gcs_signer::GcsSignedUrlSigner;
use form_core::dispatcher::monitor::{MonitorRegistry, MonitorSettings};
use form_core::dispatcher::{router, DispatcherState};
use form_core::models::JobExecutionStatus;
use form_core::repository::postgrest::PostgrestRepository;
use form_core::repository::Repository;
use form_core::utils::logger;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

fn env_required(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(key).map_err(|_| format!("missing required environment variable {key}").into())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn build_gcp_settings() -> Result<GcpSettings, Box<dyn std::error::Error>> {
    let project_id = env_required("FORM_SENDER_GCP_PROJECT")?;
    Ok(GcpSettings {
        batch_project_id: env_or("FORM_SENDER_BATCH_PROJECT", &project_id),
        project_id,
        location: env_or("FORM_SENDER_CLOUD_RUN_LOCATION", "asia-northeast1"),
        cloud_run_job_name: env_required("FORM_SENDER_CLOUD_RUN_JOB")?,
        batch_location: env_or("FORM_SENDER_BATCH_LOCATION", "asia-northeast1"),
        batch_container_image: env_required("FORM_SENDER_BATCH_IMAGE")?,
        batch_job_prefix: env_or("FORM_SENDER_BATCH_JOB_PREFIX", "form-sender"),
        batch_service_account_email: std::env::var("FORM_SENDER_BATCH_SERVICE_ACCOUNT").ok(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init_logger()?;

    let repo: Arc<dyn Repository> = Arc::new(PostgrestRepository::new(
        env_required("FORM_SENDER_DB_URL")?,
        env_required("FORM_SENDER_DB_API_KEY")?,
        env_or("COMPANY_TABLE", "companies"),
        env_or("SUBMISSIONS_TABLE", "send_queue"),
    ));

    let cloud = Arc::new(GcpBatchClient::new(build_gcp_settings()?));

    let signer_service_account = env_required("FORM_SENDER_SIGNER_SERVICE_ACCOUNT")?;
    let signer = Arc::new(GcsSignedUrlSigner::new(signer_service_account));

    let monitor = Arc::new(MonitorRegistry::new());

    let default_monitor_settings = MonitorSettings {
        interval_seconds: env_parsed("FORM_SENDER_MONITOR_INTERVAL_SECONDS", 60),
        timeout_seconds: env_parsed("FORM_SENDER_MONITOR_TIMEOUT_SECONDS", 6 * 3600),
    }
    .normalized();

    let state = DispatcherState {
        repo: repo.clone(),
        cloud: cloud.clone(),
        signer,
        monitor: monitor.clone(),
        default_ttl_hours: env_parsed("FORM_SENDER_SIGNED_URL_TTL_HOURS", 6),
        default_refresh_threshold_seconds: env_parsed("FORM_SENDER_SIGNED_URL_REFRESH_THRESHOLD_SECONDS", 900),
        default_monitor_settings,
    };

    reschedule_running_executions(&state, default_monitor_settings).await;

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = router(state).layer(ServiceBuilder::new().layer(cors));
    let bind_addr = env_or("FORM_SENDER_DISPATCHER_BIND", "0.0.0.0:8080");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!(target: "form_sender_dispatcher", bind_addr = bind_addr.as_str(); "dispatcher listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Re-attaches a monitor task to every execution that was still
/// `running` when the process last exited, so an orderly restart does
/// not leave cloud jobs un-watched (spec.md §4.3.4's "one lightweight
/// scheduler task per active execution" applies across process
/// restarts, not just within one).
async fn reschedule_running_executions(state: &DispatcherState, settings: MonitorSettings) {
    let rows = match state.repo.list_executions(Some(JobExecutionStatus::Running), None).await {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!(target: "form_sender_dispatcher", error = e.message.as_str(); "failed to list running executions at startup");
            return;
        }
    };
    for row in rows {
        let job_name = row
            .metadata
            .get("cloud_execution_name")
            .and_then(|v| v.as_str())
            .or_else(|| row.metadata.get("cloud_operation_name").and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();
        if job_name.is_empty() {
            continue;
        }
        state.monitor.schedule(state.repo.clone(), state.cloud.clone(), row.execution_id, job_name, settings);
    }
}
