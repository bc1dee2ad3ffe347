//! A `Repository` implementation against a PostgREST-compatible REST
//! API (Supabase's REST surface), grounded on
//! `original_source/src/dispatcher/supabase_client.py`'s
//! `JobExecutionRepository` (table/filter/update shape) and
//! `original_source/src/form_sender`'s companies/send_queue access
//! pattern for the orchestrator side.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::contracts::{FormError, FormResult};
use crate::models::{CompanyRecord, JobExecutionRow, JobExecutionStatus, SubmissionRecord};
use crate::repository::{CandidateFetchParams, CloudJobMode, Repository};

/// Talks to `{base_url}/rest/v1/...` the way `supabase-py`'s
/// `create_client(url, key).table(...)` does under the hood: every
/// request carries `apikey` and `Authorization: Bearer {key}`, and
/// reads ask for `Prefer: return=representation` so writes come back
/// with the row they produced.
pub struct PostgrestRepository {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    job_executions_table: String,
    company_table: String,
    submissions_table: String,
    candidates_rpc: String,
}

impl PostgrestRepository {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, company_table: impl Into<String>, submissions_table: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            job_executions_table: "job_executions".to_string(),
            company_table: company_table.into(),
            submissions_table: submissions_table.into(),
            candidates_rpc: "fetch_form_sender_candidates".to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("apikey", &self.api_key).header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> FormResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| FormError::provider(format!("postgrest request failed: {e}"), true))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(FormError::provider(
                format!("postgrest request returned {status}: {body}"),
                status.as_u16() >= 500 || status.as_u16() == 429,
            ));
        }
        Ok(body)
    }
}

fn status_literal(status: JobExecutionStatus) -> &'static str {
    match status {
        JobExecutionStatus::Running => "running",
        JobExecutionStatus::Succeeded => "succeeded",
        JobExecutionStatus::Failed => "failed",
        JobExecutionStatus::Cancelled => "cancelled",
        JobExecutionStatus::CancellationInProgress => "cancellation_in_progress",
    }
}

#[async_trait]
impl Repository for PostgrestRepository {
    async fn find_active_execution(&self, targeting_id: i64, run_index_base: i64) -> FormResult<Option<JobExecutionRow>> {
        let url = self.table_url(&self.job_executions_table);
        let request = self
            .client
            .get(&url)
            .query(&[
                ("targeting_id", format!("eq.{targeting_id}")),
                ("run_index_base", format!("eq.{run_index_base}")),
                ("status", "in.(running,queued)".to_string()),
                ("limit", "1".to_string()),
                ("select", "*".to_string()),
            ]);
        let body = self.send_json(self.headers(request)).await?;
        let rows: Vec<JobExecutionRow> = serde_json::from_value(body).unwrap_or_default();
        Ok(rows.into_iter().next())
    }

    async fn insert_execution(
        &self,
        row: JobExecutionRow,
        op_name: Option<String>,
        exec_name: Option<String>,
        mode: CloudJobMode,
    ) -> FormResult<JobExecutionRow> {
        let url = self.table_url(&self.job_executions_table);
        let execution_mode = match mode {
            CloudJobMode::CloudRun => "cloud_run",
            CloudJobMode::Batch => "batch",
        };
        let mut metadata = row.metadata.clone();
        metadata["cloud_run_operation"] = json!(op_name);
        metadata["cloud_run_execution"] = json!(exec_name);
        metadata["execution_mode"] = json!(execution_mode);

        let payload = json!({
            "execution_id": row.execution_id,
            "job_type": "form_sender",
            "targeting_id": row.targeting_id,
            "run_index_base": row.run_index_base,
            "task_count": row.task_count,
            "parallelism": row.parallelism,
            "shards": row.shards,
            "workers_per_workflow": row.workers_per_workflow,
            "status": status_literal(row.status),
            "started_at": row.started_at.to_rfc3339(),
            "execution_mode": execution_mode,
            "metadata": metadata,
        });
        let request = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&payload);
        let body = self.send_json(self.headers(request)).await?;
        let rows: Vec<JobExecutionRow> = serde_json::from_value(body).map_err(|e| FormError::internal(format!("unexpected insert response: {e}")))?;
        rows.into_iter().next().ok_or_else(|| FormError::internal("insert_execution returned no row"))
    }

    async fn update_metadata(&self, execution_id: &str, deep_patch: &Value) -> FormResult<()> {
        let Some(mut row) = self.get_execution(execution_id).await? else { return Ok(()) };
        row.patch_metadata(deep_patch);
        let url = self.table_url(&self.job_executions_table);
        let request = self
            .client
            .patch(&url)
            .query(&[("execution_id", format!("eq.{execution_id}"))])
            .json(&json!({ "metadata": row.metadata }));
        self.send_json(self.headers(request)).await?;
        Ok(())
    }

    async fn update_status(&self, execution_id: &str, status: JobExecutionStatus, ended_at: Option<chrono::DateTime<chrono::Utc>>) -> FormResult<()> {
        let url = self.table_url(&self.job_executions_table);
        let mut payload = json!({ "status": status_literal(status) });
        if let Some(ended_at) = ended_at {
            payload["ended_at"] = json!(ended_at.to_rfc3339());
        }
        let request = self
            .client
            .patch(&url)
            .query(&[("execution_id", format!("eq.{execution_id}"))])
            .json(&payload);
        self.send_json(self.headers(request)).await?;
        Ok(())
    }

    async fn list_executions(&self, status: Option<JobExecutionStatus>, targeting_id: Option<i64>) -> FormResult<Vec<JobExecutionRow>> {
        let url = self.table_url(&self.job_executions_table);
        let mut query = vec![("select".to_string(), "*".to_string()), ("order".to_string(), "started_at.desc".to_string()), ("limit".to_string(), "100".to_string())];
        if let Some(status) = status {
            query.push(("status".to_string(), format!("eq.{}", status_literal(status))));
        }
        if let Some(targeting_id) = targeting_id {
            query.push(("targeting_id".to_string(), format!("eq.{targeting_id}")));
        }
        let request = self.client.get(&url).query(&query);
        let body = self.send_json(self.headers(request)).await?;
        serde_json::from_value(body).map_err(|e| FormError::internal(format!("unexpected list_executions response: {e}")))
    }

    async fn get_execution(&self, execution_id: &str) -> FormResult<Option<JobExecutionRow>> {
        let url = self.table_url(&self.job_executions_table);
        let request = self
            .client
            .get(&url)
            .query(&[("execution_id", format!("eq.{execution_id}")), ("select", "*".to_string()), ("limit", "1".to_string())]);
        let body = self.send_json(self.headers(request)).await?;
        let rows: Vec<JobExecutionRow> = serde_json::from_value(body).unwrap_or_default();
        Ok(rows.into_iter().next())
    }

    async fn insert_submission(&self, row: SubmissionRecord) -> FormResult<()> {
        let url = self.table_url(&self.submissions_table);
        let request = self.client.post(&url).json(&row);
        self.send_json(self.headers(request)).await?;
        Ok(())
    }

    async fn count_successes_today(&self, targeting_id: i64) -> FormResult<u32> {
        let today = chrono::Utc::now().date_naive();
        let start = today.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let url = self.table_url(&self.submissions_table);
        let request = self.client.get(&url).query(&[
            ("targeting_id", format!("eq.{targeting_id}")),
            ("success", "eq.true".to_string()),
            ("submitted_at", format!("gte.{}", start.to_rfc3339())),
            ("select", "targeting_id".to_string()),
        ]);
        let body = self.send_json(self.headers(request)).await?;
        Ok(body.as_array().map(|a| a.len()).unwrap_or(0) as u32)
    }

    async fn update_company_flags(&self, record_id: i64, prohibition_detected: Option<bool>, bot_protection_detected: Option<bool>) -> FormResult<()> {
        let mut payload = serde_json::Map::new();
        if let Some(v) = prohibition_detected {
            payload.insert("prohibition_detected".to_string(), json!(v));
        }
        if let Some(v) = bot_protection_detected {
            payload.insert("bot_protection_detected".to_string(), json!(v));
        }
        if payload.is_empty() {
            return Ok(());
        }
        let url = self.table_url(&self.company_table);
        let request = self
            .client
            .patch(&url)
            .query(&[("record_id", format!("eq.{record_id}"))])
            .json(&Value::Object(payload));
        self.send_json(self.headers(request)).await?;
        Ok(())
    }

    async fn fetch_candidates(&self, params: CandidateFetchParams) -> FormResult<Vec<CompanyRecord>> {
        let url = self.rpc_url(&self.candidates_rpc);
        let payload = json!({
            "p_company_table": self.company_table,
            "p_start_id": params.start_id,
            "p_limit": params.limit,
            "p_targeting_sql": params.targeting_sql,
            "p_ng_companies": params.ng_companies,
        });
        let request = self.client.post(&url).json(&payload);
        let body = self.send_json(self.headers(request)).await?;
        serde_json::from_value(body).map_err(|e| FormError::internal(format!("unexpected fetch_candidates response: {e}")))
    }

    async fn max_company_id(&self) -> FormResult<i64> {
        let url = self.table_url(&self.company_table);
        let request = self.client.get(&url).query(&[("select", "record_id".to_string()), ("order", "record_id.desc".to_string()), ("limit", "1".to_string())]);
        let body = self.send_json(self.headers(request)).await?;
        Ok(body
            .as_array()
            .and_then(|a| a.first())
            .and_then(|row| row.get("record_id"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }
}
