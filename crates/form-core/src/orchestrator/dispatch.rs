//! The dispatch loop (spec.md §4.2.2): validate each candidate, run
//! the prohibition pre-filter, and either synthesize a local failure
//! or enqueue a task.

use std::time::Duration;

use crate::analyzer::prohibition;
use crate::contracts::FormResult;
use crate::models::{CompanyRecord, SubmissionRecord, TaskEnvelope};
use crate::net_safety::validate_outbound_url;
use crate::repository::Repository;

const PROHIBITION_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub enum DispatchDecision {
    Enqueue(TaskEnvelope),
    ProhibitionDetected { company_id: i64 },
    ValidationRejected { company_id: i64, reason: String },
}

/// Fetches the form URL over plain HTTP with a browser-like UA and a
/// 10s timeout, then runs the text-pattern detector against the body
/// (spec.md §4.2.2, §4.2.6).
async fn prefilter_prohibited(form_url: &str) -> FormResult<bool> {
    let url = validate_outbound_url(form_url)?;
    let client = reqwest::Client::builder()
        .timeout(PROHIBITION_FETCH_TIMEOUT)
        .user_agent("Mozilla/5.0 (compatible; FormSenderBot/1.0)")
        .build()
        .map_err(|e| crate::contracts::FormError::internal(format!("failed to build HTTP client: {e}")))?;
    let response = client
        .get(url)
        .header("Accept-Language", "ja")
        .send()
        .await
        .map_err(|e| crate::contracts::FormError::provider(format!("prohibition pre-filter fetch failed: {e}"), true))?;
    let body = response
        .text()
        .await
        .map_err(|e| crate::contracts::FormError::provider(format!("failed reading response body: {e}"), true))?;
    Ok(prohibition::is_prohibited(&body))
}

/// Validates a candidate, runs the pre-filter, and decides whether it
/// should be enqueued, synthesized locally as a prohibition failure,
/// or rejected outright (spec.md §4.2.2 seed scenario 1).
pub async fn evaluate_candidate(
    company: CompanyRecord,
    client_data: serde_json::Value,
    targeting_id: i64,
) -> DispatchDecision {
    if let Err(e) = company.validate_candidate() {
        return DispatchDecision::ValidationRejected {
            company_id: company.record_id,
            reason: e.message,
        };
    }

    match prefilter_prohibited(&company.form_url).await {
        Ok(true) => DispatchDecision::ProhibitionDetected { company_id: company.record_id },
        Ok(false) | Err(_) => {
            let task_id = uuid::Uuid::new_v4().to_string();
            DispatchDecision::Enqueue(TaskEnvelope::company(task_id, company, client_data, targeting_id))
        }
    }
}

/// Synthesizes the prohibition outcome locally: a submission row with
/// `failure_reason="prohibition_detected"` and the company flag set,
/// no worker dispatch (spec.md §4.2.2, seed scenario 1).
pub async fn record_prohibition_locally(
    repo: &dyn Repository,
    targeting_id: i64,
    company_id: i64,
) -> FormResult<()> {
    repo.insert_submission(SubmissionRecord::prohibition_detected(targeting_id, company_id))
        .await?;
    repo.update_company_flags(company_id, Some(true), None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::mock::MockRepository;

    #[tokio::test]
    async fn prohibition_is_recorded_without_dispatch() {
        let repo = MockRepository::new(vec![]);
        record_prohibition_locally(&repo, 1, 100).await.unwrap();
        let rows = repo.submissions();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert_eq!(rows[0].error_type.as_deref(), Some("PROHIBITION_DETECTED"));
    }
}
