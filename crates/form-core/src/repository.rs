//! The persistence seam (spec.md §6 "Database row shapes"). Everything
//! above this trait is storage-agnostic; a real implementation talks to
//! the external row-oriented database (Postgrest-style, per the
//! original), a test implementation keeps rows in memory.

use async_trait::async_trait;
use serde_json::Value;

use crate::contracts::FormResult;
use crate::models::{CompanyRecord, JobExecutionRow, JobExecutionStatus, SubmissionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudJobMode {
    CloudRun,
    Batch,
}

/// Parameters for the targeting-aware company-fetch RPC (spec.md
/// §4.2.5). `start_id` anchors the scan; the database side wraps
/// around when it runs out of rows ahead of `start_id`.
#[derive(Debug, Clone)]
pub struct CandidateFetchParams {
    pub start_id: i64,
    pub limit: u32,
    pub targeting_sql: String,
    pub ng_companies: Option<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_active_execution(
        &self,
        targeting_id: i64,
        run_index_base: i64,
    ) -> FormResult<Option<JobExecutionRow>>;

    async fn insert_execution(
        &self,
        row: JobExecutionRow,
        op_name: Option<String>,
        exec_name: Option<String>,
        mode: CloudJobMode,
    ) -> FormResult<JobExecutionRow>;

    async fn update_metadata(&self, execution_id: &str, deep_patch: &Value) -> FormResult<()>;

    async fn update_status(
        &self,
        execution_id: &str,
        status: JobExecutionStatus,
        ended_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> FormResult<()>;

    async fn list_executions(
        &self,
        status: Option<JobExecutionStatus>,
        targeting_id: Option<i64>,
    ) -> FormResult<Vec<JobExecutionRow>>;

    async fn get_execution(&self, execution_id: &str) -> FormResult<Option<JobExecutionRow>>;

    async fn insert_submission(&self, row: SubmissionRecord) -> FormResult<()>;

    async fn count_successes_today(&self, targeting_id: i64) -> FormResult<u32>;

    async fn update_company_flags(
        &self,
        record_id: i64,
        prohibition_detected: Option<bool>,
        bot_protection_detected: Option<bool>,
    ) -> FormResult<()>;

    /// The targeting-aware candidate-fetch RPC (spec.md §4.2.5): up to
    /// 1000 rows with `form_url IS NOT NULL`, `instruction_valid IS NULL
    /// OR true`, `prohibition_detected IS NULL OR false`, filtered by
    /// `targeting_sql` and `ng_companies`, in `start_id..` wraparound
    /// order.
    async fn fetch_candidates(&self, params: CandidateFetchParams) -> FormResult<Vec<CompanyRecord>>;

    async fn max_company_id(&self) -> FormResult<i64>;
}

pub mod postgrest;

/// In-memory implementation for tests and local runs. Grounds the same
/// shape the teacher's mock repositories take in its tool test modules
/// (construct-then-assert, no network).
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockRepository {
        executions: Mutex<HashMap<String, JobExecutionRow>>,
        submissions: Mutex<Vec<SubmissionRecord>>,
        companies: Mutex<Vec<CompanyRecord>>,
    }

    impl MockRepository {
        pub fn new(companies: Vec<CompanyRecord>) -> Self {
            Self {
                executions: Mutex::new(HashMap::new()),
                submissions: Mutex::new(Vec::new()),
                companies: Mutex::new(companies),
            }
        }

        pub fn submissions(&self) -> Vec<SubmissionRecord> {
            self.submissions.lock().clone()
        }
    }

    #[async_trait]
    impl Repository for MockRepository {
        async fn find_active_execution(
            &self,
            targeting_id: i64,
            run_index_base: i64,
        ) -> FormResult<Option<JobExecutionRow>> {
            Ok(self
                .executions
                .lock()
                .values()
                .find(|row| {
                    row.targeting_id == targeting_id
                        && row.run_index_base == run_index_base
                        && !row.status.is_terminal()
                })
                .cloned())
        }

        async fn insert_execution(
            &self,
            row: JobExecutionRow,
            _op_name: Option<String>,
            _exec_name: Option<String>,
            _mode: CloudJobMode,
        ) -> FormResult<JobExecutionRow> {
            self.executions
                .lock()
                .insert(row.execution_id.clone(), row.clone());
            Ok(row)
        }

        async fn update_metadata(&self, execution_id: &str, deep_patch: &Value) -> FormResult<()> {
            let mut executions = self.executions.lock();
            if let Some(row) = executions.get_mut(execution_id) {
                row.patch_metadata(deep_patch);
            }
            Ok(())
        }

        async fn update_status(
            &self,
            execution_id: &str,
            status: JobExecutionStatus,
            ended_at: Option<chrono::DateTime<chrono::Utc>>,
        ) -> FormResult<()> {
            let mut executions = self.executions.lock();
            if let Some(row) = executions.get_mut(execution_id) {
                row.transition_status(status)?;
                if let Some(ended_at) = ended_at {
                    row.ended_at = Some(ended_at);
                }
            }
            Ok(())
        }

        async fn list_executions(
            &self,
            status: Option<JobExecutionStatus>,
            targeting_id: Option<i64>,
        ) -> FormResult<Vec<JobExecutionRow>> {
            Ok(self
                .executions
                .lock()
                .values()
                .filter(|row| status.map(|s| row.status == s).unwrap_or(true))
                .filter(|row| targeting_id.map(|t| row.targeting_id == t).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn get_execution(&self, execution_id: &str) -> FormResult<Option<JobExecutionRow>> {
            Ok(self.executions.lock().get(execution_id).cloned())
        }

        async fn insert_submission(&self, row: SubmissionRecord) -> FormResult<()> {
            self.submissions.lock().push(row);
            Ok(())
        }

        async fn count_successes_today(&self, targeting_id: i64) -> FormResult<u32> {
            let today = chrono::Utc::now().date_naive();
            Ok(self
                .submissions
                .lock()
                .iter()
                .filter(|row| {
                    row.targeting_id == targeting_id
                        && row.success
                        && row.submitted_at.date_naive() == today
                })
                .count() as u32)
        }

        async fn update_company_flags(
            &self,
            record_id: i64,
            prohibition_detected: Option<bool>,
            bot_protection_detected: Option<bool>,
        ) -> FormResult<()> {
            let mut companies = self.companies.lock();
            if let Some(company) = companies.iter_mut().find(|c| c.record_id == record_id) {
                if let Some(v) = prohibition_detected {
                    company.prohibition_detected = v;
                }
                if let Some(v) = bot_protection_detected {
                    company.bot_protection_detected = v;
                }
            }
            Ok(())
        }

        async fn fetch_candidates(
            &self,
            params: CandidateFetchParams,
        ) -> FormResult<Vec<CompanyRecord>> {
            let companies = self.companies.lock();
            let mut result: Vec<CompanyRecord> = companies
                .iter()
                .filter(|c| c.record_id >= params.start_id)
                .cloned()
                .collect();
            if result.len() < params.limit as usize {
                let mut wrap: Vec<CompanyRecord> = companies
                    .iter()
                    .filter(|c| c.record_id < params.start_id)
                    .cloned()
                    .collect();
                result.append(&mut wrap);
            }
            result.truncate(params.limit as usize);
            Ok(result)
        }

        async fn max_company_id(&self) -> FormResult<i64> {
            Ok(self.companies.lock().iter().map(|c| c.record_id).max().unwrap_or(0))
        }
    }

    #[tokio::test]
    async fn mock_repository_round_trips_an_execution() {
        use crate::models::job_execution::JobExecutionRow;
        use serde_json::json;

        let repo = MockRepository::new(vec![]);
        let row = JobExecutionRow {
            execution_id: "exec-1".into(),
            targeting_id: 1,
            run_index_base: 0,
            task_count: 10,
            parallelism: 2,
            shards: 1,
            workers_per_workflow: 2,
            status: JobExecutionStatus::Running,
            started_at: chrono::Utc::now(),
            ended_at: None,
            metadata: json!({}),
        };
        repo.insert_execution(row.clone(), None, None, CloudJobMode::CloudRun)
            .await
            .unwrap();
        let found = repo
            .find_active_execution(1, 0)
            .await
            .unwrap()
            .expect("should find active execution");
        assert_eq!(found.execution_id, "exec-1");
    }
}
