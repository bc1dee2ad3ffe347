use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A `job_executions` row (spec.md §3). Identity is `execution_id`
/// (ulid/uuid, represented as an opaque string here since the ulid/uuid
/// choice is a storage-layer detail behind the repository trait).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecutionRow {
    pub execution_id: String,
    pub targeting_id: i64,
    pub run_index_base: i64,
    pub task_count: i64,
    pub parallelism: i64,
    pub shards: i64,
    pub workers_per_workflow: i64,
    pub status: JobExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    CancellationInProgress,
}

impl JobExecutionStatus {
    /// A terminal status never transitions back to `running` (spec.md
    /// §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobExecutionStatus::Succeeded
                | JobExecutionStatus::Failed
                | JobExecutionStatus::Cancelled
        )
    }
}

impl JobExecutionRow {
    /// Enforces the "never transitions back to running" invariant.
    /// Returns an error describing the rejected transition instead of
    /// silently ignoring it, so callers (the monitor, the cancel
    /// endpoint) can log it.
    pub fn transition_status(
        &mut self,
        new_status: JobExecutionStatus,
    ) -> Result<(), crate::contracts::FormError> {
        if self.status.is_terminal() && new_status == JobExecutionStatus::Running {
            return Err(crate::contracts::FormError::validation(format!(
                "execution {} is already terminal ({:?}); cannot transition back to running",
                self.execution_id, self.status
            )));
        }
        self.status = new_status;
        if new_status.is_terminal() {
            self.ended_at.get_or_insert(Utc::now());
        }
        Ok(())
    }

    pub fn patch_metadata(&mut self, patch: &Value) {
        self.metadata = deep_merge(&self.metadata, patch);
    }
}

/// Recursively merges `patch` into `base`: object keys recurse,
/// non-object values are replaced. Idempotent by construction (P6):
/// `merge(merge(a,p),p) == merge(a,p)` because re-applying the same
/// patch always yields the same replacement values at every recursion
/// leaf.
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => patch_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, patch_value) => patch_value.clone(),
    }
}

/// Builds the `batch.monitor.{state, reason?, events?, recorded_at}`
/// metadata patch the monitor writes on every poll (spec.md §3, §4.3.4).
pub fn monitor_state_patch(
    state: &str,
    reason: Option<&str>,
    events: Option<Vec<String>>,
    recorded_at: DateTime<chrono::FixedOffset>,
) -> Value {
    let mut monitor = json!({
        "state": state,
        "recorded_at": recorded_at.to_rfc3339(),
    });
    if let Some(reason) = reason {
        monitor["reason"] = json!(reason);
    }
    if let Some(events) = events {
        monitor["events"] = json!(events);
    }
    json!({ "batch": { "monitor": monitor } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_never_transitions_back_to_running() {
        let mut row = sample_row();
        row.transition_status(JobExecutionStatus::Succeeded).unwrap();
        let err = row
            .transition_status(JobExecutionStatus::Running)
            .expect_err("must reject");
        assert!(err.message.contains("terminal"));
    }

    #[test]
    fn terminal_transition_sets_ended_at_once() {
        let mut row = sample_row();
        row.transition_status(JobExecutionStatus::Failed).unwrap();
        let ended_at = row.ended_at;
        assert!(ended_at.is_some());
        // Re-recording the same terminal state keeps ended_at stable.
        row.transition_status(JobExecutionStatus::Failed).unwrap();
        assert_eq!(row.ended_at, ended_at);
    }

    #[test]
    fn deep_merge_recurses_into_nested_objects() {
        let base = json!({"batch": {"monitor": {"state": "running"}}, "other": 1});
        let patch = json!({"batch": {"monitor": {"state": "SUCCEEDED", "recorded_at": "now"}}});
        let merged = deep_merge(&base, &patch);
        assert_eq!(merged["batch"]["monitor"]["state"], "SUCCEEDED");
        assert_eq!(merged["batch"]["monitor"]["recorded_at"], "now");
        assert_eq!(merged["other"], 1);
    }

    #[test]
    fn deep_merge_is_idempotent() {
        let base = json!({"a": {"b": 1, "c": 2}});
        let patch = json!({"a": {"b": 99}});
        let once = deep_merge(&base, &patch);
        let twice = deep_merge(&once, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn deep_merge_replaces_scalars_and_arrays_wholesale() {
        let base = json!({"events": [1, 2, 3]});
        let patch = json!({"events": [4]});
        let merged = deep_merge(&base, &patch);
        assert_eq!(merged["events"], json!([4]));
    }

    fn sample_row() -> JobExecutionRow {
        JobExecutionRow {
            execution_id: "exec-1".to_string(),
            targeting_id: 10,
            run_index_base: 0,
            task_count: 100,
            parallelism: 4,
            shards: 1,
            workers_per_workflow: 4,
            status: JobExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            metadata: json!({}),
        }
    }
}
