use serde::{Deserialize, Serialize};

use crate::error_classifier::ClassifyDetail;

/// Append-only submission outcome row (spec.md §3). At most one success
/// per `(targeting_id, company_id)` is terminal (invariant P1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub targeting_id: i64,
    pub company_id: i64,
    pub success: bool,
    pub error_type: Option<String>,
    pub classify_detail: Option<ClassifyDetail>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl SubmissionRecord {
    pub fn success(targeting_id: i64, company_id: i64) -> Self {
        Self {
            targeting_id,
            company_id,
            success: true,
            error_type: None,
            classify_detail: None,
            submitted_at: chrono::Utc::now(),
        }
    }

    pub fn failure(
        targeting_id: i64,
        company_id: i64,
        error_type: impl Into<String>,
        classify_detail: ClassifyDetail,
    ) -> Self {
        Self {
            targeting_id,
            company_id,
            success: false,
            error_type: Some(error_type.into()),
            classify_detail: Some(classify_detail),
            submitted_at: chrono::Utc::now(),
        }
    }

    /// A prohibition-pre-filter failure carries this distinct taxonomy
    /// (spec.md §4.2.2, seed scenario 1).
    pub fn prohibition_detected(targeting_id: i64, company_id: i64) -> Self {
        let mut detail = ClassifyDetail::default();
        detail.failure_reason = Some("prohibition_detected".to_string());
        Self {
            targeting_id,
            company_id,
            success: false,
            error_type: Some("PROHIBITION_DETECTED".to_string()),
            classify_detail: Some(detail),
            submitted_at: chrono::Utc::now(),
        }
    }
}

/// Decides whether a second row with `success=true` for the same
/// `(targeting_id, company_id)` is permitted. Per spec.md §3, this is
/// never permitted unless the retry policy explicitly allows it; the
/// default retry policy here never does (P1).
pub fn violates_unique_success(existing: &[SubmissionRecord], candidate: &SubmissionRecord) -> bool {
    if !candidate.success {
        return false;
    }
    existing.iter().any(|row| {
        row.success
            && row.targeting_id == candidate.targeting_id
            && row.company_id == candidate.company_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_success_is_detected() {
        let first = SubmissionRecord::success(1, 100);
        let second = SubmissionRecord::success(1, 100);
        assert!(violates_unique_success(&[first], &second));
    }

    #[test]
    fn distinct_targeting_ids_do_not_collide() {
        let first = SubmissionRecord::success(1, 100);
        let second = SubmissionRecord::success(2, 100);
        assert!(!violates_unique_success(&[first], &second));
    }

    #[test]
    fn failures_never_violate_uniqueness() {
        let first = SubmissionRecord::success(1, 100);
        let candidate = SubmissionRecord::failure(
            1,
            100,
            "TIMEOUT",
            ClassifyDetail::default(),
        );
        assert!(!violates_unique_success(&[first], &candidate));
    }

    #[test]
    fn prohibition_row_carries_failure_reason() {
        let row = SubmissionRecord::prohibition_detected(1, 100);
        assert!(!row.success);
        assert_eq!(row.error_type.as_deref(), Some("PROHIBITION_DETECTED"));
        assert_eq!(
            row.classify_detail.unwrap().failure_reason.as_deref(),
            Some("prohibition_detected")
        );
    }
}
