//! Candidate selection (spec.md §4.2.5): business-hour/quota gating,
//! `targeting_sql` validation, and the two-phase priority fetch.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::contracts::{FormError, FormResult};
use crate::models::{CompanyRecord, SubmissionRecord};
use crate::utils::jst::{jst_minute_of_day, jst_weekday, now_jst};

pub const MAX_ELAPSED_HOURS: i64 = 5;
pub const MAX_DAILY_SENDS_UPPER_BOUND: u32 = 50_000;

#[derive(Debug, Clone)]
pub struct GatingPolicy {
    pub send_days_of_week: Vec<chrono::Weekday>,
    pub send_start_minute: u32,
    pub send_end_minute: u32,
    pub max_daily_sends: u32,
}

impl GatingPolicy {
    pub fn validate(&self) -> FormResult<()> {
        if self.max_daily_sends == 0 || self.max_daily_sends > MAX_DAILY_SENDS_UPPER_BOUND {
            return Err(FormError::validation(format!(
                "max_daily_sends must be in (0, {MAX_DAILY_SENDS_UPPER_BOUND}]"
            )));
        }
        Ok(())
    }
}

/// Business-hour and daily-quota gating: a hard precondition for
/// dispatching (spec.md §4.2.5).
pub fn may_dispatch(
    policy: &GatingPolicy,
    started_at: DateTime<Utc>,
    successes_today: u32,
) -> bool {
    let elapsed = Utc::now() - started_at;
    if elapsed.num_hours() >= MAX_ELAPSED_HOURS {
        return false;
    }
    let now = now_jst();
    if !policy.send_days_of_week.contains(&jst_weekday(now)) {
        return false;
    }
    // Inclusive at both ends: `original_source`'s
    // `is_within_business_hours` checks
    // `start_time_minutes <= current_time_minutes <= end_time_minutes`,
    // so a candidate landing exactly on send_start_minute or
    // send_end_minute still dispatches.
    let minute = jst_minute_of_day(now);
    if minute < policy.send_start_minute || minute > policy.send_end_minute {
        return false;
    }
    successes_today < policy.max_daily_sends
}

static SQL_INJECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(DROP|DELETE|UPDATE|INSERT|CREATE|ALTER|EXEC|EXECUTE|UNION|SCRIPT|DECLARE|TRUNCATE|GRANT|REVOKE|SET|RESET)\b|--|;|/\*|\*/|'\s*OR\s*'|\"\s*OR\s*\"|1\s*=\s*1|OR\s+1|OR\s+TRUE",
    )
    .unwrap()
});

/// Pre-validates the `targeting_sql` fragment before it ever reaches
/// the database-side RPC (spec.md §4.2.5).
pub fn validate_targeting_sql(fragment: &str) -> FormResult<()> {
    if fragment.len() > 2000 {
        return Err(FormError::validation("targeting_sql exceeds 2000 characters"));
    }
    if SQL_INJECTION_RE.is_match(fragment) {
        return Err(FormError::validation("targeting_sql contains a disallowed token"));
    }
    Ok(())
}

pub fn validate_ng_companies(ng_companies: &str) -> FormResult<()> {
    if ng_companies.len() > 500 {
        return Err(FormError::validation("ng_companies exceeds 500 characters"));
    }
    Ok(())
}

/// Two-phase priority: prefer companies with no prior submission;
/// only if insufficient, fall back to companies whose prior
/// submissions are all failures (spec.md §4.2.5).
pub fn prioritize(
    candidates: Vec<CompanyRecord>,
    history: &[SubmissionRecord],
    needed: usize,
) -> Vec<CompanyRecord> {
    let has_history = |company_id: i64| history.iter().any(|r| r.company_id == company_id);
    let all_failures = |company_id: i64| {
        history
            .iter()
            .filter(|r| r.company_id == company_id)
            .all(|r| !r.success)
    };

    let mut fresh: Vec<CompanyRecord> = candidates
        .iter()
        .filter(|c| !has_history(c.record_id))
        .cloned()
        .collect();
    if fresh.len() >= needed {
        fresh.truncate(needed);
        return fresh;
    }

    let mut retryable: Vec<CompanyRecord> = candidates
        .into_iter()
        .filter(|c| has_history(c.record_id) && all_failures(c.record_id))
        .collect();
    let remaining = needed - fresh.len();
    retryable.truncate(remaining);
    fresh.extend(retryable);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sql_injection_tokens() {
        assert!(validate_targeting_sql("status = 'active'; DROP TABLE companies").is_err());
        assert!(validate_targeting_sql("status = 'active' OR 1=1").is_err());
        assert!(validate_targeting_sql("status = 'active' AND region = 'kanto'").is_ok());
    }

    #[test]
    fn rejects_overlong_targeting_sql() {
        let long = "a".repeat(2001);
        assert!(validate_targeting_sql(&long).is_err());
    }

    #[test]
    fn two_phase_priority_prefers_fresh_companies() {
        let candidates = vec![
            CompanyRecord { record_id: 1, form_url: "https://a.com".into(), company_name: None, form_found: true, instruction_valid: None, prohibition_detected: false, bot_protection_detected: false },
            CompanyRecord { record_id: 2, form_url: "https://b.com".into(), company_name: None, form_found: true, instruction_valid: None, prohibition_detected: false, bot_protection_detected: false },
        ];
        let history = vec![SubmissionRecord::success(1, 1)];
        let prioritized = prioritize(candidates, &history, 1);
        assert_eq!(prioritized[0].record_id, 2);
    }

    #[test]
    fn companies_with_any_success_are_never_retried() {
        let candidates = vec![CompanyRecord {
            record_id: 1,
            form_url: "https://a.com".into(),
            company_name: None,
            form_found: true,
            instruction_valid: None,
            prohibition_detected: false,
            bot_protection_detected: false,
        }];
        let history = vec![SubmissionRecord::success(1, 1)];
        let prioritized = prioritize(candidates, &history, 5);
        assert!(prioritized.is_empty());
    }
}
