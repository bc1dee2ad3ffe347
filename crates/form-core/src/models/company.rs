use serde::{Deserialize, Serialize};

/// A company record, as spec.md §3 describes it. Created and mostly
/// owned by an upstream system; this crate only reads it and writes the
/// three outcome flags plus the paired submission history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyRecord {
    pub record_id: i64,
    pub form_url: String,
    pub company_name: Option<String>,
    #[serde(default)]
    pub form_found: bool,
    /// Legacy flag: read-only to new code (spec.md §9 Open Question).
    #[serde(default)]
    pub instruction_valid: Option<bool>,
    #[serde(default)]
    pub prohibition_detected: bool,
    #[serde(default)]
    pub bot_protection_detected: bool,
}

impl CompanyRecord {
    /// Validation applied by the orchestrator's dispatch loop before a
    /// candidate is either pre-filtered or enqueued (spec.md §4.2.2).
    pub fn validate_candidate(&self) -> Result<(), crate::contracts::FormError> {
        use crate::invariants::{ensure_http_url, ensure_no_active_content, ensure_range_i64};

        ensure_range_i64(self.record_id, 1, i64::MAX, "record_id")?;
        ensure_http_url(&self.form_url, "form_url")?;
        if self.form_url.len() > 2048 {
            return Err(crate::contracts::FormError::validation(
                "form_url exceeds maximum length of 2048",
            ));
        }
        ensure_no_active_content(&self.form_url, "form_url")?;
        if let Some(name) = &self.company_name {
            if name.len() > 512 {
                return Err(crate::contracts::FormError::validation(
                    "company_name exceeds maximum length",
                ));
            }
            ensure_no_active_content(name, "company_name")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompanyRecord {
        CompanyRecord {
            record_id: 100,
            form_url: "https://example.com/contact".to_string(),
            company_name: Some("Example Inc".to_string()),
            form_found: true,
            instruction_valid: None,
            prohibition_detected: false,
            bot_protection_detected: false,
        }
    }

    #[test]
    fn valid_candidate_passes() {
        assert!(sample().validate_candidate().is_ok());
    }

    #[test]
    fn rejects_non_positive_record_id() {
        let mut c = sample();
        c.record_id = 0;
        assert!(c.validate_candidate().is_err());
    }

    #[test]
    fn rejects_active_content_in_url() {
        let mut c = sample();
        c.form_url = "https://example.com/?x=<script>1</script>".to_string();
        assert!(c.validate_candidate().is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut c = sample();
        c.form_url = "ftp://example.com/contact".to_string();
        assert!(c.validate_candidate().is_err());
    }
}
