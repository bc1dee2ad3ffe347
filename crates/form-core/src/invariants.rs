use crate::contracts::FormError;

/// Shared invariant checks used by multiple subsystems.
///
/// Validation helpers return `FormError::validation` for caller-safe
/// failures and never perform I/O or mutate external state.
pub fn ensure_non_empty_trimmed(value: &str, field: &str) -> Result<(), FormError> {
    if value.trim().is_empty() {
        return Err(FormError::validation(format!(
            "'{}' cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Enforce an inclusive numeric bound with a user-safe error.
pub fn ensure_range_usize(value: usize, min: usize, max: usize, name: &str) -> Result<(), FormError> {
    if value < min || value > max {
        return Err(FormError::validation(format!(
            "'{}' must be in range {}..={}",
            name, min, max
        )));
    }
    Ok(())
}

/// Enforce an inclusive numeric bound for signed integers.
pub fn ensure_range_i64(value: i64, min: i64, max: i64, name: &str) -> Result<(), FormError> {
    if value < min || value > max {
        return Err(FormError::validation(format!(
            "'{}' must be in range {}..={}",
            name, min, max
        )));
    }
    Ok(())
}

/// Ensure an http/https absolute URL.
pub fn ensure_http_url(value: &str, field: &str) -> Result<url::Url, FormError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| FormError::validation(format!("'{}' is not a valid URL: {}", field, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FormError::validation(format!(
            "'{}' must use http or https scheme",
            field
        )));
    }
    Ok(parsed)
}

/// Reject strings containing active-content substrings (spec.md
/// §4.2.2 candidate validation).
pub fn ensure_no_active_content(value: &str, field: &str) -> Result<(), FormError> {
    let lowered = value.to_lowercase();
    for needle in ["<script", "javascript:", "data:text/html"] {
        if lowered.contains(needle) {
            return Err(FormError::validation(format!(
                "'{}' contains disallowed active-content substring '{}'",
                field, needle
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Naming scheme: inv_global_<domain>_<nnn>_<behavior>
    #[test]
    fn inv_global_core_001_rejects_empty_trimmed_string() {
        let err = ensure_non_empty_trimmed("   ", "form_url").expect_err("must fail");
        assert!(err.message.contains("form_url"));
    }

    #[test]
    fn inv_global_core_002_validates_usize_range() {
        assert!(ensure_range_usize(5, 1, 10, "workers").is_ok());
        assert!(ensure_range_usize(11, 1, 10, "workers").is_err());
    }

    #[test]
    fn inv_global_core_003_validates_http_url() {
        assert!(ensure_http_url("https://example.com/contact", "form_url").is_ok());
        assert!(ensure_http_url("ftp://example.com", "form_url").is_err());
        assert!(ensure_http_url("not a url", "form_url").is_err());
    }

    #[test]
    fn inv_global_core_004_rejects_active_content() {
        assert!(ensure_no_active_content("<script>alert(1)</script>", "message").is_err());
        assert!(ensure_no_active_content("javascript:alert(1)", "message").is_err());
        assert!(ensure_no_active_content("hello world", "message").is_ok());
    }
}
