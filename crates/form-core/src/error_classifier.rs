//! Pure error classification (spec.md §7). `classify_error` and
//! `classify_detail` take only their arguments and are deterministic
//! (P8): no I/O, no shared state, no randomness.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The coarse error-type code taxonomy (spec.md §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorTypeCode {
    Timeout,
    Access,
    DnsError,
    TlsError,
    RateLimit,
    WafChallenge,
    BotDetected,
    CsrfError,
    DuplicateSubmission,
    Mapping,
    ValidationFormat,
    FormValidationError,
    SubmitButtonNotFound,
    SubmitButtonSelectorMissing,
    SuccessDeterminationFailed,
    ContentAnalysisFailed,
    ElementNotFound,
    ElementNotInteractable,
    InputTypeMismatch,
    Instruction,
    System,
    External,
    Submit,
}

impl ErrorTypeCode {
    pub fn as_str(self) -> &'static str {
        use ErrorTypeCode::*;
        match self {
            Timeout => "TIMEOUT",
            Access => "ACCESS",
            DnsError => "DNS_ERROR",
            TlsError => "TLS_ERROR",
            RateLimit => "RATE_LIMIT",
            WafChallenge => "WAF_CHALLENGE",
            BotDetected => "BOT_DETECTED",
            CsrfError => "CSRF_ERROR",
            DuplicateSubmission => "DUPLICATE_SUBMISSION",
            Mapping => "MAPPING",
            ValidationFormat => "VALIDATION_FORMAT",
            FormValidationError => "FORM_VALIDATION_ERROR",
            SubmitButtonNotFound => "SUBMIT_BUTTON_NOT_FOUND",
            SubmitButtonSelectorMissing => "SUBMIT_BUTTON_SELECTOR_MISSING",
            SuccessDeterminationFailed => "SUCCESS_DETERMINATION_FAILED",
            ContentAnalysisFailed => "CONTENT_ANALYSIS_FAILED",
            ElementNotFound => "ELEMENT_NOT_FOUND",
            ElementNotInteractable => "ELEMENT_NOT_INTERACTABLE",
            InputTypeMismatch => "INPUT_TYPE_MISMATCH",
            Instruction => "INSTRUCTION",
            System => "SYSTEM",
            External => "EXTERNAL",
            Submit => "SUBMIT",
        }
    }
}

/// Structured detail returned alongside the coarse code (spec.md §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifyDetail {
    pub code: Option<String>,
    pub category: Option<String>,
    pub retryable: bool,
    pub confidence: f64,
    /// Set only for the prohibition pre-filter path (spec.md seed
    /// scenario 1); not part of the spec's formal classify_detail shape
    /// but carried through so `SubmissionRecord` has one place to read
    /// it from.
    pub failure_reason: Option<String>,
}

struct ClassifyInput<'a> {
    error_message: &'a str,
    http_status: Option<u16>,
    page_content: Option<&'a str>,
    submit_selector: Option<&'a str>,
}

static RATE_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)throttled|rate limit|too many requests").unwrap());
static WAF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)cloudflare|akamai|checking your browser|access denied").unwrap());
static BOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:recaptcha|hcaptcha|bot[\s_-]?detect|私はロボットではありません)\b").unwrap());
static DNS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"net::err_name_not_resolved").unwrap());
static TLS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)certificate_verify_failed").unwrap());
static TIMEOUT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)timeout|timed out").unwrap());
static CSRF_NEAR_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(csrf|xsrf|forgery|authenticity).{0,80}(invalid|mismatch|expired|missing|required|failed|error)")
        .unwrap()
});
static CSRF_NEAR_ERROR_JA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(csrf|ワンタイム(?:キー|トークン)|トークン).{0,80}(無効|不一致|期限|切れ|エラー)").unwrap()
});
static DUPLICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)重複|既に(送信|登録)|duplicate|already submitted").unwrap()
});
static REQUIRED_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"未入力|入力してください|入力されていません|必須項目|必須です|選択してください|field is required|required field|(?i)please (enter|select|fill)",
    )
    .unwrap()
});
static FORMAT_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)形式が正しくありません|invalid format|invalid (email|phone|url)").unwrap()
});
static SUBMIT_NOT_FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)submit[\s\w]*button[\s\w]*not[\s\w]*found").unwrap());
static ELEMENT_NOT_FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(element|selector|locator)[\s\w]*not[\s\w]*found").unwrap());
static INPUT_TYPE_MISMATCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)input[\s\w]*type[\s\w]*mismatch|cannot (type into|fill) (input|field)").unwrap());

/// The coarse classifier (spec.md §7 "Classification rules (ordered)").
pub fn classify_error(
    error_message: &str,
    http_status: Option<u16>,
    page_content: Option<&str>,
    submit_selector: Option<&str>,
) -> ErrorTypeCode {
    let input = ClassifyInput {
        error_message,
        http_status,
        page_content,
        submit_selector,
    };
    classify_ordered(&input)
}

fn classify_ordered(input: &ClassifyInput<'_>) -> ErrorTypeCode {
    let msg = input.error_message;

    // 1. rate limit.
    if matches!(input.http_status, Some(429)) || RATE_LIMIT_RE.is_match(msg) {
        return ErrorTypeCode::RateLimit;
    }
    // 2. WAF challenge.
    let is_waf_status = matches!(input.http_status, Some(403) | Some(503));
    if WAF_RE.is_match(msg) && is_waf_status {
        return ErrorTypeCode::WafChallenge;
    }
    // 3. bot wall.
    if BOT_RE.is_match(msg) || input.page_content.map(|c| BOT_RE.is_match(c)).unwrap_or(false) {
        return ErrorTypeCode::BotDetected;
    }
    // 4. DNS / TLS.
    if DNS_RE.is_match(msg) {
        return ErrorTypeCode::DnsError;
    }
    if TLS_RE.is_match(msg) {
        return ErrorTypeCode::TlsError;
    }
    // 5. timeout.
    if TIMEOUT_RE.is_match(msg) {
        return ErrorTypeCode::Timeout;
    }
    // 6. CSRF proximity rule.
    if CSRF_NEAR_ERROR_RE.is_match(msg) || CSRF_NEAR_ERROR_JA_RE.is_match(msg) {
        return ErrorTypeCode::CsrfError;
    }
    // 7. duplicate submission.
    if DUPLICATE_RE.is_match(msg) {
        return ErrorTypeCode::DuplicateSubmission;
    }
    // 8. required/unfilled messages in page content.
    if let Some(content) = input.page_content {
        if REQUIRED_TEXT_RE.is_match(content) {
            return ErrorTypeCode::Mapping;
        }
    }
    if REQUIRED_TEXT_RE.is_match(msg) {
        return ErrorTypeCode::Mapping;
    }
    // 9. format errors.
    if FORMAT_TEXT_RE.is_match(msg)
        || input
            .page_content
            .map(|c| FORMAT_TEXT_RE.is_match(c))
            .unwrap_or(false)
    {
        return ErrorTypeCode::ValidationFormat;
    }
    // 10. submit-button related.
    if SUBMIT_NOT_FOUND_RE.is_match(msg) {
        return ErrorTypeCode::SubmitButtonNotFound;
    }
    if input.submit_selector.map(|s| s.is_empty()).unwrap_or(false) && msg.to_lowercase().contains("submit") {
        return ErrorTypeCode::SubmitButtonSelectorMissing;
    }
    // 11. element not found.
    if ELEMENT_NOT_FOUND_RE.is_match(msg) {
        return ErrorTypeCode::ElementNotFound;
    }
    // 12. input type mismatch.
    if INPUT_TYPE_MISMATCH_RE.is_match(msg) {
        return ErrorTypeCode::InputTypeMismatch;
    }

    // 13. special case: empty submit selector + page-content evidence.
    if input.submit_selector.map(|s| s.is_empty()).unwrap_or(false) {
        if let Some(content) = input.page_content {
            if REQUIRED_TEXT_RE.is_match(content) {
                return ErrorTypeCode::Mapping;
            }
            if FORMAT_TEXT_RE.is_match(content) {
                return ErrorTypeCode::ValidationFormat;
            }
        }
    }

    classify_fallback(msg)
}

fn classify_fallback(msg: &str) -> ErrorTypeCode {
    let lowered = msg.to_lowercase();
    if lowered.contains("submit") {
        ErrorTypeCode::Submit
    } else if lowered.contains("access") || lowered.contains("forbidden") || lowered.contains("denied") {
        ErrorTypeCode::Access
    } else {
        ErrorTypeCode::System
    }
}

/// Returns `{code, category, retryable, confidence}` (spec.md §7).
pub fn classify_detail(
    error_message: &str,
    http_status: Option<u16>,
    page_content: Option<&str>,
    submit_selector: Option<&str>,
) -> ClassifyDetail {
    let code = classify_error(error_message, http_status, page_content, submit_selector);
    let (category, retryable, confidence) = category_for(code);
    ClassifyDetail {
        code: Some(code.as_str().to_string()),
        category: Some(category.to_string()),
        retryable,
        confidence,
        failure_reason: None,
    }
}

/// The outcome of a submit click, read off the post-submit page
/// content. `SUCCESS_DETERMINATION_FAILED` (spec.md §7) covers the
/// case where neither a success nor a validation-failure signal is
/// found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Success,
    Failed,
    Undetermined,
}

static THANKS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ありがとうございました|送信が完了|送信完了|受け付けました|お問い合わせいただき|thank you|thanks for|successfully submitted|submission (received|complete)",
    )
    .unwrap()
});

/// Reads the page the browser lands on after clicking submit and
/// decides whether the attempt succeeded, failed validation, or is
/// ambiguous (spec.md §7, `SUCCESS_DETERMINATION_FAILED`). Checked in
/// this order: a validation-failure signal (required/format text)
/// wins over a thank-you signal, since some forms re-render the thank
/// you copy's container before the validation error is injected.
pub fn determine_submission_outcome(page_content: &str) -> SubmissionOutcome {
    if REQUIRED_TEXT_RE.is_match(page_content) || FORMAT_TEXT_RE.is_match(page_content) {
        return SubmissionOutcome::Failed;
    }
    if THANKS_RE.is_match(page_content) {
        return SubmissionOutcome::Success;
    }
    SubmissionOutcome::Undetermined
}

fn category_for(code: ErrorTypeCode) -> (&'static str, bool, f64) {
    use ErrorTypeCode::*;
    match code {
        RateLimit | WafChallenge | Timeout | DnsError | TlsError | External => {
            ("transient", true, 0.8)
        }
        BotDetected => ("blocked", false, 0.9),
        CsrfError | DuplicateSubmission => ("transient", true, 0.7),
        Mapping | ValidationFormat | FormValidationError | SubmitButtonNotFound
        | SubmitButtonSelectorMissing | ElementNotFound | ElementNotInteractable
        | InputTypeMismatch | SuccessDeterminationFailed | ContentAnalysisFailed => {
            ("instruction_defect", false, 0.75)
        }
        Instruction => ("instruction_defect", false, 0.6),
        Access => ("blocked", false, 0.6),
        System | Submit => ("unknown", false, 0.4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_is_pure_and_deterministic() {
        let a = classify_error("CSRF token mismatch or invalid", None, None, None);
        let b = classify_error("CSRF token mismatch or invalid", None, None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn seed_10_required_text_with_empty_selector() {
        let code = classify_error("", None, Some("必須項目を入力してください"), Some(""));
        assert_eq!(code, ErrorTypeCode::Mapping);
    }

    #[test]
    fn seed_11_csrf_proximity_rule() {
        assert_eq!(
            classify_error("CSRF token mismatch or invalid", None, None, None),
            ErrorTypeCode::CsrfError
        );
        assert_ne!(
            classify_error("token refresh failed", None, None, None),
            ErrorTypeCode::CsrfError
        );
    }

    #[test]
    fn rate_limit_on_429_status() {
        assert_eq!(
            classify_error("server error", Some(429), None, None),
            ErrorTypeCode::RateLimit
        );
    }

    #[test]
    fn dns_and_tls_errors() {
        assert_eq!(
            classify_error("net::ERR_NAME_NOT_RESOLVED", None, None, None),
            ErrorTypeCode::DnsError
        );
        assert_eq!(
            classify_error("CERTIFICATE_VERIFY_FAILED: self signed cert", None, None, None),
            ErrorTypeCode::TlsError
        );
    }

    #[test]
    fn duplicate_submission_japanese_and_english() {
        assert_eq!(
            classify_error("既に送信済みです", None, None, None),
            ErrorTypeCode::DuplicateSubmission
        );
        assert_eq!(
            classify_error("duplicate request", None, None, None),
            ErrorTypeCode::DuplicateSubmission
        );
    }

    #[test]
    fn format_errors_are_distinguished_from_required() {
        assert_eq!(
            classify_error("invalid email format", None, None, None),
            ErrorTypeCode::ValidationFormat
        );
    }

    #[test]
    fn fallback_buckets_cover_remaining_cases() {
        assert_eq!(
            classify_error("could not submit the request", None, None, None),
            ErrorTypeCode::Submit
        );
        assert_eq!(
            classify_error("access denied by host", None, None, None),
            ErrorTypeCode::Access
        );
        assert_eq!(
            classify_error("an unexpected failure occurred", None, None, None),
            ErrorTypeCode::System
        );
    }

    #[test]
    fn classify_detail_reports_confidence_and_retryable() {
        let detail = classify_detail("request timed out", None, None, None);
        assert_eq!(detail.code.as_deref(), Some("TIMEOUT"));
        assert!(detail.retryable);
        assert!(detail.confidence > 0.0);
    }

    #[test]
    fn submission_outcome_prefers_validation_failure_over_thank_you() {
        let content = "送信完了 ただしメールアドレスは必須項目を入力してください";
        assert_eq!(determine_submission_outcome(content), SubmissionOutcome::Failed);
    }

    #[test]
    fn submission_outcome_recognizes_thank_you_page() {
        assert_eq!(
            determine_submission_outcome("Thank you for your inquiry, we will respond soon."),
            SubmissionOutcome::Success
        );
    }

    #[test]
    fn submission_outcome_undetermined_without_signal() {
        assert_eq!(determine_submission_outcome("Welcome to our company website."), SubmissionOutcome::Undetermined);
    }
}
