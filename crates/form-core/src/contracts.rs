use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard result alias used across every subsystem in this crate.
pub type FormResult<T> = Result<T, FormError>;

/// Stable, machine-readable error category. Part of the external API
/// surface that crosses the worker/dispatcher/orchestrator boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FormErrorKind {
    ValidationError,
    ConfigurationError,
    ProviderError,
    RateLimitError,
    TimeoutError,
    PermissionError,
    NotFoundError,
    InternalError,
}

/// Canonical error payload shared by the analyzer, orchestrator and
/// dispatcher.
///
/// `message` is user-safe. `retryable` tells callers (the orchestrator's
/// DB-write retry loop, the dispatcher's monitor) whether automated
/// retry is acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormError {
    pub kind: FormErrorKind,
    pub message: String,
    pub retryable: bool,
    pub details: Option<Value>,
}

impl FormError {
    pub fn new(
        kind: FormErrorKind,
        message: impl Into<String>,
        retryable: bool,
        details: Option<Value>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            details,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::ValidationError, message, false, None)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::ConfigurationError, message, false, None)
    }

    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(FormErrorKind::ProviderError, message, retryable, None)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::RateLimitError, message, true, None)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::TimeoutError, message, true, None)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::PermissionError, message, false, None)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::NotFoundError, message, false, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FormErrorKind::InternalError, message, false, None)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FormError {}

impl From<std::io::Error> for FormError {
    fn from(value: std::io::Error) -> Self {
        FormError::internal(value.to_string())
    }
}

impl From<serde_json::Error> for FormError {
    fn from(value: serde_json::Error) -> Self {
        FormError::validation(value.to_string())
    }
}
