use anyhow::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

use crate::tools::schema::SchemaViolation;

/// Fixed failure taxonomy shared by every invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolErrorType {
    NotFound,
    Unavailable,
    ValidationError,
    AuthError,
    RateLimited,
    DependencyError,
    ConfigError,
    ServerError,
}

impl ToolErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorType::NotFound => "NotFound",
            ToolErrorType::Unavailable => "Unavailable",
            ToolErrorType::ValidationError => "ValidationError",
            ToolErrorType::AuthError => "AuthError",
            ToolErrorType::RateLimited => "RateLimited",
            ToolErrorType::DependencyError => "DependencyError",
            ToolErrorType::ConfigError => "ConfigError",
            ToolErrorType::ServerError => "ServerError",
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ToolErrorType::RateLimited | ToolErrorType::ServerError)
    }

    pub fn default_remediation(&self) -> &'static str {
        match self {
            ToolErrorType::NotFound => {
                "Verify the tool name or use tool discovery to find an available tool"
            }
            ToolErrorType::Unavailable => {
                "Check the tool's health report and fix its dependencies or configuration"
            }
            ToolErrorType::ValidationError => {
                "Check parameter names and types against the tool schema"
            }
            ToolErrorType::AuthError => "Provide valid credentials for the upstream service",
            ToolErrorType::RateLimited => "Wait and retry the request with backoff",
            ToolErrorType::DependencyError => "Install the missing dependency and refresh the tool",
            ToolErrorType::ConfigError => "Fix the tool configuration and refresh the tool",
            ToolErrorType::ServerError => "Retry the operation or report the failure",
        }
    }
}

impl fmt::Display for ToolErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a tool handle can return to classify itself explicitly instead of
/// relying on message heuristics.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by upstream: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("missing dependency '{package}'")]
    MissingDependency { package: String },

    #[error("invalid tool configuration: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidArguments(#[from] SchemaViolation),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl ToolError {
    pub fn error_type(&self) -> ToolErrorType {
        match self {
            ToolError::Auth(_) => ToolErrorType::AuthError,
            ToolError::RateLimited { .. } => ToolErrorType::RateLimited,
            ToolError::MissingDependency { .. } => ToolErrorType::DependencyError,
            ToolError::Config(_) => ToolErrorType::ConfigError,
            ToolError::InvalidArguments(_) => ToolErrorType::ValidationError,
            ToolError::Upstream(_) | ToolError::Cancelled | ToolError::TimedOut(_) => {
                ToolErrorType::ServerError
            }
        }
    }
}

/// Structured failure attached to an invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub error_type: ToolErrorType,
    pub message: String,
    pub retriable: bool,
    pub remediation_hint: String,
    /// Offending field for validation failures
    pub field_path: Option<String>,
    pub original_error: Option<String>,
}

impl ToolExecutionError {
    pub fn new(tool_name: String, error_type: ToolErrorType, message: String) -> Self {
        Self {
            tool_name,
            error_type,
            message,
            retriable: error_type.is_retriable(),
            remediation_hint: error_type.default_remediation().to_string(),
            field_path: None,
            original_error: None,
        }
    }

    pub fn with_original_error(
        tool_name: String,
        error_type: ToolErrorType,
        message: String,
        original_error: String,
    ) -> Self {
        let mut error = Self::new(tool_name, error_type, message);
        error.original_error = Some(original_error);
        error
    }

    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation_hint = hint.into();
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn from_violation(tool_name: &str, violation: &SchemaViolation) -> Self {
        Self::new(
            tool_name.to_string(),
            ToolErrorType::ValidationError,
            violation.message.clone(),
        )
        .with_field_path(violation.path.clone())
    }

    /// Classify an error raised while executing `tool_name`
    pub fn from_error(tool_name: &str, error: &Error) -> Self {
        let error_type = classify_error(error);
        let mut classified = Self::with_original_error(
            tool_name.to_string(),
            error_type,
            format!("Tool execution failed: {error}"),
            format!("{error:#}"),
        );
        if let Some(ToolError::InvalidArguments(violation)) = error.downcast_ref::<ToolError>() {
            classified.field_path = Some(violation.path.clone());
        }
        if let Some(ToolError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        }) = error.downcast_ref::<ToolError>()
        {
            classified.remediation_hint = format!("Retry after {secs} seconds");
        }
        classified
    }

    /// Single-string rendering kept for callers that only understand `error: String`
    pub fn legacy_message(&self) -> String {
        format!("{}: {}", self.error_type, self.message)
    }

    pub fn to_json_value(&self) -> Value {
        json!({
            "error": self.legacy_message(),
            "error_details": {
                "type": self.error_type.as_str(),
                "message": self.message,
                "retriable": self.retriable,
                "remediation_hint": self.remediation_hint,
                "field_path": self.field_path,
                "tool_name": self.tool_name,
            }
        })
    }
}

impl fmt::Display for ToolExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.legacy_message())
    }
}

impl std::error::Error for ToolExecutionError {}

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "401",
    "403",
    "forbidden",
    "invalid api key",
    "api key",
    "authentication",
    "credential",
    "permission denied",
    "access denied",
];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "429",
    "too many requests",
    "quota exceeded",
    "throttl",
];
const DEPENDENCY_MARKERS: &[&str] = &[
    "no module named",
    "missing module",
    "missing dependency",
    "missing package",
    "not installed",
    "cannot find crate",
    "import error",
    "importerror",
];
const CONFIG_MARKERS: &[&str] = &[
    "configuration",
    "config",
    "missing setting",
    "malformed",
    "environment variable",
];
const VALIDATION_MARKERS: &[&str] = &[
    "invalid argument",
    "invalid parameter",
    "is required",
    "must be of type",
    "validation",
];

/// Map an error to the taxonomy. Typed [`ToolError`]s win; otherwise the
/// message is matched against ordered marker lists and falls through to
/// `ServerError`.
pub fn classify_error(error: &Error) -> ToolErrorType {
    if let Some(tool_error) = error.downcast_ref::<ToolError>() {
        return tool_error.error_type();
    }
    if error.downcast_ref::<SchemaViolation>().is_some() {
        return ToolErrorType::ValidationError;
    }
    classify_message(&format!("{error:#}"))
}

pub fn classify_message(message: &str) -> ToolErrorType {
    let lowered = message.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if contains_any(AUTH_MARKERS) {
        ToolErrorType::AuthError
    } else if contains_any(RATE_LIMIT_MARKERS) {
        ToolErrorType::RateLimited
    } else if contains_any(DEPENDENCY_MARKERS) {
        ToolErrorType::DependencyError
    } else if contains_any(CONFIG_MARKERS) {
        ToolErrorType::ConfigError
    } else if contains_any(VALIDATION_MARKERS) {
        ToolErrorType::ValidationError
    } else {
        ToolErrorType::ServerError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn heuristics_follow_fixed_order() {
        assert_eq!(classify_message("HTTP 401 Unauthorized"), ToolErrorType::AuthError);
        assert_eq!(
            classify_message("429 Too Many Requests"),
            ToolErrorType::RateLimited
        );
        assert_eq!(
            classify_message("No module named 'requests'"),
            ToolErrorType::DependencyError
        );
        assert_eq!(
            classify_message("malformed endpoint in tool config"),
            ToolErrorType::ConfigError
        );
        assert_eq!(classify_message("socket closed"), ToolErrorType::ServerError);
        // auth outranks rate limiting when both appear
        assert_eq!(
            classify_message("403 forbidden: rate limit exceeded"),
            ToolErrorType::AuthError
        );
    }

    #[test]
    fn typed_errors_skip_heuristics() {
        let err: Error = ToolError::Upstream("invalid api key rotation".into()).into();
        assert_eq!(classify_error(&err), ToolErrorType::ServerError);

        let err: Error = ToolError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: Some(7),
        }
        .into();
        let classified = ToolExecutionError::from_error("search", &err);
        assert_eq!(classified.error_type, ToolErrorType::RateLimited);
        assert!(classified.retriable);
        assert_eq!(classified.remediation_hint, "Retry after 7 seconds");
    }

    #[test]
    fn legacy_json_shape() {
        let error = ToolExecutionError::from_error("fetch", &anyhow!("connection reset"));
        let value = error.to_json_value();
        assert!(value["error"].as_str().unwrap_or_default().starts_with("ServerError"));
        assert_eq!(value["error_details"]["type"], "ServerError");
        assert_eq!(value["error_details"]["retriable"], true);
    }
}
