use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::{ToolError, ToolErrorType, classify_error};

static MISSING_PACKAGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:no module named|missing module|missing (?:package|dependency|crate)|cannot find crate|not installed:)\s*:?\s*['"`]?([A-Za-z0-9_.\-]+)"#,
    )
    .ok()
});

/// Pull the missing package token out of an import-style failure message
pub fn extract_missing_dependency(message: &str) -> Option<String> {
    let regex = MISSING_PACKAGE.as_ref()?;
    regex
        .captures(message)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().trim_end_matches('.').to_string())
        .filter(|token| !token.is_empty())
}

/// Why a tool could not be constructed. Kept until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub tool_name: String,
    pub error_message: String,
    pub error_kind: ToolErrorType,
    pub originating_module: String,
    pub missing_dependency: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_error(
        tool_name: impl Into<String>,
        error: &anyhow::Error,
        originating_module: impl Into<String>,
    ) -> Self {
        let error_message = format!("{error:#}");
        let missing_dependency = match error.downcast_ref::<ToolError>() {
            Some(ToolError::MissingDependency { package }) => Some(package.clone()),
            _ => extract_missing_dependency(&error_message),
        };
        let error_kind = if missing_dependency.is_some() {
            ToolErrorType::DependencyError
        } else {
            match classify_error(error) {
                // anything unclassified at construction time is a broken setup
                ToolErrorType::ServerError => ToolErrorType::ConfigError,
                kind => kind,
            }
        };

        Self {
            tool_name: tool_name.into(),
            error_message,
            error_kind,
            originating_module: originating_module.into(),
            missing_dependency,
            recorded_at: Utc::now(),
        }
    }

    pub fn remediation_hint(&self) -> String {
        match (&self.missing_dependency, self.error_kind) {
            (Some(package), _) => format!(
                "Install the missing dependency '{package}' and clear the failure for '{}'",
                self.tool_name
            ),
            (None, ToolErrorType::AuthError) => format!(
                "Configure credentials for '{}' and clear its failure record",
                self.tool_name
            ),
            (None, _) => format!(
                "Fix the configuration of '{}' ({}) and clear its failure record",
                self.tool_name, self.originating_module
            ),
        }
    }
}

/// Availability of a single tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolHealth {
    Available,
    Unavailable(FailureRecord),
    /// Not present in the catalog
    Unknown,
}

/// Aggregate availability over the whole catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub available: usize,
    pub unavailable: Vec<String>,
    pub failures: BTreeMap<String, FailureRecord>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.unavailable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn extracts_package_tokens() {
        assert_eq!(
            extract_missing_dependency("missing module 'foo'").as_deref(),
            Some("foo")
        );
        assert_eq!(
            extract_missing_dependency("ImportError: No module named google.cloud").as_deref(),
            Some("google.cloud")
        );
        assert_eq!(extract_missing_dependency("connection refused"), None);
    }

    #[test]
    fn import_failures_become_dependency_errors() {
        let record = FailureRecord::from_error("B", &anyhow!("missing module 'foo'"), "plugins");
        assert_eq!(record.error_kind, ToolErrorType::DependencyError);
        assert_eq!(record.missing_dependency.as_deref(), Some("foo"));
        assert!(record.remediation_hint().contains("foo"));
    }

    #[test]
    fn generic_failures_become_config_errors() {
        let record = FailureRecord::from_error("C", &anyhow!("endpoint is empty"), "http_request");
        assert_eq!(record.error_kind, ToolErrorType::ConfigError);
        assert!(record.missing_dependency.is_none());
    }
}
