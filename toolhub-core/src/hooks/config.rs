//! Hook document loading
//!
//! A hook document is YAML or JSON (chosen by file extension) with global
//! `settings` and a list of `rules`.

use anyhow::{Context, Result, bail};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::config::constants::{hooks, tool_types};

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    hooks::DEFAULT_TIMEOUT_SECS
}

fn default_max_recursion_depth() -> usize {
    hooks::DEFAULT_MAX_RECURSION_DEPTH
}

fn default_tool_patterns() -> Vec<String> {
    vec![tool_types::WILDCARD_ALL.to_string()]
}

/// Glob match against a tool name. Invalid patterns never match.
pub(crate) fn pattern_matches(pattern: &str, tool_name: &str) -> bool {
    if pattern == tool_types::WILDCARD_ALL {
        return true;
    }
    Pattern::new(pattern)
        .map(|compiled| compiled.matches(tool_name))
        .unwrap_or(false)
}

/// Order in which enabled rules are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Highest priority first, declaration order among equals
    #[default]
    Priority,
    Declaration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSettings {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Composer calls nested deeper than this are not post-processed
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,

    #[serde(default)]
    pub execution_order: ExecutionOrder,

    /// Tools whose results are never post-processed
    #[serde(default)]
    pub exclude_tools: Vec<String>,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_recursion_depth: default_max_recursion_depth(),
            execution_order: ExecutionOrder::default(),
            exclude_tools: Vec::new(),
        }
    }
}

/// What happens to a result when a rule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// The composer output becomes the result
    #[default]
    Replace,
    /// The composer output is attached to the result under `_hook`
    Annotate,
}

/// All set conditions must hold for a rule to fire. No conditions always fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConditions {
    /// Serialized result length strictly above this
    #[serde(default)]
    pub min_output_length: Option<usize>,

    /// Serialized result length at or below this
    #[serde(default)]
    pub max_output_length: Option<usize>,

    /// Top-level keys the result object must carry
    #[serde(default)]
    pub contains_keys: Vec<String>,

    /// Substring the serialized result must contain
    #[serde(default)]
    pub output_contains: Option<String>,
}

impl TriggerConditions {
    pub fn matches(&self, value: &Value) -> bool {
        let serialized = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let length = serialized.chars().count();

        if let Some(min) = self.min_output_length
            && length <= min
        {
            return false;
        }
        if let Some(max) = self.max_output_length
            && length > max
        {
            return false;
        }
        if !self.contains_keys.is_empty() {
            let Some(object) = value.as_object() else {
                return false;
            };
            if !self.contains_keys.iter().all(|key| object.contains_key(key)) {
                return false;
            }
        }
        if let Some(needle) = &self.output_contains
            && !serialized.contains(needle.as_str())
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRule {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: HookKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub trigger_conditions: TriggerConditions,

    /// Tool invoked to post-process a matching result
    pub composer_tool: String,

    /// Extra arguments passed to the composer
    #[serde(default)]
    pub arguments: Map<String, Value>,

    #[serde(default = "default_tool_patterns")]
    pub tool_patterns: Vec<String>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl HookRule {
    pub fn new(name: impl Into<String>, composer_tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HookKind::default(),
            enabled: true,
            priority: 0,
            trigger_conditions: TriggerConditions::default(),
            composer_tool: composer_tool.into(),
            arguments: Map::new(),
            tool_patterns: default_tool_patterns(),
            exclude_patterns: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_kind(mut self, kind: HookKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conditions(mut self, conditions: TriggerConditions) -> Self {
        self.trigger_conditions = conditions;
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn with_tool_patterns(mut self, patterns: Vec<String>) -> Self {
        self.tool_patterns = patterns;
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this rule targets `tool_name` at all
    pub fn applies_to(&self, tool_name: &str) -> bool {
        if tool_name == self.composer_tool {
            return false;
        }
        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, tool_name))
        {
            return false;
        }
        self.tool_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, tool_name))
    }

    pub fn timeout(&self, settings: &HookSettings) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(settings.default_timeout_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub settings: HookSettings,

    #[serde(default)]
    pub rules: Vec<HookRule>,
}

impl HookConfig {
    pub fn new(rules: Vec<HookRule>) -> Self {
        Self {
            settings: HookSettings::default(),
            rules,
        }
    }

    pub fn with_settings(mut self, settings: HookSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load a YAML (`.yaml`/`.yml`) or JSON hook document
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hook config {}", path.display()))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse hook config {}", path.display()))?,
            _ => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse hook config {}", path.display()))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.composer_tool.trim().is_empty() {
                bail!("hook rule '{}' has no composer_tool", rule.name);
            }
            if !names.insert(rule.name.as_str()) {
                bail!("duplicate hook rule name '{}'", rule.name);
            }
        }
        Ok(())
    }

    /// Names of every composer tool referenced by a rule
    pub fn composer_tools(&self) -> HashSet<String> {
        self.rules
            .iter()
            .map(|rule| rule.composer_tool.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn loads_yaml_document() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("hooks.yaml");
        std::fs::write(
            &path,
            r#"
settings:
  default_timeout_secs: 5
  execution_order: declaration
  exclude_tools: ["internal_*"]
rules:
  - name: summarize_long
    type: replace
    priority: 10
    composer_tool: summarizer
    trigger_conditions:
      min_output_length: 2000
  - name: tag_results
    type: annotate
    enabled: false
    composer_tool: tagger
"#,
        )?;

        let config = HookConfig::load(&path)?;
        assert_eq!(config.settings.default_timeout_secs, 5);
        assert_eq!(config.settings.max_recursion_depth, 1);
        assert_eq!(config.settings.execution_order, ExecutionOrder::Declaration);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].trigger_conditions.min_output_length, Some(2000));
        assert_eq!(config.rules[0].tool_patterns, vec!["*"]);
        assert_eq!(config.rules[1].kind, HookKind::Annotate);
        assert!(!config.rules[1].enabled);
        Ok(())
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let config = HookConfig::new(vec![HookRule::new("a", "x"), HookRule::new("a", "y")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn trigger_conditions_combine() {
        let conditions = TriggerConditions {
            min_output_length: Some(15),
            contains_keys: vec!["items".into()],
            ..TriggerConditions::default()
        };
        assert!(conditions.matches(&json!({"items": [1, 2, 3, 4, 5]})));
        assert!(!conditions.matches(&json!({"items": []})));
        assert!(!conditions.matches(&json!("a long string without keys")));
        assert!(TriggerConditions::default().matches(&json!(null)));
    }

    #[test]
    fn rule_never_targets_its_composer() {
        let rule = HookRule::new("sum", "summarizer")
            .with_exclude_patterns(vec!["secret_*".into()]);
        assert!(rule.applies_to("web_search"));
        assert!(!rule.applies_to("summarizer"));
        assert!(!rule.applies_to("secret_vault"));
    }
}
