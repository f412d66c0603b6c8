use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::{ExecutionOrder, HookConfig, HookKind, HookRule, pattern_matches};
use crate::config::HooksConfig;
use crate::config::constants::execution::HOOK_ANNOTATION_KEY;
use crate::tools::registry::ToolExecutionError;

/// Context a composer call inherits from the invocation it post-processes
#[derive(Debug, Clone, Default)]
pub struct HookCall {
    /// Composer nesting level of the invocation being processed
    pub depth: usize,
    pub cancellation: CancellationToken,
    pub timeout: Option<Duration>,
}

/// Runs a composer tool on behalf of the hook manager. The implementation
/// must invoke the composer with hooks disabled.
#[async_trait]
pub trait ComposerInvoker: Send + Sync {
    async fn invoke_composer(
        &self,
        composer: &str,
        arguments: Value,
        call: HookCall,
    ) -> Result<Value, ToolExecutionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub value: Value,
    /// Name of the rule that fired, if any
    pub applied_rule: Option<String>,
}

impl HookOutcome {
    fn unchanged(value: Value) -> Self {
        Self {
            value,
            applied_rule: None,
        }
    }
}

pub struct HookManager {
    config: HookConfig,
    composers: HashSet<String>,
    enabled: bool,
}

impl HookManager {
    pub fn new(config: HookConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let composers = config.composer_tools();
        Ok(Self {
            config,
            composers,
            enabled: true,
        })
    }

    pub fn disabled() -> Self {
        Self {
            config: HookConfig::default(),
            composers: HashSet::new(),
            enabled: false,
        }
    }

    /// Build from the `[hooks]` section. No document means no rules.
    pub fn from_config(hooks: &HooksConfig) -> anyhow::Result<Self> {
        if !hooks.enabled {
            return Ok(Self::disabled());
        }
        match &hooks.config_path {
            Some(path) if path.exists() => Self::new(HookConfig::load(path)?),
            Some(path) => {
                warn!(path = %path.display(), "hook config not found; hooks inactive");
                Self::new(HookConfig::default())
            }
            None => Self::new(HookConfig::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn is_composer(&self, tool_name: &str) -> bool {
        self.composers.contains(tool_name)
    }

    pub fn is_excluded(&self, tool_name: &str) -> bool {
        self.config
            .settings
            .exclude_tools
            .iter()
            .any(|pattern| pattern_matches(pattern, tool_name))
    }

    /// Enabled rules in evaluation order
    pub fn ordered_rules(&self) -> Vec<&HookRule> {
        let mut rules: Vec<&HookRule> = self.config.rules.iter().filter(|r| r.enabled).collect();
        if self.config.settings.execution_order == ExecutionOrder::Priority {
            // stable sort keeps declaration order among equal priorities
            rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        rules
    }

    /// The rule that would fire for this result, if any
    pub fn matching_rule(&self, tool_name: &str, value: &Value) -> Option<&HookRule> {
        if !self.enabled || self.is_excluded(tool_name) || self.is_composer(tool_name) {
            return None;
        }
        self.ordered_rules()
            .into_iter()
            .find(|rule| rule.applies_to(tool_name) && rule.trigger_conditions.matches(value))
    }

    /// Post-process a successful result. At most one rule fires; a failing
    /// composer leaves the result untouched.
    pub async fn process(
        &self,
        tool_name: &str,
        value: Value,
        invoker: &dyn ComposerInvoker,
        call: HookCall,
    ) -> HookOutcome {
        if call.depth >= self.config.settings.max_recursion_depth {
            debug!(tool = %tool_name, depth = call.depth, "hook recursion limit reached");
            return HookOutcome::unchanged(value);
        }
        let Some(rule) = self.matching_rule(tool_name, &value) else {
            return HookOutcome::unchanged(value);
        };

        let mut arguments = rule.arguments.clone();
        arguments.insert("tool_name".to_string(), Value::String(tool_name.to_string()));
        arguments.insert("content".to_string(), value.clone());

        let rule_timeout = rule.timeout(&self.config.settings);
        let composer_call = HookCall {
            depth: call.depth + 1,
            cancellation: call.cancellation.clone(),
            timeout: Some(call.timeout.map_or(rule_timeout, |t| t.min(rule_timeout))),
        };

        debug!(tool = %tool_name, rule = %rule.name, composer = %rule.composer_tool, "hook rule fired");
        match invoker
            .invoke_composer(&rule.composer_tool, Value::Object(arguments), composer_call)
            .await
        {
            Ok(output) => HookOutcome {
                value: apply(rule, value, output),
                applied_rule: Some(rule.name.clone()),
            },
            Err(err) => {
                warn!(
                    tool = %tool_name,
                    rule = %rule.name,
                    composer = %rule.composer_tool,
                    error = %err,
                    "hook composer failed; returning original result"
                );
                HookOutcome::unchanged(value)
            }
        }
    }
}

fn apply(rule: &HookRule, original: Value, output: Value) -> Value {
    match rule.kind {
        HookKind::Replace => output,
        HookKind::Annotate => {
            let annotation = json!({ "rule": rule.name, "output": output });
            match original {
                Value::Object(mut object) => {
                    object.insert(HOOK_ANNOTATION_KEY.to_string(), annotation);
                    Value::Object(object)
                }
                other => json!({ "result": other, HOOK_ANNOTATION_KEY: annotation }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::{HookSettings, TriggerConditions};
    use crate::tools::registry::ToolErrorType;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(String, Value, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl ComposerInvoker for RecordingInvoker {
        async fn invoke_composer(
            &self,
            composer: &str,
            arguments: Value,
            call: HookCall,
        ) -> Result<Value, ToolExecutionError> {
            self.calls
                .lock()
                .push((composer.to_string(), arguments.clone(), call.depth));
            if self.fail {
                return Err(ToolExecutionError::new(
                    composer.to_string(),
                    ToolErrorType::ServerError,
                    "composer down".into(),
                ));
            }
            Ok(json!({ "summary": format!("from {composer}") }))
        }
    }

    fn long_output() -> TriggerConditions {
        TriggerConditions {
            min_output_length: Some(20),
            ..TriggerConditions::default()
        }
    }

    #[tokio::test]
    async fn highest_priority_rule_fires_once() -> anyhow::Result<()> {
        let manager = HookManager::new(HookConfig::new(vec![
            HookRule::new("low", "tagger").with_conditions(long_output()),
            HookRule::new("high", "summarizer")
                .with_priority(5)
                .with_conditions(long_output()),
        ]))?;
        let invoker = RecordingInvoker::default();

        let outcome = manager
            .process("web_search", json!("x".repeat(40)), &invoker, HookCall::default())
            .await;
        assert_eq!(outcome.applied_rule.as_deref(), Some("high"));
        assert_eq!(outcome.value, json!({"summary": "from summarizer"}));

        let calls = invoker.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["tool_name"], "web_search");
        assert_eq!(calls[0].2, 1);
        Ok(())
    }

    #[tokio::test]
    async fn declaration_order_ignores_priority() -> anyhow::Result<()> {
        let config = HookConfig::new(vec![
            HookRule::new("first", "tagger"),
            HookRule::new("second", "summarizer").with_priority(9),
        ])
        .with_settings(HookSettings {
            execution_order: ExecutionOrder::Declaration,
            ..HookSettings::default()
        });
        let manager = HookManager::new(config)?;
        let rule = manager.matching_rule("any", &json!(1)).expect("rule");
        assert_eq!(rule.name, "first");
        Ok(())
    }

    #[tokio::test]
    async fn short_output_and_composers_pass_through() -> anyhow::Result<()> {
        let manager = HookManager::new(HookConfig::new(vec![
            HookRule::new("sum", "summarizer").with_conditions(long_output()),
        ]))?;
        let invoker = RecordingInvoker::default();

        let outcome = manager
            .process("web_search", json!("short"), &invoker, HookCall::default())
            .await;
        assert_eq!(outcome.value, json!("short"));

        let outcome = manager
            .process("summarizer", json!("y".repeat(50)), &invoker, HookCall::default())
            .await;
        assert!(outcome.applied_rule.is_none());
        assert!(invoker.calls.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn composer_failure_keeps_original() -> anyhow::Result<()> {
        let manager = HookManager::new(HookConfig::new(vec![HookRule::new("sum", "summarizer")]))?;
        let invoker = RecordingInvoker {
            fail: true,
            ..RecordingInvoker::default()
        };
        let outcome = manager
            .process("web_search", json!({"a": 1}), &invoker, HookCall::default())
            .await;
        assert_eq!(outcome.value, json!({"a": 1}));
        assert!(outcome.applied_rule.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn annotate_attaches_output() -> anyhow::Result<()> {
        let manager = HookManager::new(HookConfig::new(vec![
            HookRule::new("tag", "tagger").with_kind(HookKind::Annotate),
        ]))?;
        let invoker = RecordingInvoker::default();
        let outcome = manager
            .process("web_search", json!({"hits": 3}), &invoker, HookCall::default())
            .await;
        assert_eq!(outcome.value["hits"], 3);
        assert_eq!(outcome.value["_hook"]["rule"], "tag");
        assert_eq!(outcome.value["_hook"]["output"]["summary"], "from tagger");
        Ok(())
    }

    #[tokio::test]
    async fn depth_limit_stops_nested_processing() -> anyhow::Result<()> {
        let manager = HookManager::new(HookConfig::new(vec![HookRule::new("sum", "summarizer")]))?;
        let invoker = RecordingInvoker::default();
        let call = HookCall {
            depth: 1,
            ..HookCall::default()
        };
        let outcome = manager.process("web_search", json!(1), &invoker, call).await;
        assert!(outcome.applied_rule.is_none());
        Ok(())
    }
}
