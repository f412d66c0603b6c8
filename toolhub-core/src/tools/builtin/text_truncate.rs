use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::catalog::ToolDescriptor;
use crate::tools::registry::ToolError;
use crate::tools::traits::{Tool, ToolContext};

const DEFAULT_MAX_CHARS: usize = 2_000;
const ELLIPSIS: &str = "...";

/// Shortens `content` to `max_chars`. Typically used as a hook composer for
/// oversized results.
pub struct TextTruncateTool {
    name: String,
    max_chars: usize,
}

impl TextTruncateTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self> {
        let max_chars = match descriptor.setting("max_chars") {
            None => DEFAULT_MAX_CHARS,
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > ELLIPSIS.len())
                .ok_or_else(|| {
                    ToolError::Config(format!(
                        "max_chars for '{}' must be an integer above {}",
                        descriptor.name,
                        ELLIPSIS.len()
                    ))
                })?,
        };
        Ok(Self {
            name: descriptor.name.clone(),
            max_chars,
        })
    }
}

#[async_trait]
impl Tool for TextTruncateTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let content = args
            .get("content")
            .ok_or_else(|| anyhow!("invalid argument: 'content' is required"))?;
        let text = match content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let limit = args
            .get("max_chars")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(self.max_chars)
            .max(ELLIPSIS.len() + 1);

        let original_length = text.chars().count();
        let truncated = original_length > limit;
        let output = if truncated {
            let kept: String = text.chars().take(limit - ELLIPSIS.len()).collect();
            format!("{kept}{ELLIPSIS}")
        } else {
            text
        };

        Ok(json!({
            "text": output,
            "truncated": truncated,
            "original_length": original_length,
            "source_tool": args.get("tool_name").cloned().unwrap_or(Value::Null),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn truncates_long_content() -> Result<()> {
        let tool = TextTruncateTool::from_descriptor(
            &ToolDescriptor::new("shorten", "text_truncate").with_setting("max_chars", json!(10)),
        )?;
        let ctx = ToolContext::new("shorten");

        let output = tool
            .execute(json!({"content": "abcdefghijklmnop", "tool_name": "web"}), &ctx)
            .await?;
        assert_eq!(output["text"], "abcdefg...");
        assert_eq!(output["truncated"], true);
        assert_eq!(output["original_length"], 16);
        assert_eq!(output["source_tool"], "web");

        let output = tool.execute(json!({"content": "short"}), &ctx).await?;
        assert_eq!(output["truncated"], false);
        Ok(())
    }

    #[test]
    fn rejects_tiny_limits() {
        let descriptor =
            ToolDescriptor::new("shorten", "text_truncate").with_setting("max_chars", json!(2));
        assert!(TextTruncateTool::from_descriptor(&descriptor).is_err());
    }
}
