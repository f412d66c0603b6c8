use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::catalog::ToolDescriptor;
use crate::tools::traits::{Tool, ToolContext};

/// Returns its arguments. When streaming, each word of `message` is emitted
/// as a chunk before the full value is returned.
pub struct EchoTool {
    name: String,
    prefix: Option<String>,
    streaming: bool,
}

impl EchoTool {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self> {
        Ok(Self {
            name: descriptor.name.clone(),
            prefix: descriptor.setting_str("prefix").map(str::to_string),
            streaming: descriptor.supports_streaming,
        })
    }
}

#[async_trait]
impl Tool for EchoTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let mut output = args;
        if let Some(prefix) = &self.prefix
            && let Some(message) = output.get("message").and_then(Value::as_str)
        {
            let prefixed = format!("{prefix}{message}");
            output["message"] = Value::String(prefixed);
        }

        if ctx.is_streaming()
            && let Some(message) = output.get("message").and_then(Value::as_str)
        {
            for word in message.split_whitespace() {
                ctx.emit(json!({ "chunk": word })).await;
            }
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn streams_words_when_a_sink_is_attached() -> Result<()> {
        let descriptor = ToolDescriptor::new("say", "echo")
            .with_streaming(true)
            .with_setting("prefix", json!(">> "));
        let tool = EchoTool::from_descriptor(&descriptor)?;

        let (tx, mut rx) = mpsc::channel(8);
        let ctx = ToolContext::new("say").with_stream(Some(tx));
        let output = tool.execute(json!({"message": "hello there"}), &ctx).await?;
        drop(ctx);

        assert_eq!(output["message"], ">> hello there");
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk["chunk"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(chunks, vec![">>", "hello", "there"]);
        Ok(())
    }
}
