use serde::Serialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::registry::ToolExecutionError;
use super::traits::StreamSink;

/// Per-call switches. Defaults validate and use the cache.
#[derive(Debug, Clone)]
pub struct InvocationOptions {
    pub use_cache: bool,
    pub validate: bool,
    /// Incremental output target, only used by streaming-capable tools
    pub stream_sink: Option<StreamSink>,
    pub skip_hooks: bool,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    /// Nesting level of hook composer calls
    pub hook_depth: usize,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            validate: true,
            stream_sink: None,
            skip_hooks: false,
            timeout: None,
            cancellation: None,
            hook_depth: 0,
        }
    }
}

impl InvocationOptions {
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_stream(mut self, sink: StreamSink) -> Self {
        self.stream_sink = Some(sink);
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.skip_hooks = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub options: InvocationOptions,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            options: InvocationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InvocationOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse the wire shape `{"name": .., "arguments": {..}}`. Missing
    /// arguments default to an empty object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name").and_then(Value::as_str)?;
        let arguments = value
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut request = Self::new(name, arguments);
        if let Some(options) = value.get("options") {
            if let Some(use_cache) = options.get("use_cache").and_then(Value::as_bool) {
                request.options.use_cache = use_cache;
            }
            if let Some(validate) = options.get("validate").and_then(Value::as_bool) {
                request.options.validate = validate;
            }
        }
        Some(request)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvocationMetadata {
    pub tool_name: String,
    pub cached: bool,
    pub streamed: bool,
    pub hook_applied: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success {
        value: Value,
        metadata: InvocationMetadata,
    },
    Failure(ToolExecutionError),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            InvocationResult::Success { value, .. } => Some(value),
            InvocationResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ToolExecutionError> {
        match self {
            InvocationResult::Success { .. } => None,
            InvocationResult::Failure(error) => Some(error),
        }
    }

    pub fn metadata(&self) -> Option<&InvocationMetadata> {
        match self {
            InvocationResult::Success { metadata, .. } => Some(metadata),
            InvocationResult::Failure(_) => None,
        }
    }

    /// The flattened single-string form
    pub fn legacy_message(&self) -> Option<String> {
        self.error().map(ToolExecutionError::legacy_message)
    }

    /// `value` on success, `{error, error_details}` on failure
    pub fn to_legacy_value(&self) -> Value {
        match self {
            InvocationResult::Success { value, .. } => value.clone(),
            InvocationResult::Failure(error) => error.to_json_value(),
        }
    }

    pub fn into_result(self) -> Result<Value, ToolExecutionError> {
        match self {
            InvocationResult::Success { value, .. } => Ok(value),
            InvocationResult::Failure(error) => Err(error),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            InvocationResult::Success { value, metadata } => json!({
                "success": true,
                "value": value,
                "metadata": metadata,
            }),
            InvocationResult::Failure(error) => {
                let mut body = error.to_json_value();
                if let Some(object) = body.as_object_mut() {
                    object.insert("success".to_string(), Value::Bool(false));
                }
                body
            }
        }
    }
}
