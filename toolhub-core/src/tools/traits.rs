//! The contract every tool handle satisfies

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::registry::error::{ToolErrorType, classify_error};
use super::schema::{SchemaViolation, validate_arguments};

/// Receiver side of incremental output for streaming tools
pub type StreamSink = mpsc::Sender<Value>;

/// Per-invocation context handed to a handle
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    tool_name: String,
    stream: Option<StreamSink>,
    cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            stream: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_stream(mut self, stream: Option<StreamSink>) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Whether a sink is attached. Only streaming-capable handles ever get one.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Push one incremental chunk. Returns false when no sink is attached or
    /// the receiver has gone away.
    pub async fn emit(&self, chunk: Value) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        if stream.send(chunk).await.is_err() {
            debug!(tool = %self.tool_name, "stream receiver dropped");
            return false;
        }
        true
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Core trait for all tool handles
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with already validated arguments
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;

    /// Get the tool's name
    fn name(&self) -> &str;

    /// Validate arguments against the descriptor schema before execution
    fn validate_args(&self, schema: &Value, args: &Value) -> Result<(), SchemaViolation> {
        validate_arguments(schema, args)
    }

    /// Map an execution error onto the failure taxonomy
    fn classify_error(&self, error: &anyhow::Error) -> ToolErrorType {
        classify_error(error)
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn supports_caching(&self) -> bool {
        true
    }

    /// Generate cache key for given arguments
    fn cache_key(&self, args: &Value) -> String {
        cache_key(self.name(), args)
    }
}

/// Stable hash of a tool name and its canonicalized arguments
pub fn cache_key(tool_name: &str, args: &Value) -> String {
    let canonical = canonicalize(args);
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.to_string().as_bytes());
    format!("{tool_name}:{:x}", hasher.finalize())
}

/// Rebuild a value with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
