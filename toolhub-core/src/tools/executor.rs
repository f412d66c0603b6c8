//! The execution core: the single entry point for tool invocation
//!
//! Every call walks the same fixed pipeline: catalog lookup, registry
//! resolution, argument validation, cache lookup, execution, hook
//! post-processing, cache store. Failures at any step come back as an
//! [`InvocationResult::Failure`]; nothing here panics or returns `Err`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::ResultCache;
use super::invocation::{InvocationMetadata, InvocationOptions, InvocationRequest, InvocationResult};
use super::registry::{ToolError, ToolErrorType, ToolExecutionError, ToolRegistry};
use super::traits::{Tool, ToolContext};
use crate::config::ExecutionConfig;
use crate::hooks::{ComposerInvoker, HookCall, HookManager};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    hooks: Arc<HookManager>,
    config: ExecutionConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, cache: Arc<ResultCache>) -> Self {
        Self {
            registry,
            cache,
            hooks: Arc::new(HookManager::disabled()),
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.hooks
    }

    /// Run one invocation through the full pipeline
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let started = Instant::now();
        let InvocationRequest {
            tool_name,
            arguments,
            options,
        } = request;

        let Some(descriptor) = self.registry.descriptor(&tool_name) else {
            debug!(tool = %tool_name, "invocation of unknown tool");
            return InvocationResult::Failure(ToolExecutionError::new(
                tool_name.clone(),
                ToolErrorType::NotFound,
                format!("Tool '{tool_name}' not found"),
            ));
        };

        let Some(handle) = self.registry.resolve(&tool_name) else {
            return InvocationResult::Failure(self.unavailable(&tool_name));
        };

        if options.validate
            && self.config.validate
            && let Err(violation) = handle.validate_args(&descriptor.parameter_schema, &arguments)
        {
            debug!(tool = %tool_name, field = %violation.path, "argument validation failed");
            return InvocationResult::Failure(ToolExecutionError::from_violation(
                &tool_name, &violation,
            ));
        }

        let cache_key = (options.use_cache
            && self.config.use_cache
            && self.cache.is_enabled()
            && descriptor.cacheable
            && handle.supports_caching())
        .then(|| handle.cache_key(&arguments));

        if let Some(key) = &cache_key
            && let Some(value) = self.cache.get(key).await
        {
            debug!(tool = %tool_name, "result cache hit");
            return InvocationResult::Success {
                value,
                metadata: InvocationMetadata {
                    tool_name,
                    cached: true,
                    streamed: false,
                    hook_applied: None,
                    duration_ms: elapsed_ms(started),
                },
            };
        }

        let streaming = descriptor.supports_streaming && handle.supports_streaming();
        let cancellation = options
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let ctx = ToolContext::new(tool_name.clone())
            .with_stream(if streaming {
                options.stream_sink.clone()
            } else {
                None
            })
            .with_cancellation(cancellation.clone());
        // one budget covers the handle and any composer the hooks call
        let deadline = options
            .timeout
            .or_else(|| self.config.default_timeout())
            .map(|limit| (limit, time::Instant::now() + limit));

        let value = match run_guarded(handle.as_ref(), arguments, &ctx, deadline).await {
            Ok(value) => value,
            Err(err) => {
                let error_type = handle.classify_error(&err);
                let mut failure = ToolExecutionError::from_error(&tool_name, &err);
                if failure.error_type != error_type {
                    failure = ToolExecutionError {
                        error_type,
                        retriable: error_type.is_retriable(),
                        remediation_hint: error_type.default_remediation().to_string(),
                        ..failure
                    };
                }
                warn!(tool = %tool_name, kind = %failure.error_type, error = %err, "tool execution failed");
                return InvocationResult::Failure(failure);
            }
        };

        let mut hook_applied = None;
        let mut value = value;
        if !options.skip_hooks && !descriptor.hook_exempt && self.hooks.is_enabled() {
            let outcome = self
                .hooks
                .process(
                    &tool_name,
                    value,
                    self,
                    HookCall {
                        depth: options.hook_depth,
                        cancellation: cancellation.clone(),
                        timeout: deadline.map(|(_, at)| at.saturating_duration_since(time::Instant::now())),
                    },
                )
                .await;
            value = outcome.value;
            hook_applied = outcome.applied_rule;
        }

        // a call aborted while hooks ran must not leave a cache entry behind
        if cancellation.is_cancelled() {
            return InvocationResult::Failure(ToolExecutionError::from_error(
                &tool_name,
                &ToolError::Cancelled.into(),
            ));
        }

        if let Some(key) = cache_key {
            self.cache.put(key, &tool_name, value.clone()).await;
        }

        InvocationResult::Success {
            value,
            metadata: InvocationMetadata {
                tool_name,
                cached: false,
                streamed: ctx.is_streaming(),
                hook_applied,
                duration_ms: elapsed_ms(started),
            },
        }
    }

    /// Invoke with the given arguments and default options
    pub async fn invoke_tool(&self, tool_name: &str, arguments: Value) -> InvocationResult {
        self.invoke(InvocationRequest::new(tool_name, arguments)).await
    }

    /// Legacy entry point: a wire request in, a value or `{error, error_details}` out
    pub async fn invoke_value(&self, request: &Value) -> Value {
        match InvocationRequest::from_value(request) {
            Some(request) => self.invoke(request).await.to_legacy_value(),
            None => ToolExecutionError::new(
                String::new(),
                ToolErrorType::ValidationError,
                "Invocation request must include a 'name' string".to_string(),
            )
            .with_field_path("name")
            .to_json_value(),
        }
    }

    /// Convenience wrapper surfacing failures as errors
    pub async fn execute_tool(&self, tool_name: &str, arguments: Value) -> anyhow::Result<Value> {
        Ok(self.invoke_tool(tool_name, arguments).await.into_result()?)
    }

    fn unavailable(&self, tool_name: &str) -> ToolExecutionError {
        match self.registry.failure(tool_name) {
            Some(record) => ToolExecutionError::with_original_error(
                tool_name.to_string(),
                ToolErrorType::Unavailable,
                format!("Tool '{tool_name}' is unavailable: {}", record.error_message),
                record.error_message.clone(),
            )
            .with_remediation(record.remediation_hint()),
            None => ToolExecutionError::new(
                tool_name.to_string(),
                ToolErrorType::Unavailable,
                format!("Tool '{tool_name}' is unavailable"),
            ),
        }
    }
}

#[async_trait]
impl ComposerInvoker for ToolExecutor {
    async fn invoke_composer(
        &self,
        composer: &str,
        arguments: Value,
        call: HookCall,
    ) -> Result<Value, ToolExecutionError> {
        let mut options = InvocationOptions::default()
            .without_hooks()
            .with_cancellation(call.cancellation);
        options.timeout = call.timeout;
        options.hook_depth = call.depth;

        let request = InvocationRequest::new(composer, arguments).with_options(options);
        self.invoke(request).await.into_result()
    }
}

/// Execute a handle, honoring cancellation and an optional deadline given
/// as the caller's limit and the instant it runs out. The token is
/// cancelled on timeout so the handle observes the abort.
async fn run_guarded(
    handle: &dyn Tool,
    arguments: Value,
    ctx: &ToolContext,
    deadline: Option<(Duration, time::Instant)>,
) -> anyhow::Result<Value> {
    let token = ctx.cancellation().clone();
    let guarded = async {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ToolError::Cancelled.into()),
            result = handle.execute(arguments, ctx) => result,
        }
    };

    match deadline {
        Some((limit, at)) => match time::timeout_at(at, guarded).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancellation().cancel();
                Err(ToolError::TimedOut(limit).into())
            }
        },
        None => guarded.await,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
