use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolhub_core::catalog::{Catalog, ToolDescriptor};
use toolhub_core::hooks::{HookConfig, HookManager, HookRule};
use toolhub_core::tools::{
    InvocationOptions, InvocationRequest, ResultCache, Tool, ToolContext, ToolErrorType,
    ToolExecutor, ToolFactory, ToolRegistry,
};

struct CountingTool {
    name: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "query": args["q"], "call": call }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Never finishes on its own; only cancellation or a timeout ends it
struct StuckTool {
    name: String,
}

#[async_trait]
impl Tool for StuckTool {
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => bail!("aborted by caller"),
            _ = tokio::time::sleep(Duration::from_secs(300)) => Ok(json!({"done": true})),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sleeps before echoing its arguments; aborts on cancellation
struct SlowTool {
    name: String,
    delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => bail!("aborted by caller"),
            _ = tokio::time::sleep(self.delay) => Ok(json!({"tool": self.name, "args": args})),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct Fixture {
    executor: ToolExecutor,
    calls: Arc<AtomicUsize>,
    constructed: Arc<AtomicUsize>,
}

fn search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "q": {"type": "string"},
            "limit": {"type": "integer", "minimum": 1}
        },
        "required": ["q"]
    })
}

fn fixture() -> Fixture {
    let calls = Arc::new(AtomicUsize::new(0));
    let constructed = Arc::new(AtomicUsize::new(0));

    let catalog = Catalog::from_descriptors(vec![
        ToolDescriptor::new("search", "counting").with_schema(search_schema()),
        ToolDescriptor::new("stuck", "stuck"),
        ToolDescriptor::new("say_streaming", "echo").with_streaming(true),
        ToolDescriptor::new("say_plain", "echo"),
        ToolDescriptor::new("legacy", "broken"),
    ])
    .unwrap();

    let counting_calls = calls.clone();
    let counting_built = constructed.clone();
    let stuck_built = constructed.clone();
    let factory = ToolFactory::with_builtins()
        .with("counting", move |descriptor| {
            counting_built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingTool {
                name: descriptor.name.clone(),
                calls: counting_calls.clone(),
            }) as Arc<dyn Tool>)
        })
        .with("stuck", move |descriptor| {
            stuck_built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StuckTool {
                name: descriptor.name.clone(),
            }) as Arc<dyn Tool>)
        })
        .with("broken", |_| bail!("No module named 'foo'"));

    let registry = Arc::new(ToolRegistry::new(catalog, factory));
    Fixture {
        executor: ToolExecutor::new(registry, Arc::new(ResultCache::new())),
        calls,
        constructed,
    }
}

#[tokio::test]
async fn unknown_tool_is_not_found_without_touching_the_registry() {
    let fx = fixture();
    let result = fx.executor.invoke_tool("does_not_exist", json!({})).await;

    let error = result.error().unwrap();
    assert_eq!(error.error_type, ToolErrorType::NotFound);
    assert!(!error.retriable);
    assert_eq!(fx.executor.registry().loaded_count(), 0);
    assert!(fx.executor.registry().failure("does_not_exist").is_none());
    assert_eq!(fx.constructed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recorded_failure_is_unavailable_until_cleared() {
    let fx = fixture();
    let registry = fx.executor.registry();
    registry.mark_unavailable("search", anyhow!("missing package 'httpx'"), "tests");

    let result = fx.executor.invoke_tool("search", json!({"q": "rust"})).await;
    let error = result.error().unwrap();
    assert_eq!(error.error_type, ToolErrorType::Unavailable);
    assert!(error.remediation_hint.contains("httpx"));
    assert_eq!(fx.constructed.load(Ordering::SeqCst), 0);

    // resolution stays short-circuited
    assert!(registry.resolve("search").is_none());
    assert!(registry.resolve("search").is_none());

    assert!(registry.clear_failure("search"));
    let result = fx.executor.invoke_tool("search", json!({"q": "rust"})).await;
    assert!(result.is_success());
    assert_eq!(fx.constructed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn identical_cached_calls_execute_once() {
    let fx = fixture();
    let args = json!({"q": "weather", "limit": 3});

    let first = fx.executor.invoke_tool("search", args.clone()).await;
    let second = fx.executor.invoke_tool("search", args.clone()).await;
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.value(), second.value());
    assert!(!first.metadata().unwrap().cached);
    assert!(second.metadata().unwrap().cached);

    // key order does not change the cache key
    let reordered: Value = serde_json::from_str(r#"{"limit": 3, "q": "weather"}"#).unwrap();
    fx.executor.invoke_tool("search", reordered).await;
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);

    let uncached = InvocationRequest::new("search", args)
        .with_options(InvocationOptions::default().with_cache(false));
    fx.executor.invoke(uncached).await;
    assert_eq!(fx.calls.load(Ordering::SeqCst), 2);

    let stats = fx.executor.cache().stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn validation_failures_name_the_field_and_never_execute() {
    let fx = fixture();

    let missing = fx.executor.invoke_tool("search", json!({"limit": 2})).await;
    let error = missing.error().unwrap();
    assert_eq!(error.error_type, ToolErrorType::ValidationError);
    assert!(error.message.contains("q"));
    assert_eq!(error.field_path.as_deref(), Some("q"));

    let wrong_type = fx.executor.invoke_tool("search", json!({"q": 42})).await;
    let error = wrong_type.error().unwrap();
    assert_eq!(error.error_type, ToolErrorType::ValidationError);
    assert!(error.message.contains("string"));

    assert_eq!(fx.calls.load(Ordering::SeqCst), 0);

    let unchecked = InvocationRequest::new("search", json!({"q": 42}))
        .with_options(InvocationOptions::default().with_validation(false));
    assert!(fx.executor.invoke(unchecked).await.is_success());
}

#[tokio::test]
async fn timeout_fails_cleanly_without_caching() {
    let fx = fixture();
    let request = InvocationRequest::new("stuck", json!({}))
        .with_options(InvocationOptions::default().with_timeout(Duration::from_millis(50)));

    let result = fx.executor.invoke(request).await;
    let error = result.error().unwrap();
    assert_eq!(error.error_type, ToolErrorType::ServerError);
    assert!(error.retriable);
    assert!(fx.executor.cache().is_empty().await);
}

#[tokio::test]
async fn caller_cancellation_propagates_into_the_handle() {
    let fx = fixture();
    let token = CancellationToken::new();
    let request = InvocationRequest::new("stuck", json!({}))
        .with_options(InvocationOptions::default().with_cancellation(token.clone()));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let result = fx.executor.invoke(request).await;
    canceller.await.unwrap();

    assert!(!result.is_success());
    assert!(fx.executor.cache().is_empty().await);
}

#[tokio::test]
async fn stream_sink_is_used_only_by_streaming_tools() {
    let fx = fixture();

    let (tx, mut rx) = mpsc::channel(16);
    let request = InvocationRequest::new("say_streaming", json!({"message": "one two"}))
        .with_options(InvocationOptions::default().with_stream(tx));
    let result = fx.executor.invoke(request).await;
    assert!(result.metadata().unwrap().streamed);
    assert_eq!(result.value().unwrap()["message"], "one two");
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec![json!({"chunk": "one"}), json!({"chunk": "two"})]);

    let (tx, mut rx) = mpsc::channel(16);
    let request = InvocationRequest::new("say_plain", json!({"message": "one two"}))
        .with_options(InvocationOptions::default().with_stream(tx));
    let result = fx.executor.invoke(request).await;
    assert!(!result.metadata().unwrap().streamed);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn legacy_wire_shape_flattens_errors() {
    let fx = fixture();

    let response = fx.executor.invoke_value(&json!({"name": "legacy"})).await;
    assert_eq!(response["error_details"]["type"], "Unavailable");
    assert_eq!(response["error_details"]["retriable"], false);
    assert!(response["error"].as_str().unwrap().starts_with("Unavailable: "));

    let response = fx
        .executor
        .invoke_value(&json!({"name": "say_plain", "arguments": {"message": "hi"}}))
        .await;
    assert_eq!(response, json!({"message": "hi"}));

    let response = fx.executor.invoke_value(&json!({"arguments": {}})).await;
    assert_eq!(response["error_details"]["type"], "ValidationError");
}

fn slow_hooked_executor() -> ToolExecutor {
    let catalog = Catalog::from_descriptors(vec![
        ToolDescriptor::new("slow_fetch", "slow"),
        ToolDescriptor::new("slow_summary", "slow"),
    ])
    .unwrap();
    let factory = ToolFactory::new().with("slow", |descriptor| {
        Ok(Arc::new(SlowTool {
            name: descriptor.name.clone(),
            delay: Duration::from_millis(150),
        }) as Arc<dyn Tool>)
    });
    let hooks = HookManager::new(HookConfig::new(vec![HookRule::new(
        "summarize_everything",
        "slow_summary",
    )]))
    .unwrap();
    ToolExecutor::new(
        Arc::new(ToolRegistry::new(catalog, factory)),
        Arc::new(ResultCache::new()),
    )
    .with_hooks(Arc::new(hooks))
}

#[tokio::test(start_paused = true)]
async fn caller_timeout_bounds_tool_and_composer_together() {
    let executor = slow_hooked_executor();

    let started = tokio::time::Instant::now();
    let request = InvocationRequest::new("slow_fetch", json!({"q": 1})).with_options(
        InvocationOptions::default()
            .with_cache(false)
            .with_timeout(Duration::from_millis(200)),
    );
    let result = executor.invoke(request).await;
    let elapsed = started.elapsed();

    // the composer only gets what the tool left of the budget
    assert!(elapsed <= Duration::from_millis(200), "took {elapsed:?}");
    assert!(result.is_success());
    assert!(result.metadata().unwrap().hook_applied.is_none());
    assert_eq!(result.value().unwrap()["tool"], "slow_fetch");

    let started = tokio::time::Instant::now();
    let request = InvocationRequest::new("slow_fetch", json!({"q": 2})).with_options(
        InvocationOptions::default()
            .with_cache(false)
            .with_timeout(Duration::from_millis(400)),
    );
    let result = executor.invoke(request).await;
    assert!(started.elapsed() <= Duration::from_millis(400));
    assert_eq!(
        result.metadata().unwrap().hook_applied.as_deref(),
        Some("summarize_everything")
    );
    assert_eq!(result.value().unwrap()["tool"], "slow_summary");
}
