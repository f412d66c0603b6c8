//! # Tool System
//!
//! Tools are described statically by [`ToolDescriptor`](crate::catalog::ToolDescriptor)s
//! and instantiated lazily by the [`ToolRegistry`]. Every invocation goes
//! through the [`ToolExecutor`], which applies validation, caching,
//! streaming, hook post-processing and error classification in a fixed order.
//!
//! ## Invoking a tool
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolhub_core::catalog::{Catalog, ToolDescriptor};
//! use toolhub_core::tools::{ResultCache, ToolExecutor, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = Catalog::from_descriptors(vec![ToolDescriptor::new("say", "echo")])?;
//!     let registry = Arc::new(ToolRegistry::with_builtins(catalog));
//!     let executor = ToolExecutor::new(registry, Arc::new(ResultCache::new()));
//!
//!     let result = executor
//!         .invoke_tool("say", serde_json::json!({"message": "hi"}))
//!         .await;
//!     println!("{}", result.to_legacy_value());
//!     Ok(())
//! }
//! ```
//!
//! ## Custom tool types
//!
//! Implement [`Tool`] and register a constructor for its implementation type
//! on a [`ToolFactory`]. Constructors may fail; the registry records the
//! failure and reports the tool as unavailable instead of propagating it.

pub mod builtin;
pub mod cache;
pub mod executor;
pub mod invocation;
pub mod registry;
pub mod schema;
pub mod traits;

pub use cache::{CacheStats, CacheWriteBack, ResultCache, WriteBackSummary};
pub use executor::ToolExecutor;
pub use invocation::{InvocationMetadata, InvocationOptions, InvocationRequest, InvocationResult};
pub use registry::{
    FailureRecord, HealthReport, ToolConstructor, ToolError, ToolErrorType, ToolExecutionError,
    ToolFactory, ToolHealth, ToolRegistry, classify_error,
};
pub use schema::{SchemaRule, SchemaViolation, validate_arguments};
pub use traits::{StreamSink, Tool, ToolContext, cache_key};
