//! # toolhub-core - registry and dispatch for pluggable tools
//!
//! `toolhub-core` keeps a catalog of hundreds of independently pluggable
//! tools usable as a whole: a broken tool becomes a recorded failure instead
//! of an error that takes the rest down, every invocation runs through one
//! pipeline, and tools can be discovered with free-text queries.
//!
//! ## Highlights
//!
//! - **Catalog**: static [`ToolDescriptor`]s loaded per category from JSON or
//!   TOML files, unique by name.
//! - **Failure-isolating registry**: lazy, once-per-name construction of tool
//!   handles through a type-name factory; construction errors (and panics)
//!   are memoized as [`FailureRecord`]s and surface through `health`.
//! - **Execution core**: [`ToolExecutor`] applies validation, result caching,
//!   streaming, hook post-processing and error classification in a fixed
//!   order and always returns a structured [`InvocationResult`].
//! - **Hooks**: declarative, priority-ordered rules that route large or
//!   matching results through a composer tool, never recursively.
//! - **Hybrid search**: BM25 keyword scoring fused with cosine similarity
//!   over per-collection vector indexes, persisted atomically on disk.
//! - **Tool finder**: natural-language discovery over the catalog that falls
//!   back to keyword search when embeddings are unavailable.
//!
//! ## Architecture Overview
//!
//! - `config/`: `toolhub.toml` loader and constants.
//! - `catalog`: descriptors and catalog loading.
//! - `tools/`: tool contract, registry, result cache, executor, builtins.
//! - `hooks/`: hook documents and the hook manager.
//! - `search/`: document store, vector index, embedders and the engine.
//! - `finder`: tool discovery on top of the search engine.
//! - `session`: time-boxed per-conversation memory.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolhub_core::{ConfigManager, Toolhub};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigManager::load()?.into_config();
//!     let hub = Toolhub::from_config(config).await?;
//!
//!     println!("{:?}", hub.registry().health());
//!     for found in hub.finder().find("weather forecast", None).await? {
//!         println!("{} ({:.2})", found.name, found.score);
//!     }
//!     hub.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod finder;
pub mod hooks;
pub mod runtime;
pub mod search;
pub mod session;
pub mod tools;

pub use catalog::{Catalog, CatalogError, DescriptorSource, ToolDescriptor};
pub use config::{ConfigManager, ToolhubConfig};
pub use finder::{ExactNameLookup, RelevanceJudge, ToolFinder, ToolMatch};
pub use hooks::{HookConfig, HookManager, HookRule};
pub use runtime::Toolhub;
pub use search::{
    Document, Embedder, HashingEmbedder, SearchEngine, SearchError, SearchHit, SearchMethod,
};
pub use session::SessionStore;
pub use tools::{
    FailureRecord, HealthReport, InvocationOptions, InvocationRequest, InvocationResult,
    ResultCache, Tool, ToolContext, ToolErrorType, ToolExecutionError, ToolExecutor, ToolFactory,
    ToolRegistry,
};
