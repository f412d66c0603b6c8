//! toolhub configuration module
//!
//! Loads `toolhub.toml` and exposes one typed section per subsystem: catalog,
//! execution defaults, result cache, hooks, search, finder and sessions.

pub mod constants;
pub mod loader;

pub use loader::{
    CacheConfig, CatalogConfig, ConfigManager, EmbeddingProviderKind, ExecutionConfig,
    FinderConfig, HooksConfig, SearchConfig, SessionConfig, ToolhubConfig,
};
