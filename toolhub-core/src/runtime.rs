//! Assembles the catalog, registry, executor, search engine and finder from
//! one [`ToolhubConfig`]

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{Catalog, DescriptorSource};
use crate::config::{CatalogConfig, ToolhubConfig};
use crate::finder::ToolFinder;
use crate::hooks::HookManager;
use crate::search::{Embedder, InsertReport, SearchEngine, UnavailableEmbedder, embedder_from_config};
use crate::session::SessionStore;
use crate::tools::{
    InvocationRequest, InvocationResult, ResultCache, ToolExecutor, ToolFactory, ToolRegistry,
};

pub struct Toolhub {
    config: ToolhubConfig,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    engine: Arc<SearchEngine>,
    finder: ToolFinder,
    sessions: SessionStore,
}

impl Toolhub {
    /// Build with the builtin tool types
    pub async fn from_config(config: ToolhubConfig) -> Result<Self> {
        Self::with_factory(config, ToolFactory::with_builtins()).await
    }

    /// Build with a caller-supplied factory for custom tool types
    pub async fn with_factory(config: ToolhubConfig, factory: ToolFactory) -> Result<Self> {
        let catalog = load_catalog(&config.catalog)?;
        let registry = Arc::new(ToolRegistry::new(catalog, factory));

        let cache = Arc::new(
            ResultCache::from_config(&config.cache).context("Failed to initialize result cache")?,
        );
        let hooks = Arc::new(
            HookManager::from_config(&config.hooks).context("Failed to load hook configuration")?,
        );
        let executor = ToolExecutor::new(registry.clone(), cache)
            .with_hooks(hooks)
            .with_config(config.execution.clone());

        let embedder: Arc<dyn Embedder> = match embedder_from_config(&config.search) {
            Ok(embedder) => embedder,
            Err(err) => {
                warn!(error = %err, "embedding provider unavailable; search limited to keywords");
                Arc::new(UnavailableEmbedder::new(
                    err.to_string(),
                    config.search.embedding_model.clone(),
                    config.search.dimensions,
                ))
            }
        };
        let engine = Arc::new(
            SearchEngine::open(&config.search.data_dir, embedder)
                .await
                .context("Failed to open search engine")?,
        );
        let finder = ToolFinder::new(engine.clone(), &config.finder, config.search.default_alpha);
        let sessions = SessionStore::from_config(&config.session);

        info!(tools = registry.catalog().len(), "toolhub initialized");
        Ok(Self {
            config,
            registry,
            executor,
            engine,
            finder,
            sessions,
        })
    }

    pub fn config(&self) -> &ToolhubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    pub fn finder(&self) -> &ToolFinder {
        &self.finder
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.executor.invoke(request).await
    }

    /// Index the current catalog for discovery
    pub async fn index_tools(&self) -> Result<InsertReport> {
        let catalog = self.registry.catalog();
        self.finder
            .index_catalog(&catalog)
            .await
            .context("Failed to index tool catalog")
    }

    /// Drain cache persistence and close the search engine
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(summary) = self.executor.cache().shutdown().await? {
            info!(written = summary.written, "result cache journal flushed");
        }
        self.engine
            .close()
            .await
            .context("Failed to close search engine")?;
        Ok(())
    }
}

fn load_catalog(config: &CatalogConfig) -> Result<Catalog> {
    let source = DescriptorSource::from_dir(&config.descriptor_dir).with_context(|| {
        format!(
            "Failed to read tool descriptors from {}",
            config.descriptor_dir.display()
        )
    })?;
    if source.category_names().is_empty() {
        warn!(dir = %config.descriptor_dir.display(), "no tool descriptors found");
        return Ok(Catalog::new());
    }
    Catalog::load(&source, &config.categories).context("Failed to load tool catalog")
}
