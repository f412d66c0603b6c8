use crate::config::constants::{execution, finder, paths, search, session};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Descriptor catalog settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Directory holding one descriptor file per category
    #[serde(default = "default_descriptor_dir")]
    pub descriptor_dir: PathBuf,

    /// Category or tool names loaded at startup. Empty loads every category.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            descriptor_dir: default_descriptor_dir(),
            categories: Vec::new(),
        }
    }
}

/// Defaults applied to invocations that do not override them
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_true")]
    pub use_cache: bool,

    #[serde(default = "default_true")]
    pub validate: bool,

    /// No timeout is imposed unless configured
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            validate: true,
            default_timeout_secs: None,
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Journal file for write-back persistence. Disabled when unset.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,

    /// Bounded queue size of the write-back worker
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_path: None,
            write_queue_capacity: default_write_queue_capacity(),
        }
    }
}

/// Post-processing hook settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HooksConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// YAML or JSON hook document
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config_path: None,
        }
    }
}

/// Which embedding backend a deployment uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Hashing,
    OpenAi,
}

/// Search engine and embedding settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub embedding_provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Environment variable holding the embedding API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Endpoint override for OpenAI-compatible providers
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_alpha")]
    pub default_alpha: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            data_dir: default_search_data_dir(),
            embedding_provider: EmbeddingProviderKind::default(),
            embedding_model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
            endpoint: None,
            default_alpha: default_alpha(),
        }
    }
}

/// Tool discovery settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinderConfig {
    #[serde(default = "default_finder_collection")]
    pub collection: String,

    #[serde(default = "default_finder_limit")]
    pub default_limit: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            collection: default_finder_collection(),
            default_limit: default_finder_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_descriptor_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_DESCRIPTOR_DIR)
}
fn default_write_queue_capacity() -> usize {
    execution::DEFAULT_WRITE_QUEUE_CAPACITY
}
fn default_search_data_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_SEARCH_DATA_DIR)
}
fn default_embedding_model() -> String {
    search::DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_dimensions() -> usize {
    search::DEFAULT_DIMENSIONS
}
fn default_api_key_env() -> String {
    search::DEFAULT_API_KEY_ENV.to_string()
}
fn default_alpha() -> f64 {
    search::DEFAULT_ALPHA
}
fn default_finder_collection() -> String {
    finder::DEFAULT_COLLECTION.to_string()
}
fn default_finder_limit() -> usize {
    finder::DEFAULT_LIMIT
}
fn default_session_timeout() -> u64 {
    session::DEFAULT_TIMEOUT_SECS
}

/// Main configuration structure for toolhub
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolhubConfig {
    /// Descriptor catalog
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Invocation defaults
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Post-processing hooks
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Keyword/vector search
    #[serde(default)]
    pub search: SearchConfig,

    /// Tool discovery
    #[serde(default)]
    pub finder: FinderConfig,

    /// Conversation memory
    #[serde(default)]
    pub session: SessionConfig,
}

impl ToolhubConfig {
    /// Resolve relative paths in the configuration against `root`
    pub fn resolve_paths(&mut self, root: &Path) {
        fn rebase(path: &mut PathBuf, root: &Path) {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }

        rebase(&mut self.catalog.descriptor_dir, root);
        rebase(&mut self.search.data_dir, root);
        if let Some(path) = self.cache.persist_path.as_mut() {
            rebase(path, root);
        }
        if let Some(path) = self.hooks.config_path.as_mut() {
            rebase(path, root);
        }
    }
}

/// Configuration manager for loading and validating configurations
pub struct ConfigManager {
    config: ToolhubConfig,
    config_path: Option<PathBuf>,
    workspace: PathBuf,
}

impl ConfigManager {
    /// Load configuration from the current directory
    pub fn load() -> Result<Self> {
        Self::load_from_workspace(std::env::current_dir()?)
    }

    /// `~/.toolhub/toolhub.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(paths::DOT_DIR).join(paths::CONFIG_FILE_NAME))
    }

    /// Load configuration from a specific workspace
    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        let workspace = workspace.as_ref();

        let config_path = workspace.join(paths::CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::load_from_file(&config_path);
        }

        let fallback_path = workspace.join(paths::DOT_DIR).join(paths::CONFIG_FILE_NAME);
        if fallback_path.exists() {
            return Self::load_from_file(&fallback_path);
        }

        // user-level config; relative paths still resolve against the workspace
        if let Some(home_config) = Self::user_config_path()
            && home_config.exists()
        {
            let mut config = Self::read_config(&home_config)?;
            config.resolve_paths(workspace);
            return Ok(Self {
                config,
                config_path: Some(home_config),
                workspace: workspace.to_path_buf(),
            });
        }

        let mut config = ToolhubConfig::default();
        config.resolve_paths(workspace);
        Ok(Self {
            config,
            config_path: None,
            workspace: workspace.to_path_buf(),
        })
    }

    /// Load configuration from a specific file. Relative paths inside it are
    /// resolved against the directory containing the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::read_config(path)?;

        let workspace = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&workspace);

        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
            workspace,
        })
    }

    fn read_config(path: &Path) -> Result<ToolhubConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config(&self) -> &ToolhubConfig {
        &self.config
    }

    pub fn into_config(self) -> ToolhubConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_no_file_present() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = ConfigManager::load_from_workspace(dir.path())?;

        assert_eq!(
            manager.config_path().map(Path::to_path_buf),
            ConfigManager::user_config_path().filter(|path| path.exists())
        );
        let config = manager.config();
        assert!(config.execution.use_cache);
        assert!(config.execution.default_timeout().is_none());
        assert_eq!(config.finder.collection, "tools");
        assert_eq!(config.search.embedding_provider, EmbeddingProviderKind::Hashing);
        assert!(config.catalog.descriptor_dir.starts_with(dir.path()));
        Ok(())
    }

    #[test]
    fn parses_partial_file_and_rebases_paths() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("toolhub.toml"),
            r#"
[catalog]
descriptor_dir = "descriptors"
categories = ["web", "echo_tool"]

[execution]
default_timeout_secs = 12

[search]
embedding_provider = "openai"
dimensions = 1536
"#,
        )?;

        let manager = ConfigManager::load_from_workspace(dir.path())?;
        let config = manager.config();
        assert_eq!(config.catalog.categories, vec!["web", "echo_tool"]);
        assert_eq!(config.catalog.descriptor_dir, dir.path().join("descriptors"));
        assert_eq!(config.execution.default_timeout(), Some(Duration::from_secs(12)));
        assert_eq!(config.search.embedding_provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(config.search.dimensions, 1536);
        assert_eq!(config.search.default_alpha, 0.5);
        Ok(())
    }

    #[test]
    fn falls_back_to_dot_directory() -> Result<()> {
        let dir = TempDir::new()?;
        let dot = dir.path().join(".toolhub");
        fs::create_dir_all(&dot)?;
        fs::write(dot.join("toolhub.toml"), "[finder]\ndefault_limit = 3\n")?;

        let manager = ConfigManager::load_from_workspace(dir.path())?;
        assert_eq!(manager.config().finder.default_limit, 3);
        assert!(manager.config_path().is_some());
        Ok(())
    }
}
