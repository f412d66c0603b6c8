//! Static tool descriptors and the catalog they are loaded into
//!
//! Descriptors are grouped by category on disk, one file per category
//! (`<dir>/<category>.json` or `<dir>/<category>.toml`). A load request names
//! categories or individual tools; both are merged into one [`Catalog`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate tool name '{name}' in catalog load")]
    DuplicateTool { name: String },

    #[error("unknown category or tool name: {}", .names.join(", "))]
    UnknownNames { names: Vec<String> },

    #[error("failed to read descriptor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse descriptor file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

fn default_true() -> bool {
    true
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// The static declaration of one tool. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    /// Key into the registry's factory map
    #[serde(rename = "type")]
    pub implementation_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_schema", alias = "parameters")]
    pub parameter_schema: Value,

    #[serde(default)]
    pub supports_streaming: bool,

    #[serde(default = "default_true")]
    pub cacheable: bool,

    /// Results of this tool never go through the hook manager
    #[serde(default)]
    pub hook_exempt: bool,

    /// Filled from the file the descriptor came from when absent
    #[serde(default)]
    pub category: Option<String>,

    /// Implementation-specific fields (endpoints, limits, credential env vars)
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, implementation_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation_type: implementation_type.into(),
            description: String::new(),
            parameter_schema: default_schema(),
            supports_streaming: false,
            cacheable: true,
            hook_exempt: false,
            category: None,
            settings: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = schema;
        self
    }

    pub fn with_streaming(mut self, supports_streaming: bool) -> Self {
        self.supports_streaming = supports_streaming;
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_hook_exempt(mut self, hook_exempt: bool) -> Self {
        self.hook_exempt = hook_exempt;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    /// Text indexed for tool discovery
    pub fn search_text(&self) -> String {
        if self.description.is_empty() {
            self.name.replace('_', " ")
        } else {
            format!("{} {}", self.name.replace('_', " "), self.description)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    List(Vec<ToolDescriptor>),
    Table { tools: Vec<ToolDescriptor> },
}

impl DescriptorFile {
    fn into_descriptors(self) -> Vec<ToolDescriptor> {
        match self {
            DescriptorFile::List(tools) | DescriptorFile::Table { tools } => tools,
        }
    }
}

/// Where descriptors come from: category name to its descriptors
#[derive(Debug, Clone, Default)]
pub struct DescriptorSource {
    categories: BTreeMap<String, Vec<ToolDescriptor>>,
}

impl DescriptorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(
        mut self,
        category: impl Into<String>,
        descriptors: Vec<ToolDescriptor>,
    ) -> Self {
        self.add_category(category, descriptors);
        self
    }

    pub fn add_category(&mut self, category: impl Into<String>, descriptors: Vec<ToolDescriptor>) {
        let category = category.into();
        let descriptors = descriptors
            .into_iter()
            .map(|mut descriptor| {
                if descriptor.category.is_none() {
                    descriptor.category = Some(category.clone());
                }
                descriptor
            })
            .collect();
        self.categories.insert(category, descriptors);
    }

    /// Read every `*.json` / `*.toml` file of `dir` as one category named after the file stem
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let mut source = Self::new();
        if !dir.exists() {
            debug!(dir = %dir.display(), "descriptor directory missing; empty source");
            return Ok(source);
        }

        let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("json") | Some("toml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(category) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let descriptors = Self::read_file(&path)?;
            source.add_category(category.to_string(), descriptors);
        }

        Ok(source)
    }

    fn read_file(path: &Path) -> Result<Vec<ToolDescriptor>, CatalogError> {
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| CatalogError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let file: DescriptorFile = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|err| parse_error(err.to_string()))?,
            _ => serde_json::from_str(&content).map_err(|err| parse_error(err.to_string()))?,
        };
        Ok(file.into_descriptors())
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    fn category(&self, name: &str) -> Option<&[ToolDescriptor]> {
        self.categories.get(name).map(Vec::as_slice)
    }

    fn find_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.categories
            .values()
            .flat_map(|descriptors| descriptors.iter())
            .find(|descriptor| descriptor.name == name)
    }
}

/// The loaded set of descriptors, unique by name, in load order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    descriptors: Vec<ToolDescriptor>,
    lookup: BTreeMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog directly from descriptors, rejecting duplicate names
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.extend(descriptors)?;
        Ok(catalog)
    }

    /// Resolve each name as a category first, then as an individual tool.
    /// An empty `names` slice loads every category.
    pub fn load(source: &DescriptorSource, names: &[String]) -> Result<Self, CatalogError> {
        let requested: Vec<String> = if names.is_empty() {
            source.category_names()
        } else {
            names.to_vec()
        };

        let mut selected: Vec<ToolDescriptor> = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        let mut seen_requests: HashSet<&str> = HashSet::new();

        for name in &requested {
            if !seen_requests.insert(name.as_str()) {
                continue;
            }
            if let Some(descriptors) = source.category(name) {
                selected.extend(descriptors.iter().cloned());
            } else if let Some(descriptor) = source.find_tool(name) {
                selected.push(descriptor.clone());
            } else {
                unknown.push(name.clone());
            }
        }

        if !unknown.is_empty() {
            return Err(CatalogError::UnknownNames { names: unknown });
        }

        let catalog = Self::from_descriptors(selected)?;
        info!(tools = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Add a later load. Names already present are rejected and nothing is merged.
    pub fn merge(&mut self, other: Catalog) -> Result<(), CatalogError> {
        if let Some(duplicate) = other
            .descriptors
            .iter()
            .find(|descriptor| self.lookup.contains_key(&descriptor.name))
        {
            return Err(CatalogError::DuplicateTool {
                name: duplicate.name.clone(),
            });
        }
        self.extend(other.descriptors)
    }

    fn extend(
        &mut self,
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<(), CatalogError> {
        let mut staged: Vec<ToolDescriptor> = Vec::new();
        let mut staged_names: HashSet<String> = HashSet::new();
        for descriptor in descriptors {
            if self.lookup.contains_key(&descriptor.name)
                || !staged_names.insert(descriptor.name.clone())
            {
                return Err(CatalogError::DuplicateTool {
                    name: descriptor.name,
                });
            }
            staged.push(descriptor);
        }

        for descriptor in staged {
            self.lookup
                .insert(descriptor.name.clone(), self.descriptors.len());
            self.descriptors.push(descriptor);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.lookup
            .get(name)
            .and_then(|index| self.descriptors.get(*index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
