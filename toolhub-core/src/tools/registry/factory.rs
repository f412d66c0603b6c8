use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::ToolError;
use crate::catalog::ToolDescriptor;
use crate::tools::traits::Tool;

/// Builds a live handle from its descriptor
pub type ToolConstructor = Arc<dyn Fn(&ToolDescriptor) -> Result<Arc<dyn Tool>> + Send + Sync>;

/// Startup-time map from implementation type name to constructor
#[derive(Clone, Default)]
pub struct ToolFactory {
    constructors: HashMap<String, ToolConstructor>,
}

impl ToolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory pre-populated with the builtin tool types
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        crate::tools::builtin::register_builtins(&mut factory);
        factory
    }

    pub fn register<F>(&mut self, implementation_type: impl Into<String>, constructor: F)
    where
        F: Fn(&ToolDescriptor) -> Result<Arc<dyn Tool>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(implementation_type.into(), Arc::new(constructor));
    }

    pub fn with<F>(mut self, implementation_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ToolDescriptor) -> Result<Arc<dyn Tool>> + Send + Sync + 'static,
    {
        self.register(implementation_type, constructor);
        self
    }

    pub fn supports(&self, implementation_type: &str) -> bool {
        self.constructors.contains_key(implementation_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn construct(&self, descriptor: &ToolDescriptor) -> Result<Arc<dyn Tool>> {
        let Some(constructor) = self.constructors.get(&descriptor.implementation_type) else {
            return Err(ToolError::Config(format!(
                "unknown implementation type '{}' for tool '{}'",
                descriptor.implementation_type, descriptor.name
            ))
            .into());
        };
        constructor(descriptor)
    }
}

impl fmt::Debug for ToolFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolFactory")
            .field("types", &self.types())
            .finish()
    }
}
