// src/resource/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::resource::plugin::ResourcePlugin;

/// Builds a fresh plugin instance for one resource.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn ResourcePlugin> + Send + Sync>;

/// Explicit map from type name to plugin factory, filled at startup.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `type_name`.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ResourcePlugin> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(type_name = %type_name, "registering resource type");
        self.factories.insert(type_name, Arc::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Build a plugin for `type_name`.
    pub fn instantiate(&self, type_name: &str) -> Result<Box<dyn ResourcePlugin>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            EngineError::Validation(format!("unknown resource type '{type_name}'"))
        })?;
        Ok(factory())
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}
