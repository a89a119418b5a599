//! Lazily instantiated agents keyed by identifier.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::definition::{Agent, AgentDefinition};
use crate::error::{FlowError, Result};

/// Agent definitions plus a memoizing cache of runnable handles.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    definitions: HashMap<String, AgentDefinition>,
    cache: HashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its name, replacing any earlier one.
    pub fn register(mut self, definition: AgentDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: AgentDefinition) {
        self.cache.remove(&definition.name);
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn definition(&self, id: &str) -> Option<&AgentDefinition> {
        self.definitions.get(id)
    }

    /// Whether the handle for `id` has been built.
    pub fn is_instantiated(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Get the runnable handle, building it on first access.
    pub fn get(&mut self, id: &str) -> Result<Arc<Agent>> {
        if let Some(agent) = self.cache.get(id) {
            return Ok(Arc::clone(agent));
        }
        let definition = self
            .definitions
            .get(id)
            .ok_or_else(|| FlowError::UnknownAgent(id.to_string()))?;
        debug!(agent = %id, "instantiating agent");
        let agent = Arc::new(definition.instantiate());
        self.cache.insert(id.to_string(), Arc::clone(&agent));
        Ok(agent)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<AgentDefinition> for AgentRegistry {
    fn from_iter<I: IntoIterator<Item = AgentDefinition>>(iter: I) -> Self {
        let mut registry = Self::new();
        for definition in iter {
            registry.insert(definition);
        }
        registry
    }
}
