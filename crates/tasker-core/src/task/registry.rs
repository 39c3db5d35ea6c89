//! Name-keyed registry of task definitions.
//!
//! Populated once at startup and then shared read-only with the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::definition::{DefinitionError, TaskDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task definition '{0}' is already registered")]
    Duplicate(String),

    #[error("task definition '{name}' is invalid: {source}")]
    Invalid {
        name: String,
        #[source]
        source: DefinitionError,
    },
}

/// Task definitions keyed by name.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    definitions: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a definition. Names must be unique.
    pub fn register(&mut self, definition: TaskDefinition) -> Result<(), RegistryError> {
        definition
            .validate()
            .map_err(|source| RegistryError::Invalid {
                name: definition.name.clone(),
                source,
            })?;

        if self.definitions.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }

        tracing::debug!(
            task = definition.name.as_str(),
            steps = definition.steps.len(),
            max_retry = definition.max_retry,
            "registered task definition"
        );
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
