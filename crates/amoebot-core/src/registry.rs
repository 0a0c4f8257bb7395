//! Algorithm registration.
//!
//! Hosts register named algorithm factories once at startup and instantiate
//! them by name when building systems; the data loader resolves its
//! `algorithm` field against a registry. The registry is an explicit object
//! handed to whatever needs it — there is no process-global algorithm table.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::algorithm::Algorithm;

type Factory = Box<dyn Fn() -> Box<dyn Algorithm> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no algorithm named '{0}' is registered")]
    NotFound(String),

    #[error("algorithm '{0}' is already registered")]
    Duplicate(String),
}

struct AlgorithmDef {
    name: String,
    description: String,
    factory: Factory,
}

/// Builder for an immutable [`AlgorithmRegistry`].
pub struct RegistryBuilder {
    defs: Vec<AlgorithmDef>,
    name_to_id: HashMap<String, usize>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder { defs: Vec::new(), name_to_id: HashMap::new() }
    }

    /// Registers a factory under a unique name.
    pub fn register<F>(
        &mut self,
        name: &str,
        description: &str,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Algorithm> + Send + Sync + 'static,
    {
        if self.name_to_id.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.name_to_id.insert(name.to_string(), self.defs.len());
        self.defs.push(AlgorithmDef {
            name: name.to_string(),
            description: description.to_string(),
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Freezes the registry.
    pub fn build(self) -> AlgorithmRegistry {
        AlgorithmRegistry { defs: self.defs, name_to_id: self.name_to_id }
    }
}

/// Immutable name-to-factory table. Frozen after build; safe to share.
pub struct AlgorithmRegistry {
    defs: Vec<AlgorithmDef>,
    name_to_id: HashMap<String, usize>,
}

impl AlgorithmRegistry {
    /// Produces a fresh instance of the named algorithm.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Algorithm>, RegistryError> {
        let &id = self
            .name_to_id
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok((self.defs[id].factory)())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(|def| def.name.as_str())
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.name_to_id
            .get(name)
            .map(|&id| self.defs[id].description.as_str())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.defs.iter().map(|def| def.name.as_str()))
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
