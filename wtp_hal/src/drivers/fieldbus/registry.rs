//! Fieldbus backend registry.
//!
//! Maps backend names (the `[fieldbus] backend` config key) to master
//! factories. Built by the controller factory at startup and passed by value;
//! there is no global registration.

use std::collections::HashMap;

use super::bus::{FieldbusError, FieldbusMaster};
use super::virtual_bus;

/// Creates a closed fieldbus master.
pub type MasterFactory = fn() -> Box<dyn FieldbusMaster>;

/// Registry of available fieldbus backends.
pub struct FieldbusRegistry {
    factories: HashMap<&'static str, MasterFactory>,
}

impl FieldbusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `"virtual"` backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("virtual", virtual_bus::create_master);
        registry
    }

    /// Register a backend.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: MasterFactory) {
        if self.factories.contains_key(name) {
            panic!("Fieldbus backend '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Create a master by backend name.
    ///
    /// # Errors
    /// Returns `FieldbusError::UnknownBackend` if nothing is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn FieldbusMaster>, FieldbusError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| FieldbusError::UnknownBackend(name.to_string()))?;
        Ok(factory())
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for FieldbusRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
