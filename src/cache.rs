//! Table of instantiated modules owned by a runtime.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{CacheError, LoadError};
use crate::types::ManifestEntry;

/// The value a module's factory returned.
pub type Exposed = Rc<dyn Any>;

/// Module name -> exposed value
pub type ModuleValues = HashMap<String, Exposed>;

/// Callback a module registers to receive its lazy dependencies.
pub type BackgroundListener = Box<dyn FnOnce(Result<ModuleValues, LoadError>)>;

/// Lifecycle of a module name within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unregistered,
    FetchPending,
    Instantiating,
    Ready,
}

/// Progress of a ready module's lazy dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundState {
    NoLazyDependencies,
    Pending,
    Resolved,
    Failed,
}

pub struct ModuleInstance {
    pub name: String,
    pub dependencies: ManifestEntry,
    pub exposed: Exposed,
    pub(crate) listener: Option<BackgroundListener>,
    pub background: BackgroundState,
}

impl ModuleInstance {
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("has_listener", &self.listener.is_some())
            .field("background", &self.background)
            .finish()
    }
}

enum Slot {
    Instantiating,
    Ready(ModuleInstance),
}

/// Each name is instantiated at most once; entries are never evicted.
#[derive(Default)]
pub struct InstanceCache {
    slots: HashMap<String, Slot>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleInstance> {
        match self.slots.get(name) {
            Some(Slot::Ready(instance)) => Some(instance),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ModuleInstance> {
        match self.slots.get_mut(name) {
            Some(Slot::Ready(instance)) => Some(instance),
            _ => None,
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_instantiating(&self, name: &str) -> bool {
        matches!(self.slots.get(name), Some(Slot::Instantiating))
    }

    /// Store a ready instance. Fails if `name` is already instantiated.
    pub fn put(&mut self, name: &str, instance: ModuleInstance) -> Result<(), CacheError> {
        if self.has(name) {
            return Err(CacheError::AlreadyInstantiated(name.to_string()));
        }
        self.slots.insert(name.to_string(), Slot::Ready(instance));
        Ok(())
    }

    /// Claim `name` for a factory run that is about to start.
    pub(crate) fn begin(&mut self, name: &str) -> Result<(), CacheError> {
        match self.slots.get(name) {
            Some(Slot::Ready(_)) => Err(CacheError::AlreadyInstantiated(name.to_string())),
            Some(Slot::Instantiating) => Err(CacheError::InProgress(name.to_string())),
            None => {
                self.slots.insert(name.to_string(), Slot::Instantiating);
                Ok(())
            }
        }
    }

    /// Release a claim whose factory failed.
    pub(crate) fn abandon(&mut self, name: &str) {
        if self.is_instantiating(name) {
            self.slots.remove(name);
        }
    }

    /// Number of ready instances.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
