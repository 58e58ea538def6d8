//! Core type definitions shared across the crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a module's factory is located when its source is instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum EntryPoint {
    /// `onLoad(...) { ... }` or `onLoad: function (...) { ... }`; the
    /// factory is registered under the module's own name.
    Inline,
    /// `onLoad: 'symbol'` or `onLoad: symbol`
    Named(String),
    /// `onLoad: require('package')`, produced for external packages
    External(String),
}

/// The declarative contract authored per code unit.
#[derive(Clone)]
pub struct ModuleDefinition {
    pub name: String,
    pub load_dependency_names: Vec<String>,
    pub lazy_dependency_names: Vec<String>,
    pub entry_point: EntryPoint,
    pub source: String,
    /// File the definition was scanned from, `None` when synthesized.
    pub path: Option<PathBuf>,
}

impl ModuleDefinition {
    pub fn is_external(&self) -> bool {
        matches!(self.entry_point, EntryPoint::External(_))
    }

    /// Load and lazy dependency names together, load names first.
    pub fn all_dependency_names(&self) -> impl Iterator<Item = &String> {
        self.load_dependency_names
            .iter()
            .chain(self.lazy_dependency_names.iter())
    }

    pub(crate) fn origin(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "<synthesized>".to_string(),
        }
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("load_dependency_names", &self.load_dependency_names)
            .field("lazy_dependency_names", &self.lazy_dependency_names)
            .field("entry_point", &self.entry_point)
            .field("path", &self.path)
            .finish()
    }
}

/// Which tier a dependency edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Load,
    Lazy,
}

/// Client-visible dependency information for a single module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(default)]
    pub load_dependencies: Vec<String>,
    #[serde(default)]
    pub lazy_dependencies: Vec<String>,
}

impl From<&ModuleDefinition> for ManifestEntry {
    fn from(definition: &ModuleDefinition) -> Self {
        Self {
            load_dependencies: definition.load_dependency_names.clone(),
            lazy_dependencies: definition.lazy_dependency_names.clone(),
        }
    }
}

/// Mapping from module name to its dependency names.
///
/// This is what the loading runtime needs to plan a load, and what the
/// serving boundary hands to remote clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    modules: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: ManifestEntry) {
        self.modules.insert(name.into(), entry);
    }

    /// Add a module with the given load and lazy dependency names.
    pub fn with_module(mut self, name: &str, load: &[&str], lazy: &[&str]) -> Self {
        self.insert(
            name,
            ManifestEntry {
                load_dependencies: load.iter().map(|s| s.to_string()).collect(),
                lazy_dependencies: lazy.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.modules.keys()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
