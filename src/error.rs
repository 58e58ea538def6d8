//! Error types for scanning, graph validation and loading.

use std::path::PathBuf;
use thiserror::Error;

/// A source file that does not describe a well-formed module definition.
///
/// These never abort a project scan: the file is skipped with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("More than one \"{property}\" property defined")]
    DuplicateProperty { property: String },

    #[error("Invalid dependency in \"{property}\": {reason}")]
    InvalidDependency { property: String, reason: String },

    #[error("Missing module name: {reason}")]
    MissingName { reason: String },

    #[error("Missing \"onLoad\" entry point")]
    MissingEntryPoint,

    #[error("Not a module definition: {reason}")]
    NotAModule { reason: String },
}

/// Failures that make a whole registry build fail.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate module name '{name}' (defined in {first} and {second})")]
    DuplicateModule {
        name: String,
        first: String,
        second: String,
    },

    #[error("Module '{module}' depends on unknown or missing dependency '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error(
        "Cyclic dependency detected! Module '{module}' has a dependency '{dependency}' that is also a parent"
    )]
    CyclicDependency { module: String, dependency: String },

    #[error("Unknown module '{name}'")]
    UnknownModule { name: String },

    #[error("Failed to synthesize external package '{name}': {source}")]
    ExternalSynthesis {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read project at {path}: {message}")]
    Project { path: PathBuf, message: String },
}

/// Failures reported by the loading runtime.
///
/// `Clone` so a single background failure can be delivered to every
/// listener that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    #[error("Failed to retrieve module sources: {0}")]
    Retrieval(String),

    #[error("Failed to instantiate module '{module}': {message}")]
    Instantiation { module: String, message: String },
}

/// The instance cache refuses to hold two instances for one name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Module '{0}' is already instantiated")]
    AlreadyInstantiated(String),

    #[error("Module '{0}' is already being instantiated")]
    InProgress(String),
}
