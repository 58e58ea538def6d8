//! Dyn Loader
//!
//! Static analysis of module definitions into a validated dependency graph,
//! and a runtime that loads modules in tiers: eager dependencies before
//! their dependents, lazy dependencies after the requested modules are
//! delivered.

pub use cache::{BackgroundState, Exposed, InstanceCache, ModuleState, ModuleValues};
pub use config::ProjectConfig;
pub use error::{CacheError, DefinitionError, LoadError, RegistryError};
pub use factory::{FactoryTable, Instantiator, ModuleContext};
pub use graph::{GraphBuilder, ModuleGraph};
pub use registry::{LinkedModule, ModuleRegistry};
pub use runtime::{LoadFuture, Runtime, RuntimeBuilder};
pub use source::{HttpSource, RegistrySource, SourceProvider};
pub use types::{DependencyKind, EntryPoint, Manifest, ManifestEntry, ModuleDefinition};

pub mod cache;
pub mod config;
pub mod error;
pub mod externals;
pub mod factory;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod runtime;
pub mod source;
pub mod syntax;
pub mod types;
pub mod wire;
