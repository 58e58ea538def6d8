//! Turning retrieved module sources into exposed values.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::rc::Rc;

use crate::cache::{BackgroundListener, Exposed, ModuleValues};
use crate::error::LoadError;
use crate::syntax::parse_module_source;
use crate::types::EntryPoint;

/// What a module's factory gets to see while it runs.
pub struct ModuleContext {
    name: String,
    load_dependencies: ModuleValues,
    pub(crate) listener: Option<BackgroundListener>,
}

impl ModuleContext {
    pub(crate) fn new(name: &str, load_dependencies: ModuleValues) -> Self {
        Self {
            name: name.to_string(),
            load_dependencies,
            listener: None,
        }
    }

    /// Name of the module being instantiated.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposed values of the module's load dependencies, all instantiated.
    pub fn load_dependencies(&self) -> &ModuleValues {
        &self.load_dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&Exposed> {
        self.load_dependencies.get(name)
    }

    /// A load dependency's value downcast to its concrete type.
    pub fn dependency_as<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        self.dependency(name)
            .and_then(|value| Rc::clone(value).downcast::<T>().ok())
    }

    /// Subscribe to the module's lazy dependencies. The listener fires once,
    /// after the load that instantiated this module has completed.
    pub fn on_background_load<F>(&mut self, listener: F)
    where
        F: FnOnce(Result<ModuleValues, LoadError>) + 'static,
    {
        if self.listener.is_some() {
            tracing::warn!(
                "Module '{}' registered a second background listener, replacing the first",
                self.name
            );
        }
        self.listener = Some(Box::new(listener));
    }
}

/// Instantiates a module from its retrieved source text.
///
/// Instantiation is synchronous; a module that needs asynchronous work
/// registers a background listener instead.
pub trait Instantiator {
    fn instantiate(&self, name: &str, source: &str, cx: &mut ModuleContext) -> Result<Exposed>;
}

pub type Factory = Box<dyn Fn(&mut ModuleContext) -> Result<Exposed>>;
pub type ExternalFactory = Box<dyn Fn() -> Result<Exposed>>;

/// Host-registered factories, dispatched on the entry point that the
/// retrieved source declares.
///
/// `onLoad(...) {}` bodies resolve to the factory registered under the
/// module name, `onLoad: 'symbol'` to the factory registered under
/// `symbol`, and `onLoad: require('pkg')` to the external package `pkg`.
#[derive(Default)]
pub struct FactoryTable {
    factories: HashMap<String, Factory>,
    externals: HashMap<String, ExternalFactory>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory<F>(mut self, symbol: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&mut ModuleContext) -> Result<Exposed> + 'static,
    {
        self.factories.insert(symbol.into(), Box::new(factory));
        self
    }

    pub fn with_external<F>(mut self, package: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Exposed> + 'static,
    {
        self.externals.insert(package.into(), Box::new(factory));
        self
    }
}

impl Instantiator for FactoryTable {
    fn instantiate(&self, name: &str, source: &str, cx: &mut ModuleContext) -> Result<Exposed> {
        let parsed = parse_module_source(source)
            .map_err(|e| anyhow!("Retrieved source is not a module definition: {e}"))?;
        if parsed.name != name {
            anyhow::bail!("Retrieved source defines '{}' instead", parsed.name);
        }

        match &parsed.entry_point {
            EntryPoint::Inline => {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| anyhow!("No factory registered for module '{name}'"))?;
                factory(cx)
            }
            EntryPoint::Named(symbol) => {
                let factory = self
                    .factories
                    .get(symbol)
                    .ok_or_else(|| anyhow!("No factory registered for entry point '{symbol}'"))?;
                factory(cx)
            }
            EntryPoint::External(package) => {
                let factory = self
                    .externals
                    .get(package)
                    .ok_or_else(|| anyhow!("External package '{package}' is not available"))?;
                factory()
            }
        }
    }
}
