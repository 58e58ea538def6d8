use anyhow::Result;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::{
    BackgroundState, Exposed, InstanceCache, ModuleInstance, ModuleState, ModuleValues,
};
use crate::error::LoadError;
use crate::factory::{Instantiator, ModuleContext};
use crate::registry::ModuleRegistry;
use crate::source::{RegistrySource, SourceMap, SourceProvider};
use crate::types::{Manifest, ManifestEntry};

pub type LoadFuture = Pin<Box<dyn Future<Output = Result<ModuleValues, LoadError>>>>;

/// Tiered module loader.
///
/// Cloning a `Runtime` is cheap and every clone shares the same instance
/// cache. The runtime is single-threaded: loads must be driven from within
/// a [`tokio::task::LocalSet`], which is where background loads are spawned.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

struct Inner {
    manifest: Manifest,
    provider: Box<dyn SourceProvider>,
    instantiator: Box<dyn Instantiator>,
    cache: RefCell<InstanceCache>,
    /// Names whose sources are being fetched by an in-flight load
    in_flight: RefCell<HashMap<String, watch::Receiver<bool>>>,
    /// Number of background loads not yet delivered
    background: watch::Sender<usize>,
}

impl Runtime {
    /// Create a RuntimeBuilder for modules described by `manifest`
    pub fn builder(manifest: Manifest) -> RuntimeBuilder {
        RuntimeBuilder::new(manifest)
    }

    /// Create a RuntimeBuilder that serves sources from an in-process registry
    pub fn for_registry(registry: Arc<ModuleRegistry>) -> RuntimeBuilder {
        RuntimeBuilder::new(registry.manifest()).source_provider(RegistrySource::new(registry))
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    /// Load modules and everything they eagerly depend on.
    ///
    /// Names missing from the manifest are a programming error and fail
    /// right away. Everything else (retrieval and instantiation failures)
    /// is reported by the returned future. Lazy dependencies discovered
    /// along the way are loaded after the future has completed.
    pub fn load<I, S>(&self, names: I) -> Result<LoadFuture, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut requested: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !requested.contains(&name) {
                requested.push(name);
            }
        }
        if let Some(unknown) = requested.iter().find(|name| !self.inner.manifest.contains(name)) {
            return Err(LoadError::UnknownModule(unknown.clone()));
        }
        let closure = self.load_closure(&requested)?;

        let runtime = self.clone();
        Ok(Box::pin(
            async move { runtime.resolve(requested, closure).await },
        ))
    }

    /// Callback form of [`Runtime::load`]. `on_complete` is invoked exactly
    /// once, from a task spawned on the current `LocalSet`.
    pub fn load_with<I, S, F>(&self, names: I, on_complete: F) -> Result<(), LoadError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Result<ModuleValues, LoadError>) + 'static,
    {
        let load = self.load(names)?;
        tokio::task::spawn_local(async move { on_complete(load.await) });
        Ok(())
    }

    /// Exposed value of an instantiated module.
    pub fn get(&self, name: &str) -> Option<Exposed> {
        self.inner
            .cache
            .borrow()
            .get(name)
            .map(|instance| Rc::clone(&instance.exposed))
    }

    pub fn state(&self, name: &str) -> ModuleState {
        let cache = self.inner.cache.borrow();
        if cache.has(name) {
            ModuleState::Ready
        } else if cache.is_instantiating(name) {
            ModuleState::Instantiating
        } else if self.inner.in_flight.borrow().contains_key(name) {
            ModuleState::FetchPending
        } else {
            ModuleState::Unregistered
        }
    }

    /// Background progress of an instantiated module.
    pub fn background_state(&self, name: &str) -> Option<BackgroundState> {
        self.inner
            .cache
            .borrow()
            .get(name)
            .map(|instance| instance.background)
    }

    pub fn instantiated_count(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Wait until every scheduled background load, including the ones it
    /// schedules in turn, has delivered to its listeners.
    pub async fn background_idle(&self) {
        let mut pending = self.inner.background.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    fn entry(&self, name: &str) -> Result<&ManifestEntry, LoadError> {
        self.inner
            .manifest
            .get(name)
            .ok_or_else(|| LoadError::UnknownModule(name.to_string()))
    }

    /// All modules that must be instantiated for `requested`, following load
    /// edges only, each after its dependencies.
    fn load_closure(&self, requested: &[String]) -> Result<Vec<String>, LoadError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();

        for root in requested {
            let mut stack = vec![(root.clone(), false)];
            while let Some((name, expanded)) = stack.pop() {
                if expanded {
                    order.push(name);
                    continue;
                }
                if !visited.insert(name.clone()) {
                    continue;
                }
                let entry = self.entry(&name)?;
                stack.push((name, true));
                for dependency in entry.load_dependencies.iter().rev() {
                    if !visited.contains(dependency) {
                        stack.push((dependency.clone(), false));
                    }
                }
            }
        }
        Ok(order)
    }

    async fn resolve(
        self,
        requested: Vec<String>,
        closure: Vec<String>,
    ) -> Result<ModuleValues, LoadError> {
        // Split the closure without yielding, so the claim below is visible
        // to every load that starts after this one.
        let mut missing = Vec::new();
        let mut waits = Vec::new();
        {
            let cache = self.inner.cache.borrow();
            let in_flight = self.inner.in_flight.borrow();
            for name in &closure {
                if cache.has(name) {
                    continue;
                }
                match in_flight.get(name) {
                    Some(pending) => waits.push(pending.clone()),
                    None => missing.push(name.clone()),
                }
            }
        }
        let claim = FetchClaim::new(&self.inner, &missing);

        let sources = if missing.is_empty() {
            SourceMap::new()
        } else {
            tracing::debug!("Fetching sources for {missing:?}");
            self.inner
                .provider
                .fetch(&missing)
                .await
                .map_err(|e| LoadError::Retrieval(format!("{e:#}")))?
        };

        for mut pending in waits {
            // An error only means the other load gave up; the sources it was
            // fetching are then reported missing below.
            let _ = pending.wait_for(|done| *done).await;
        }

        let mut fresh = Vec::new();
        let outcome = requested
            .iter()
            .try_for_each(|name| self.instantiate_tree(name, &sources, &mut fresh));
        drop(claim);

        self.schedule_background(fresh);
        outcome?;

        let cache = self.inner.cache.borrow();
        let values = requested
            .iter()
            .filter_map(|name| {
                cache
                    .get(name)
                    .map(|instance| (name.clone(), Rc::clone(&instance.exposed)))
            })
            .collect();
        Ok(values)
    }

    /// Post-order instantiation of `root` and its load dependencies.
    fn instantiate_tree(
        &self,
        root: &str,
        sources: &SourceMap,
        fresh: &mut Vec<String>,
    ) -> Result<(), LoadError> {
        let mut stack = vec![(root.to_string(), false)];
        while let Some((name, expanded)) = stack.pop() {
            if self.inner.cache.borrow().has(&name) {
                continue;
            }
            if expanded {
                self.instantiate_one(&name, sources)?;
                fresh.push(name);
                continue;
            }
            let entry = self.entry(&name)?;
            stack.push((name, true));
            for dependency in entry.load_dependencies.iter().rev() {
                stack.push((dependency.clone(), false));
            }
        }
        Ok(())
    }

    fn instantiate_one(&self, name: &str, sources: &SourceMap) -> Result<(), LoadError> {
        let entry = self.entry(name)?.clone();
        let instantiation_error = |message: String| LoadError::Instantiation {
            module: name.to_string(),
            message,
        };

        let source = sources.get(name).ok_or_else(|| {
            LoadError::Retrieval(format!("Source for module '{name}' was not retrieved"))
        })?;

        let load_dependencies = {
            let mut cache = self.inner.cache.borrow_mut();
            cache
                .begin(name)
                .map_err(|e| instantiation_error(e.to_string()))?;
            let mut values = ModuleValues::with_capacity(entry.load_dependencies.len());
            for dependency in &entry.load_dependencies {
                let Some(instance) = cache.get(dependency) else {
                    cache.abandon(name);
                    return Err(instantiation_error(format!(
                        "Load dependency '{dependency}' is not instantiated"
                    )));
                };
                values.insert(dependency.clone(), Rc::clone(&instance.exposed));
            }
            values
        };

        tracing::debug!("Instantiating module '{name}'");
        let mut cx = ModuleContext::new(name, load_dependencies);
        // The factory runs without any borrow of the cache held.
        let result = self.inner.instantiator.instantiate(name, source, &mut cx);

        let mut cache = self.inner.cache.borrow_mut();
        match result {
            Ok(exposed) => {
                let background = if entry.lazy_dependencies.is_empty() {
                    BackgroundState::NoLazyDependencies
                } else {
                    BackgroundState::Pending
                };
                let instance = ModuleInstance {
                    name: name.to_string(),
                    dependencies: entry,
                    exposed,
                    listener: cx.listener.take(),
                    background,
                };
                cache
                    .put(name, instance)
                    .map_err(|e| instantiation_error(e.to_string()))
            }
            Err(e) => {
                cache.abandon(name);
                Err(instantiation_error(format!("{e:#}")))
            }
        }
    }

    /// Load the lazy dependencies of freshly instantiated modules on a later
    /// turn of the scheduler.
    fn schedule_background(&self, fresh: Vec<String>) {
        let mut waiting: Vec<(String, Vec<String>)> = Vec::new();
        let mut lazy_names: Vec<String> = Vec::new();
        for name in fresh {
            let Some(entry) = self.inner.manifest.get(&name) else {
                continue;
            };
            if entry.lazy_dependencies.is_empty() {
                continue;
            }
            for lazy in &entry.lazy_dependencies {
                if !lazy_names.contains(lazy) {
                    lazy_names.push(lazy.clone());
                }
            }
            waiting.push((name, entry.lazy_dependencies.clone()));
        }
        if waiting.is_empty() {
            return;
        }

        self.inner.background.send_modify(|count| *count += 1);
        let runtime = self.clone();
        tokio::task::spawn_local(async move {
            runtime.resolve_background(waiting, lazy_names).await;
            runtime.inner.background.send_modify(|count| *count -= 1);
        });
    }

    async fn resolve_background(&self, waiting: Vec<(String, Vec<String>)>, lazy_names: Vec<String>) {
        tracing::debug!("Loading background dependencies {lazy_names:?}");
        let outcome = match self.load(lazy_names) {
            Ok(load) => load.await,
            Err(e) => Err(e),
        };

        for (name, lazy_dependencies) in waiting {
            let listener = {
                let mut cache = self.inner.cache.borrow_mut();
                let Some(instance) = cache.get_mut(&name) else {
                    continue;
                };
                instance.background = if outcome.is_ok() {
                    BackgroundState::Resolved
                } else {
                    BackgroundState::Failed
                };
                instance.listener.take()
            };

            let delivery = match &outcome {
                Ok(values) => Ok(lazy_dependencies
                    .iter()
                    .filter_map(|lazy| {
                        values
                            .get(lazy)
                            .map(|value| (lazy.clone(), Rc::clone(value)))
                    })
                    .collect()),
                Err(e) => Err(e.clone()),
            };

            match listener {
                Some(listener) => listener(delivery),
                None => {
                    if let Err(e) = delivery {
                        tracing::warn!(
                            "Background load for module '{name}' failed with no listener: {e}"
                        );
                    }
                }
            }
        }
    }
}

/// Marks names as fetch-pending for the lifetime of one load.
///
/// Dropping the claim wakes every load that waits on one of its names.
struct FetchClaim<'a> {
    inner: &'a Inner,
    names: Vec<String>,
    done: watch::Sender<bool>,
}

impl<'a> FetchClaim<'a> {
    fn new(inner: &'a Inner, names: &[String]) -> Self {
        let (done, pending) = watch::channel(false);
        let mut in_flight = inner.in_flight.borrow_mut();
        for name in names {
            in_flight.insert(name.clone(), pending.clone());
        }
        Self {
            inner,
            names: names.to_vec(),
            done,
        }
    }
}

impl Drop for FetchClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.borrow_mut();
        for name in &self.names {
            in_flight.remove(name);
        }
        let _ = self.done.send(true);
    }
}

/// Builder for configuring and creating a Runtime
pub struct RuntimeBuilder {
    manifest: Manifest,
    provider: Option<Box<dyn SourceProvider>>,
    instantiator: Option<Box<dyn Instantiator>>,
}

impl RuntimeBuilder {
    fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            provider: None,
            instantiator: None,
        }
    }

    /// Where missing module sources are fetched from
    pub fn source_provider(mut self, provider: impl SourceProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// How retrieved sources become exposed values
    pub fn instantiator(mut self, instantiator: impl Instantiator + 'static) -> Self {
        self.instantiator = Some(Box::new(instantiator));
        self
    }

    /// Build the Runtime
    pub fn build(self) -> Result<Runtime> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Runtime requires a source provider"))?;
        let instantiator = self
            .instantiator
            .ok_or_else(|| anyhow::anyhow!("Runtime requires an instantiator"))?;
        let (background, _) = watch::channel(0);
        Ok(Runtime {
            inner: Rc::new(Inner {
                manifest: self.manifest,
                provider,
                instantiator,
                cache: RefCell::new(InstanceCache::new()),
                in_flight: RefCell::new(HashMap::new()),
                background,
            }),
        })
    }
}
