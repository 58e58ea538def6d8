#![allow(dead_code)]

use anyhow::Result;
use dyn_loader::source::{SourceFuture, SourceMap};
use dyn_loader::{
    Exposed, FactoryTable, Manifest, ModuleGraph, ModuleRegistry, SourceProvider,
};
use std::cell::RefCell;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

pub struct TestProject(TempDir);

impl Deref for TestProject {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

impl TestProject {
    pub fn new() -> Self {
        TestProject(tempfile::tempdir().unwrap())
    }

    pub fn write(&self, relative: &str, content: &str) -> &Self {
        let path = self.0.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        self
    }

    pub fn module(&self, relative: &str, name: &str, load: &[&str], lazy: &[&str]) -> &Self {
        self.write(relative, &module_source(name, load, lazy))
    }

    /// Builds the graph with the wrapper cache inside the project.
    pub fn build(&self) -> Result<ModuleGraph, dyn_loader::RegistryError> {
        ModuleGraph::builder()
            .project(self.0.path())
            .cache_dir(self.0.path().join(".dyn-cache"))
            .build()
    }

    pub fn registry(&self) -> ModuleRegistry {
        let graph = self.build();
        assert!(graph.is_ok(), "graph build failed with: {:?}", graph.err());
        ModuleRegistry::new(graph.unwrap())
    }
}

pub fn module_source(name: &str, load: &[&str], lazy: &[&str]) -> String {
    let list = |names: &[&str]| {
        names
            .iter()
            .map(|n| format!("'{n}'"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"dyn.register({{
  name: '{name}',
  loadDependencies: [{}],
  lazyDependencies: [{}],
  onLoad(err, loadDeps, onBackgroundLoad) {{
    return {{ name: '{name}' }};
  }}
}});
"#,
        list(load),
        list(lazy)
    )
}

/// Source provider over an in-memory map that records every batch it serves.
#[derive(Clone, Default)]
pub struct RecordingSource {
    sources: Rc<RefCell<SourceMap>>,
    batches: Rc<RefCell<Vec<Vec<String>>>>,
    failing: Rc<RefCell<Option<String>>>,
}

impl RecordingSource {
    pub fn for_manifest(manifest: &Manifest) -> Self {
        let source = Self::default();
        for name in manifest.names() {
            source
                .sources
                .borrow_mut()
                .insert(name.clone(), module_source(name, &[], &[]));
        }
        source
    }

    /// Every later fetch fails with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failing.borrow_mut() = Some(message.to_string());
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.borrow().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.batches.borrow().len()
    }
}

impl SourceProvider for RecordingSource {
    fn fetch<'a>(&'a self, names: &'a [String]) -> SourceFuture<'a> {
        Box::pin(async move {
            let mut batch = names.to_vec();
            batch.sort();
            self.batches.borrow_mut().push(batch);
            // Suspend like a real transport would.
            tokio::task::yield_now().await;
            if let Some(message) = self.failing.borrow().clone() {
                anyhow::bail!(message);
            }
            let sources = self.sources.borrow();
            names
                .iter()
                .map(|name| {
                    sources
                        .get(name)
                        .map(|source| (name.clone(), source.clone()))
                        .ok_or_else(|| anyhow::anyhow!("Unknown module '{name}'"))
                })
                .collect()
        })
    }
}

/// Factories for every manifest entry that expose the module name as a
/// `String` and log the order they ran in.
pub fn recording_factories(manifest: &Manifest) -> (FactoryTable, Rc<RefCell<Vec<String>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut table = FactoryTable::new();
    for name in manifest.names() {
        let name = name.clone();
        let log = Rc::clone(&log);
        table = table.with_factory(name.clone(), move |_cx| {
            log.borrow_mut().push(name.clone());
            Ok(Rc::new(name.clone()) as Exposed)
        });
    }
    (table, log)
}

pub fn exposed_name(value: &Exposed) -> String {
    value
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| panic!("exposed value is not a String"))
}

/// a -> b -> d eagerly, c lazily needs g, e and f stand alone.
pub fn sample_manifest() -> Manifest {
    Manifest::new()
        .with_module("a", &["b"], &[])
        .with_module("b", &["d"], &[])
        .with_module("c", &[], &["g"])
        .with_module("d", &[], &[])
        .with_module("e", &[], &[])
        .with_module("f", &[], &[])
        .with_module("g", &[], &[])
}
