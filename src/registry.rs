use std::collections::HashMap;
use std::path::Path;

use crate::error::RegistryError;
use crate::graph::{ModuleGraph, Node};
use crate::types::{DependencyKind, Manifest, ManifestEntry, ModuleDefinition};

/// A module definition together with its resolved dependencies.
#[derive(Debug, Clone)]
pub struct LinkedModule<'a> {
    pub definition: &'a ModuleDefinition,
    pub load_dependencies: Vec<&'a ModuleDefinition>,
    pub lazy_dependencies: Vec<&'a ModuleDefinition>,
}

/// Read-only mapping from module name to linked definition, built once per
/// project scan.
#[derive(Debug)]
pub struct ModuleRegistry {
    graph: ModuleGraph,
}

impl ModuleRegistry {
    pub fn new(graph: ModuleGraph) -> Self {
        Self { graph }
    }

    /// Scan, link and validate the project rooted at `root`.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        ModuleGraph::builder()
            .project(root.as_ref())
            .build()
            .map(Self::new)
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graph.get_node_index(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDefinition> {
        self.graph.get(name)
    }

    /// The definition of `name` with its dependency names resolved.
    pub fn module(&self, name: &str) -> Option<LinkedModule<'_>> {
        let index = self.graph.get_node_index(name)?;
        let resolve = |kind: DependencyKind| -> Vec<&ModuleDefinition> {
            self.graph
                .dependencies(index, kind)
                .into_iter()
                .map(|dependency| self.graph[dependency].definition())
                .collect()
        };
        Some(LinkedModule {
            definition: self.graph[index].definition(),
            load_dependencies: resolve(DependencyKind::Load),
            lazy_dependencies: resolve(DependencyKind::Lazy),
        })
    }

    /// All definitions, every module after its dependencies.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.graph
            .instantiation_order()
            .iter()
            .map(|index| self.graph[*index].definition())
    }

    /// Names of the synthesized external-package modules.
    pub fn externals(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .graph
            .nodes()
            .filter_map(|node| match &node.weight {
                Node::External(def) => Some(def.name.as_str()),
                Node::Module(_) => None,
            })
            .collect();
        names.sort();
        names
    }

    /// Client-visible dependency information for every module.
    pub fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new();
        for definition in self.modules() {
            manifest.insert(definition.name.clone(), ManifestEntry::from(definition));
        }
        manifest
    }

    /// Raw source text of a module.
    pub fn source(&self, name: &str) -> Option<&str> {
        self.get(name).map(|definition| definition.source.as_str())
    }

    /// Sources for a set of names, failing on the first unknown name.
    pub fn sources<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<HashMap<String, String>, RegistryError> {
        let mut sources = HashMap::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let source = self
                .source(name)
                .ok_or_else(|| RegistryError::UnknownModule {
                    name: name.to_string(),
                })?;
            sources.insert(name.to_string(), source.to_string());
        }
        Ok(sources)
    }
}
