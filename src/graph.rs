use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use std::ops::Index;
use std::path::PathBuf;

use crate::config::{ProjectConfig, default_cache_dir};
use crate::error::RegistryError;
use crate::externals::ExternalCatalog;
use crate::loader::{self, ScanOptions};
use crate::types::{DependencyKind, ModuleDefinition};

/// Dependency graph over all module definitions of a project.
///
/// Edges point from a dependency to its dependent, so a topological order
/// of the graph is an instantiation order.
pub struct ModuleGraph {
    graph: DiGraph<Node, Edge>,
    node_map: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl ModuleGraph {
    /// Create a new GraphBuilder
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Link definitions into a graph, resolving names that are not defined
    /// locally against the external-package catalog, and reject cycles.
    pub(crate) fn build(
        definitions: Vec<ModuleDefinition>,
        catalog: &ExternalCatalog,
    ) -> Result<Self, RegistryError> {
        loader::check_unique_names(&definitions)?;

        let mut graph = DiGraph::<Node, Edge>::new();
        let mut node_map = HashMap::<String, NodeIndex>::new();

        for definition in definitions {
            let name = definition.name.clone();
            let index = graph.add_node(Node::Module(definition));
            node_map.insert(name, index);
        }

        let local: Vec<NodeIndex> = graph.node_indices().collect();
        for &index in &local {
            let dependencies: Vec<(String, DependencyKind)> = {
                let definition = graph[index].definition();
                definition
                    .load_dependency_names
                    .iter()
                    .map(|name| (name.clone(), DependencyKind::Load))
                    .chain(
                        definition
                            .lazy_dependency_names
                            .iter()
                            .map(|name| (name.clone(), DependencyKind::Lazy)),
                    )
                    .collect()
            };

            for (dependency_name, kind) in dependencies {
                let dependency_index = match node_map.get(&dependency_name) {
                    Some(existing) => *existing,
                    None if catalog.contains(&dependency_name) => {
                        let external = catalog.synthesize(&dependency_name)?;
                        let external_index = graph.add_node(Node::External(external));
                        node_map.insert(dependency_name.clone(), external_index);
                        external_index
                    }
                    None => {
                        return Err(RegistryError::UnknownDependency {
                            module: graph[index].name().to_string(),
                            dependency: dependency_name,
                        });
                    }
                };
                graph.add_edge(dependency_index, index, Edge::from(kind));
            }
        }

        let mut module_graph = Self {
            graph,
            node_map,
            order: Vec::new(),
        };
        module_graph.check_cycles()?;

        // Every module after its dependencies
        module_graph.order = petgraph::algo::toposort(&module_graph.graph, None).map_err(|cycle| {
            let name = module_graph.graph[cycle.node_id()].name().to_string();
            RegistryError::CyclicDependency {
                module: name.clone(),
                dependency: name,
            }
        })?;

        tracing::info!(
            "Built module graph with {} modules and {} edges",
            module_graph.graph.node_count(),
            module_graph.graph.edge_count()
        );
        Ok(module_graph)
    }

    /// Indices of the modules `index` depends on, in declaration order,
    /// load dependencies first.
    fn dependency_indices(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph[index]
            .definition()
            .all_dependency_names()
            .filter_map(|name| self.node_map.get(name).copied())
            .collect()
    }

    /// Depth-first walk from every module over load and lazy edges together,
    /// failing when a module on the current path is reached again.
    fn check_cycles(&self) -> Result<(), RegistryError> {
        let mut names: Vec<&String> = self.node_map.keys().collect();
        names.sort();

        // Modules whose whole dependency tree is known to be acyclic
        let mut finished: HashSet<NodeIndex> = HashSet::new();

        for name in names {
            let start = self.node_map[name];
            if finished.contains(&start) {
                continue;
            }

            let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(start, self.dependency_indices(start), 0)];

            while let Some((node, children, next)) = stack.last_mut() {
                if *next == children.len() {
                    let node = *node;
                    stack.pop();
                    on_path.remove(&node);
                    finished.insert(node);
                    continue;
                }

                let child = children[*next];
                *next += 1;
                let parent = *node;

                if on_path.contains(&child) {
                    return Err(RegistryError::CyclicDependency {
                        module: self.graph[parent].name().to_string(),
                        dependency: self.graph[child].name().to_string(),
                    });
                }
                if finished.contains(&child) {
                    continue;
                }
                on_path.insert(child);
                stack.push((child, self.dependency_indices(child), 0));
            }
        }
        Ok(())
    }

    /// Write the graph to a DOT file
    pub fn write_dot_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let dot_content = self.dot();
        std::fs::write(path, dot_content)
            .map_err(|e| anyhow::anyhow!("Failed to write DOT file: {e}"))?;
        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &petgraph::graph::Node<Node>> {
        self.graph.raw_nodes().iter()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every module after all of its dependencies.
    pub fn instantiation_order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn get_node_index(&self, name: &str) -> Option<NodeIndex> {
        self.node_map.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDefinition> {
        self.get_node_index(name)
            .map(|index| self.graph[index].definition())
    }

    /// Resolved dependencies of the given kind, in declaration order.
    pub fn dependencies(&self, index: NodeIndex, kind: DependencyKind) -> Vec<NodeIndex> {
        let definition = self.graph[index].definition();
        let names = match kind {
            DependencyKind::Load => &definition.load_dependency_names,
            DependencyKind::Lazy => &definition.lazy_dependency_names,
        };
        names
            .iter()
            .filter_map(|name| self.node_map.get(name).copied())
            .collect()
    }

    /// Modules that depend on `index`, through either kind of edge.
    pub fn dependents(&self, index: NodeIndex) -> petgraph::graph::Neighbors<'_, Edge> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
    }

    fn dot(&self) -> String {
        let mut output = String::from("digraph ModuleGraph {\n");
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [fontname=\"Arial\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Arial\", fontsize=9];\n");

        for node_index in self.graph.node_indices() {
            let node_attrs = match &self.graph[node_index] {
                Node::Module(def) => {
                    let color = if def.lazy_dependency_names.is_empty() {
                        "lightblue"
                    } else {
                        "lightgreen"
                    };
                    format!(
                        "[label=\"{}\", shape=box, fillcolor={color}, style=\"rounded,filled\"]",
                        def.name
                    )
                }
                Node::External(def) => {
                    format!(
                        "[label=\"{}\\n(external)\", shape=ellipse, fillcolor=orange, style=\"rounded,filled\"]",
                        def.name
                    )
                }
            };
            output.push_str(&format!("  {} {};\n", node_index.index(), node_attrs));
        }

        for edge_ref in self.graph.edge_references() {
            let edge_attrs = match edge_ref.weight() {
                Edge::Load => "[color=blue, style=solid]",
                Edge::Lazy => "[color=gray40, style=dashed, label=\"lazy\"]",
            };
            output.push_str(&format!(
                "  {} -> {} {};\n",
                edge_ref.source().index(),
                edge_ref.target().index(),
                edge_attrs
            ));
        }

        output.push_str("}\n");
        output
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug_struct = f.debug_struct("ModuleGraph");

        let nodes: Vec<_> = self
            .graph
            .raw_nodes()
            .iter()
            .map(|n| n.weight.definition())
            .collect();
        debug_struct.field("nodes", &nodes);

        let edges: Vec<String> = self
            .graph
            .edge_references()
            .map(|edge| {
                format!(
                    "{} -> {} ({:?})",
                    self.graph[edge.source()].name(),
                    self.graph[edge.target()].name(),
                    edge.weight()
                )
            })
            .collect();
        debug_struct.field("edges", &edges);
        debug_struct.finish()
    }
}

impl Index<NodeIndex> for ModuleGraph {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.graph[index]
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    /// Defined by a source file of the project
    Module(ModuleDefinition),
    /// Synthesized for an external package
    External(ModuleDefinition),
}

impl Node {
    pub fn definition(&self) -> &ModuleDefinition {
        match self {
            Node::Module(def) | Node::External(def) => def,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition().name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Load,
    Lazy,
}

impl From<DependencyKind> for Edge {
    fn from(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Load => Edge::Load,
            DependencyKind::Lazy => Edge::Lazy,
        }
    }
}

/// Builder for constructing a ModuleGraph
pub struct GraphBuilder {
    project: Option<PathBuf>,
    definitions: Vec<ModuleDefinition>,
    externals: Vec<String>,
    extension: Option<String>,
    exclude: Vec<String>,
    cache_dir: Option<PathBuf>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            project: None,
            definitions: Vec::new(),
            externals: Vec::new(),
            extension: None,
            exclude: Vec::new(),
            cache_dir: None,
        }
    }

    /// Scan the project rooted at `path` (reads its `Dyn.toml` or `package.json`)
    pub fn project(mut self, path: impl Into<PathBuf>) -> Self {
        self.project = Some(path.into());
        self
    }

    /// Add an already parsed definition
    pub fn definition(mut self, definition: ModuleDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Make an external package resolvable in addition to the project's catalog
    pub fn external(mut self, name: impl Into<String>) -> Self {
        self.externals.push(name.into());
        self
    }

    /// File extension of module definition sources (default `js`)
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Exclude another directory name from scanning
    pub fn exclude(mut self, directory: impl Into<String>) -> Self {
        self.exclude.push(directory.into());
        self
    }

    /// Directory for synthesized external-package wrappers
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Build the ModuleGraph from the project and all added definitions
    pub fn build(self) -> Result<ModuleGraph, RegistryError> {
        let config = match &self.project {
            Some(root) => ProjectConfig::load(root).map_err(|e| RegistryError::Project {
                path: root.clone(),
                message: format!("{e:#}"),
            })?,
            None => ProjectConfig::default(),
        };

        let cache_dir = self
            .cache_dir
            .or_else(|| config.project.cache_dir.clone())
            .map(|dir| match &self.project {
                Some(root) if dir.is_relative() => root.join(dir),
                _ => dir,
            })
            .unwrap_or_else(default_cache_dir);

        let mut definitions = Vec::new();
        if let Some(root) = &self.project {
            let mut exclude = config.project.exclusions();
            exclude.extend(self.exclude.iter().cloned());
            let options = ScanOptions {
                extension: self
                    .extension
                    .clone()
                    .unwrap_or_else(|| config.project.extension.clone()),
                exclude,
                skip: vec![cache_dir.clone()],
            };
            definitions.extend(loader::load_definitions(root, &options)?);
        }
        definitions.extend(self.definitions);

        let catalog = ExternalCatalog::new(
            config.external_names().cloned().chain(self.externals),
            cache_dir,
        );
        ModuleGraph::build(definitions, &catalog)
    }
}
