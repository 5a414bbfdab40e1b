//! The library dependency graph.
//!
//! Nodes are keyed by name: the sketch node plus one node per resolved
//! library. Edges point from an includer to the library it needs. The graph
//! must be acyclic; [`DependencyGraph::find_cycles`] reports violations.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use super::ResolvedLibrary;

/// Name of the sketch node.
pub const SKETCH_NODE: &str = "<sketch>";

/// A node of the dependency graph.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GraphNode {
  Sketch,
  Library(ResolvedLibrary),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
  /// All nodes, keyed by name.
  nodes: BTreeMap<String, GraphNode>,

  /// Library names in the order they were discovered.
  order: Vec<String>,

  /// Edges: includer -> libraries it needs.
  edges: BTreeMap<String, BTreeSet<String>>,

  /// Reverse edges: library -> includers.
  reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
  /// A graph holding only the sketch node.
  pub fn new() -> Self {
    let mut graph = Self::default();
    graph.nodes.insert(SKETCH_NODE.to_string(), GraphNode::Sketch);
    graph
  }

  /// Add a library node. Returns false if the name is already present.
  pub fn add_library(&mut self, library: ResolvedLibrary) -> bool {
    let name = library.library.name.clone();
    if self.nodes.contains_key(&name) {
      return false;
    }
    self.nodes.insert(name.clone(), GraphNode::Library(library));
    self.order.push(name);
    true
  }

  /// Record that `from` needs `to`. Self edges are ignored.
  pub fn add_edge(&mut self, from: &str, to: &str) {
    if from == to {
      return;
    }
    self.edges.entry(from.to_string()).or_default().insert(to.to_string());
    self
      .reverse_edges
      .entry(to.to_string())
      .or_default()
      .insert(from.to_string());
  }

  pub fn get(&self, name: &str) -> Option<&GraphNode> {
    self.nodes.get(name)
  }

  pub fn library(&self, name: &str) -> Option<&ResolvedLibrary> {
    match self.nodes.get(name) {
      Some(GraphNode::Library(lib)) => Some(lib),
      _ => None,
    }
  }

  /// Resolved libraries in discovery order.
  pub fn libraries(&self) -> impl Iterator<Item = &ResolvedLibrary> {
    self.order.iter().filter_map(|name| self.library(name))
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Libraries `name` needs directly.
  pub fn dependencies(&self, name: &str) -> Vec<&str> {
    self
      .edges
      .get(name)
      .map(|deps| deps.iter().map(|s| s.as_str()).collect())
      .unwrap_or_default()
  }

  /// Nodes that need `name` directly.
  pub fn dependents(&self, name: &str) -> Vec<&str> {
    self
      .reverse_edges
      .get(name)
      .map(|deps| deps.iter().map(|s| s.as_str()).collect())
      .unwrap_or_default()
  }

  /// Every cycle reachable by DFS, each closed by repeating its first node.
  pub fn find_cycles(&self) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    let mut on_stack = HashSet::new();

    for name in self.nodes.keys() {
      if !visited.contains(name) {
        self.find_cycles_dfs(name, &mut visited, &mut stack, &mut on_stack, &mut cycles);
      }
    }

    cycles
  }

  fn find_cycles_dfs(
    &self,
    name: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
    on_stack: &mut HashSet<String>,
    cycles: &mut Vec<Vec<String>>,
  ) {
    visited.insert(name.to_string());
    stack.push(name.to_string());
    on_stack.insert(name.to_string());

    if let Some(deps) = self.edges.get(name) {
      for dep in deps {
        if !visited.contains(dep) {
          self.find_cycles_dfs(dep, visited, stack, on_stack, cycles);
        } else if on_stack.contains(dep)
          && let Some(start) = stack.iter().position(|p| p == dep)
        {
          let mut cycle: Vec<String> = stack[start..].to_vec();
          cycle.push(dep.clone());
          cycles.push(cycle);
        }
      }
    }

    stack.pop();
    on_stack.remove(name);
  }
}
