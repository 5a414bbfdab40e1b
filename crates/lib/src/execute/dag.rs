//! Step DAG for plan execution.
//!
//! Edges come from two sources:
//! - files: a step that reads a file depends on every earlier step writing it,
//!   and a file written twice is written in plan order;
//! - barriers: every non-compile step (hooks, archive, link, objcopy, size)
//!   runs after everything planned before it and before everything planned
//!   after it. Compile steps between two barriers are free to run in parallel.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::plan::{RecipeStep, StepKind};

use super::types::ExecuteError;

/// A DAG over the steps of a plan, by position in the plan.
pub struct StepDag {
  graph: DiGraph<usize, ()>,
  nodes: Vec<NodeIndex>,
}

impl StepDag {
  pub fn from_steps(steps: &[RecipeStep]) -> Result<Self, ExecuteError> {
    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

    let mut writers: HashMap<&Path, usize> = HashMap::new();
    let mut barrier: Option<usize> = None;
    let mut since_barrier: Vec<usize> = Vec::new();

    for (idx, step) in steps.iter().enumerate() {
      for input in &step.inputs {
        if let Some(&producer) = writers.get(input.as_path()) {
          graph.update_edge(nodes[producer], nodes[idx], ());
        }
      }
      for output in &step.outputs {
        if let Some(previous) = writers.insert(output.as_path(), idx) {
          graph.update_edge(nodes[previous], nodes[idx], ());
        }
      }

      if step.kind == StepKind::Compile {
        if let Some(b) = barrier {
          graph.update_edge(nodes[b], nodes[idx], ());
        }
        since_barrier.push(idx);
      } else {
        for dep in barrier.into_iter().chain(since_barrier.drain(..)) {
          graph.update_edge(nodes[dep], nodes[idx], ());
        }
        barrier = Some(idx);
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), ExecuteError> {
    toposort(&self.graph, None).map_err(|_| ExecuteError::CycleDetected)?;
    Ok(())
  }

  /// Steps organized into waves; a wave only depends on earlier waves.
  ///
  /// Steps within a wave are in plan order.
  pub fn waves(&self) -> Result<Vec<Vec<usize>>, ExecuteError> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();
      if ready.is_empty() {
        return Err(ExecuteError::CycleDetected);
      }

      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<usize> = ready.into_iter().map(|idx| self.graph[idx]).collect();
      wave.sort_unstable();
      waves.push(wave);
    }

    Ok(waves)
  }

  /// Direct dependencies of the step at `position`.
  pub fn dependencies(&self, position: usize) -> Vec<usize> {
    let Some(&idx) = self.nodes.get(position) else {
      return Vec::new();
    };
    let mut deps: Vec<usize> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep])
      .collect();
    deps.sort_unstable();
    deps
  }

  pub fn step_count(&self) -> usize {
    self.nodes.len()
  }
}
