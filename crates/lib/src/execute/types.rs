//! Types for plan execution.
//!
//! This module defines the configuration, cancellation handle, failure
//! descriptions and results of executing a [`BuildPlan`](crate::plan::BuildPlan).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::plan::{ArtifactKind, StepKind};

use super::diagnostics::Diagnostic;

/// Configuration for executing a plan.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of compile steps running at once.
  pub jobs: usize,

  /// Identifies the toolchain; part of every step fingerprint.
  pub toolchain_identity: String,

  /// Working directory for spawned tools.
  pub working_dir: PathBuf,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      jobs: num_cpus(),
      toolchain_identity: String::new(),
      working_dir: PathBuf::from("."),
    }
  }
}

/// Get the number of CPUs for default parallelism.
pub fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Cooperative cancellation shared between the caller and running steps.
///
/// Cloning yields a handle to the same token.
#[derive(Debug, Clone)]
pub struct CancelToken {
  sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
  pub fn new() -> Self {
    let (sender, _) = watch::channel(false);
    Self {
      sender: Arc::new(sender),
    }
  }

  /// Request cancellation. Running tools are killed and no new step starts.
  pub fn cancel(&self) {
    self.sender.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.sender.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.sender.subscribe()
  }

  /// Resolves once the token is cancelled.
  pub async fn cancelled(&self) {
    let mut rx = self.subscribe();
    if rx.wait_for(|c| *c).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

/// Why a build stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionFailure {
  #[error("step {step_id} failed (exit code {exit_code:?}): {command}")]
  Toolchain {
    step_id: String,
    command: String,
    exit_code: Option<i32>,
  },

  #[error("step {step_id} did not produce {path}")]
  MissingOutput { step_id: String, path: PathBuf },

  #[error("step {step_id} failed: {message}")]
  Action { step_id: String, message: String },

  #[error("build cancelled")]
  Cancelled,
}

impl ExecutionFailure {
  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionFailure::Toolchain { step_id, .. }
      | ExecutionFailure::MissingOutput { step_id, .. }
      | ExecutionFailure::Action { step_id, .. } => Some(step_id),
      ExecutionFailure::Cancelled => None,
    }
  }
}

/// Errors that prevent a plan from being executed at all.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Cycle detected in the step graph.
  #[error("dependency cycle detected between plan steps")]
  CycleDetected,

  /// A worker task panicked or was aborted.
  #[error("step task failed: {0}")]
  TaskFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
  Executed,
  Cached,
  Failed,
  Cancelled,
}

/// How one step went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
  pub id: String,
  pub kind: StepKind,
  pub outcome: StepOutcome,
  pub duration_ms: u64,
}

/// Program and data usage reported by the size recipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeReport {
  pub program_bytes: u64,
  pub program_max: Option<u64>,
  pub data_bytes: Option<u64>,
  pub data_max: Option<u64>,
}

impl SizeReport {
  pub fn program_exceeded(&self) -> bool {
    self.program_max.is_some_and(|max| self.program_bytes > max)
  }

  pub fn data_exceeded(&self) -> bool {
    matches!((self.data_bytes, self.data_max), (Some(bytes), Some(max)) if bytes > max)
  }
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildResult {
  pub success: bool,
  pub failure: Option<ExecutionFailure>,
  /// Diagnostics from every step that ran or was replayed from the cache.
  pub diagnostics: Vec<Diagnostic>,
  /// Artifacts that exist in the build path after the run.
  pub produced_artifacts: BTreeMap<ArtifactKind, PathBuf>,
  /// Steps in completion order.
  pub steps: Vec<StepReport>,
  pub size: Option<SizeReport>,
}

impl BuildResult {
  pub fn count(&self, outcome: StepOutcome) -> usize {
    self.steps.iter().filter(|s| s.outcome == outcome).count()
  }
}
