//! Plan execution.
//!
//! This module runs a [`BuildPlan`] against a build path. It handles:
//! - DAG-based ordering of steps
//! - Parallel compile steps bounded by the job count
//! - Step caching keyed by fingerprints, written through after each step
//! - Stopping on the first failure and cooperative cancellation

pub mod cmd;
pub mod dag;
pub mod diagnostics;
pub mod ihex;
pub mod size;
pub mod types;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::consts::CACHE_FORMAT_VERSION;
use crate::plan::{ArtifactKind, BuildPlan, RecipeStep, StepAction, StepKind};
use crate::util::hash::{ContentHash, Fingerprinter, hash_file};

use cmd::{CommandError, run_command};
use diagnostics::{parse_depfile, parse_diagnostics};

pub use dag::StepDag;
pub use diagnostics::{Diagnostic, Severity};
pub use types::{
  BuildResult, CancelToken, ExecuteConfig, ExecuteError, ExecutionFailure, SizeReport, StepOutcome, StepReport,
};

/// Shared state for the steps of one run.
struct StepContext {
  cache: CacheStore,
  toolchain_identity: String,
  working_dir: PathBuf,
  cancel: CancelToken,
  /// Set on the first failure; steps not yet started are skipped.
  stop: AtomicBool,
}

/// What happened to one step.
struct StepRun {
  report: StepReport,
  output: String,
  failure: Option<ExecutionFailure>,
}

/// Fingerprint of a step as planned: its command lines and input contents.
pub fn step_fingerprint(step: &RecipeStep, toolchain_identity: &str) -> ContentHash {
  let mut fp = Fingerprinter::new();
  fp.field("version", CACHE_FORMAT_VERSION.to_string())
    .field("toolchain", toolchain_identity)
    .field("kind", step.kind.to_string());
  for line in step.action.describe() {
    fp.field("action", line);
  }
  for input in &step.inputs {
    fp.field("input", input.to_string_lossy().as_bytes());
    match hash_file(input) {
      Ok(hash) => fp.field("content", hash.0),
      Err(_) => fp.field("content", "missing"),
    };
  }
  fp.finish()
}

/// Execute every step of `plan`.
///
/// Steps whose cache entry is still valid are skipped. The first failing step
/// stops the build: steps not yet started are dropped and the failure is
/// reported in the result. Only a malformed plan is an `Err`.
pub async fn execute_plan(
  plan: &BuildPlan,
  cache: &CacheStore,
  config: &ExecuteConfig,
  cancel: &CancelToken,
) -> Result<BuildResult, ExecuteError> {
  info!(steps = plan.steps.len(), jobs = config.jobs, "starting plan execution");

  let dag = StepDag::from_steps(&plan.steps)?;
  let waves = dag.waves()?;
  debug!(wave_count = waves.len(), "computed execution waves");

  let steps = Arc::new(plan.steps.clone());
  let ctx = Arc::new(StepContext {
    cache: cache.clone(),
    toolchain_identity: config.toolchain_identity.clone(),
    working_dir: config.working_dir.clone(),
    cancel: cancel.clone(),
    stop: AtomicBool::new(false),
  });
  let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));

  let mut result = BuildResult::default();
  let mut size_output = None;

  for (wave_idx, wave) in waves.iter().enumerate() {
    if result.failure.is_some() || cancel.is_cancelled() {
      break;
    }
    debug!(wave = wave_idx, steps = wave.len(), "executing wave");

    let mut join_set = JoinSet::new();
    for &position in wave {
      let steps = steps.clone();
      let ctx = ctx.clone();
      let semaphore = semaphore.clone();
      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return None;
        };
        run_step(&steps[position], &ctx).await
      });
    }

    while let Some(joined) = join_set.join_next().await {
      let run = joined.map_err(|e| ExecuteError::TaskFailed(e.to_string()))?;
      let Some(run) = run else {
        continue;
      };

      result
        .diagnostics
        .extend(parse_diagnostics(&run.report.id, &run.output));
      if plan.size_step.as_deref() == Some(run.report.id.as_str()) && run.failure.is_none() {
        size_output = Some(run.output);
      }
      if let Some(failure) = run.failure
        && result.failure.is_none()
      {
        result.failure = Some(failure);
      }
      result.steps.push(run.report);
    }
  }

  if result.failure.is_none() && cancel.is_cancelled() && result.steps.len() < plan.steps.len() {
    result.failure = Some(ExecutionFailure::Cancelled);
  }

  result.success = result.failure.is_none();
  result.produced_artifacts = produced_artifacts(plan, &result.steps);
  result.size = size_output.and_then(|output| size::size_report(&output, &plan.size_patterns));

  info!(
    success = result.success,
    executed = result.count(StepOutcome::Executed),
    cached = result.count(StepOutcome::Cached),
    "plan execution complete"
  );

  Ok(result)
}

/// Artifacts whose producing step completed in this run and still exist.
fn produced_artifacts(plan: &BuildPlan, reports: &[StepReport]) -> BTreeMap<ArtifactKind, PathBuf> {
  let completed: HashSet<&Path> = reports
    .iter()
    .filter(|r| matches!(r.outcome, StepOutcome::Executed | StepOutcome::Cached))
    .filter_map(|r| plan.step(&r.id))
    .flat_map(|step| step.outputs.iter().map(PathBuf::as_path))
    .collect();
  plan
    .artifacts
    .iter()
    .filter(|(_, path)| completed.contains(path.as_path()) && path.is_file())
    .map(|(kind, path)| (*kind, path.clone()))
    .collect()
}

async fn run_step(step: &RecipeStep, ctx: &StepContext) -> Option<StepRun> {
  if ctx.stop.load(Ordering::SeqCst) || ctx.cancel.is_cancelled() {
    return None;
  }
  let started = Instant::now();
  let report = |outcome| StepReport {
    id: step.id.clone(),
    kind: step.kind,
    outcome,
    duration_ms: started.elapsed().as_millis() as u64,
  };

  let fingerprint = step_fingerprint(step, &ctx.toolchain_identity);
  if step.is_cacheable()
    && let Some(entry) = ctx.cache.lookup(&step.id, &fingerprint)
  {
    debug!(step = %step.id, "cache hit");
    return Some(StepRun {
      report: report(StepOutcome::Cached),
      output: entry.captured_output,
      failure: None,
    });
  }

  debug!(step = %step.id, kind = %step.kind, "running step");
  let (output, failure) = match run_action(step, ctx).await {
    Ok(output) => match missing_output(step) {
      Some(failure) => (output, Some(failure)),
      None => {
        record_entry(step, fingerprint, &output, &ctx.cache);
        (output, None)
      }
    },
    Err((output, failure)) => (output, Some(failure)),
  };

  let outcome = match &failure {
    None => StepOutcome::Executed,
    Some(ExecutionFailure::Cancelled) => StepOutcome::Cancelled,
    Some(failure) => {
      error!(step = %step.id, error = %failure, "step failed");
      ctx.stop.store(true, Ordering::SeqCst);
      StepOutcome::Failed
    }
  };

  Some(StepRun {
    report: report(outcome),
    output,
    failure,
  })
}

fn missing_output(step: &RecipeStep) -> Option<ExecutionFailure> {
  step
    .outputs
    .iter()
    .find(|path| !path.exists())
    .map(|path| ExecutionFailure::MissingOutput {
      step_id: step.id.clone(),
      path: path.clone(),
    })
}

fn prepare_outputs(step: &RecipeStep) -> std::io::Result<()> {
  for output in &step.outputs {
    if step.fresh_outputs {
      match std::fs::remove_file(output) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
      }
    }
    if let Some(parent) = output.parent() {
      std::fs::create_dir_all(parent)?;
    }
  }
  Ok(())
}

/// Run the step's action, returning its captured output.
async fn run_action(step: &RecipeStep, ctx: &StepContext) -> Result<String, (String, ExecutionFailure)> {
  let action_failure = |message: String| ExecutionFailure::Action {
    step_id: step.id.clone(),
    message,
  };
  prepare_outputs(step).map_err(|e| (String::new(), action_failure(e.to_string())))?;

  match &step.action {
    StepAction::Commands { commands } => {
      let mut output = String::new();
      for line in commands {
        match run_command(line, &ctx.working_dir, &ctx.cancel).await {
          Ok(run) => {
            output.push_str(&run.output);
            if !run.success {
              return Err((
                output,
                ExecutionFailure::Toolchain {
                  step_id: step.id.clone(),
                  command: line.clone(),
                  exit_code: run.exit_code,
                },
              ));
            }
          }
          Err(CommandError::Cancelled) => return Err((output, ExecutionFailure::Cancelled)),
          Err(err) => return Err((output, action_failure(err.to_string()))),
        }
      }
      Ok(output)
    }
    StepAction::MergeHex {
      sketch,
      bootloader,
      hex_output,
      bin_output,
    } => {
      let (sketch, bootloader, hex_output, bin_output) =
        (sketch.clone(), bootloader.clone(), hex_output.clone(), bin_output.clone());
      tokio::task::spawn_blocking(move || ihex::merge_hex(&sketch, &bootloader, &hex_output, &bin_output))
        .await
        .map_err(|e| (String::new(), action_failure(e.to_string())))?
        .map_err(|e| (String::new(), action_failure(e.to_string())))?;
      Ok(String::new())
    }
  }
}

fn hash_all(paths: impl IntoIterator<Item = PathBuf>) -> Option<BTreeMap<PathBuf, ContentHash>> {
  paths.into_iter().map(|p| hash_file(&p).ok().map(|h| (p, h))).collect()
}

/// Write the cache entry for a step that just succeeded.
///
/// A step whose outputs or discovered headers cannot be hashed is not
/// recorded and simply runs again next time.
fn record_entry(step: &RecipeStep, fingerprint: ContentHash, output: &str, cache: &CacheStore) {
  if !step.is_cacheable() {
    return;
  }

  let Some(outputs) = hash_all(step.outputs.iter().cloned()) else {
    debug!(step = %step.id, "outputs not hashable, not caching");
    return;
  };

  let discovered = if step.kind == StepKind::Compile {
    step
      .outputs
      .first()
      .map(|object| object.with_extension("d"))
      .and_then(|depfile| std::fs::read_to_string(depfile).ok())
      .map(|text| parse_depfile(&text))
      .unwrap_or_default()
  } else {
    Vec::new()
  };
  let Some(discovered_inputs) = hash_all(discovered) else {
    debug!(step = %step.id, "discovered input vanished, not caching");
    return;
  };

  let entry = CacheEntry {
    version: CACHE_FORMAT_VERSION,
    step_id: step.id.clone(),
    fingerprint,
    outputs,
    discovered_inputs,
    captured_output: output.to_string(),
  };
  if let Err(err) = cache.record(&entry) {
    warn!(step = %step.id, error = %err, "failed to record cache entry");
  }
}
