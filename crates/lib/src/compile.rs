//! The compile pipeline: FQBN to exported firmware.
//!
//! Structural problems (bad FQBN, unknown board or option, expansion cycles,
//! missing recipes, library cycles) are returned as [`CompileError`] before any
//! tool runs. Once tools run, the outcome is a [`BuildReport`] whose
//! [`ErrorKind`] classifies a failed build.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::board::{BoardError, BoardTarget, ResolvedBoard, RuntimeOverrides, resolve_properties};
use crate::cache::{BuildIdentity, BuildLock, BuildLockError, CacheError, CacheStore};
use crate::catalog::Catalog;
use crate::config::{BuildProfile, Settings};
use crate::execute::{BuildResult, ExecuteConfig, ExecuteError, ExecutionFailure, Severity, execute_plan};
use crate::export::{ExportError, default_export_dir, export_artifacts};
use crate::fqbn::{Fqbn, FqbnError};
use crate::libraries::{
  LibraryError, LibraryResolution, Provenance, ResolveOptions, ResolvedLibrary, SearchRoot, UnresolvedInclude,
  resolve_libraries,
};
use crate::plan::{ArtifactKind, BuildPlan, PlanError, compile_plan};
use crate::platform::paths::default_build_path;
use crate::properties::PropertyTable;
use crate::sketch::{Sketch, SketchError};

pub use crate::execute::CancelToken;

/// Classification of a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
  MalformedFqbn,
  UnknownBoard,
  UnknownOption,
  ExpansionCycle,
  MissingRecipe,
  UnresolvedInclude,
  LibraryDependencyCycle,
  ToolchainError,
  Cancelled,
  ConcurrentBuildConflict,
  IoError,
  InvalidSketch,
}

#[derive(Debug, Error)]
pub enum CompileError {
  #[error(transparent)]
  Fqbn(#[from] FqbnError),

  #[error("no board selected: pass an FQBN or a profile that pins one")]
  NoBoard,

  #[error(transparent)]
  Sketch(#[from] SketchError),

  #[error(transparent)]
  Board(#[from] BoardError),

  #[error(transparent)]
  Library(#[from] LibraryError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Lock(#[from] BuildLockError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error(transparent)]
  Export(#[from] ExportError),

  #[error("background task failed: {0}")]
  Task(String),
}

impl CompileError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      CompileError::Fqbn(_) | CompileError::NoBoard => ErrorKind::MalformedFqbn,
      CompileError::Sketch(SketchError::NotFound(_) | SketchError::MissingMain { .. }) => ErrorKind::InvalidSketch,
      CompileError::Board(
        BoardError::UnknownPlatform { .. } | BoardError::UnknownBoard { .. } | BoardError::MissingReferencedPlatform { .. },
      ) => ErrorKind::UnknownBoard,
      CompileError::Board(BoardError::UnknownMenu { .. } | BoardError::UnknownOptionValue { .. }) => {
        ErrorKind::UnknownOption
      }
      CompileError::Board(BoardError::Expansion(_)) | CompileError::Plan(PlanError::Expansion { .. }) => {
        ErrorKind::ExpansionCycle
      }
      CompileError::Plan(PlanError::MissingRecipe { .. }) => ErrorKind::MissingRecipe,
      CompileError::Library(LibraryError::Cycle { .. }) => ErrorKind::LibraryDependencyCycle,
      CompileError::Lock(BuildLockError::Contention { .. } | BuildLockError::ContentionUnknown { .. }) => {
        ErrorKind::ConcurrentBuildConflict
      }
      CompileError::Sketch(_)
      | CompileError::Library(_)
      | CompileError::Lock(_)
      | CompileError::Cache(_)
      | CompileError::Execute(_)
      | CompileError::Export(_)
      | CompileError::Task(_) => ErrorKind::IoError,
    }
  }
}

/// Everything a build needs from the caller.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
  pub sketch_path: PathBuf,
  /// Board to build for; the profile's FQBN wins when both are set.
  pub fqbn: Option<String>,
  pub profile: BuildProfile,
  /// Defaults to a per-sketch directory under the system temp dir.
  pub build_path: Option<PathBuf>,
  /// Where to copy artifacts after a successful build.
  pub output_dir: Option<PathBuf>,
  /// Extra library folders, searched after the sketch's own.
  pub library_dirs: Vec<PathBuf>,
  /// Properties applied over everything the platform defines.
  pub extra_properties: PropertyTable,
  pub settings: Settings,
}

/// The board and libraries a build resolved to, before anything is written.
#[derive(Debug, Clone)]
pub struct ResolvedBuild {
  pub sketch: Sketch,
  pub build_path: PathBuf,
  pub board: ResolvedBoard,
  pub libraries: LibraryResolution,
  pub library_roots: Vec<SearchRoot>,
  pub toolchain_identity: String,
}

impl ResolvedBuild {
  /// The plan for this build.
  pub fn plan(&self) -> Result<BuildPlan, CompileError> {
    let files = self.sketch.build_files(&self.build_path);
    Ok(compile_plan(&self.board, &self.libraries.graph, &files, &self.build_path)?)
  }
}

/// Outcome of a build that got as far as running tools.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub fqbn: String,
  pub build_path: PathBuf,
  #[serde(flatten)]
  pub result: BuildResult,
  pub error_kind: Option<ErrorKind>,
  /// Headers no library provides; harmless unless a compile then fails on them.
  pub unresolved_includes: Vec<UnresolvedInclude>,
  /// Unresolved headers a failed compile step reported as missing.
  pub escalated_includes: Vec<UnresolvedInclude>,
  pub libraries: Vec<ResolvedLibrary>,
  pub export_dir: Option<PathBuf>,
  pub exported: BTreeMap<ArtifactKind, PathBuf>,
}

impl BuildReport {
  pub fn success(&self) -> bool {
    self.result.success
  }
}

fn select_fqbn(request: &CompileRequest) -> Result<Fqbn, CompileError> {
  let text = request
    .profile
    .fqbn
    .as_deref()
    .or(request.fqbn.as_deref())
    .ok_or(CompileError::NoBoard)?;
  Ok(Fqbn::parse(text)?)
}

fn library_roots(request: &CompileRequest, sketch: &Sketch, target: &BoardTarget) -> Vec<SearchRoot> {
  let mut roots = vec![SearchRoot::new(sketch.libraries_dir(), Provenance::SketchLocal)];
  roots.extend(
    request
      .library_dirs
      .iter()
      .chain(request.settings.user_library_dir.iter())
      .map(|dir| SearchRoot::new(dir.clone(), Provenance::GlobalUser)),
  );
  if let Some(core) = &target.core_platform {
    roots.push(SearchRoot::new(core.libraries_dir(), Provenance::ReferencedCore));
  }
  roots.push(SearchRoot::new(target.platform.libraries_dir(), Provenance::PlatformBundled));
  roots
}

fn toolchain_identity(target: &BoardTarget) -> String {
  let release = |p: &crate::catalog::PlatformRelease| {
    let version = p.version.as_ref().map(|v| v.to_string()).unwrap_or_default();
    format!("{}@{}", p.id(), version)
  };
  let mut identity = release(&target.platform);
  if let Some(core) = &target.core_platform {
    identity.push('+');
    identity.push_str(&release(core));
  }
  identity
}

fn join_error(err: tokio::task::JoinError) -> CompileError {
  CompileError::Task(err.to_string())
}

/// Locate the board and resolve only its properties.
pub fn resolve_board(request: &CompileRequest, catalog: &Catalog) -> Result<ResolvedBoard, CompileError> {
  let fqbn = select_fqbn(request)?;
  let sketch = Sketch::load(&request.sketch_path)?;
  let build_path = request
    .build_path
    .clone()
    .unwrap_or_else(|| default_build_path(&sketch.dir));
  let target = BoardTarget::locate(&fqbn, catalog, &request.profile.platform_pins)?;
  let overrides = RuntimeOverrides {
    build_path,
    sketch_dir: sketch.dir.clone(),
    sketch_name: sketch.name.clone(),
    extra: request.extra_properties.clone(),
  };
  Ok(resolve_properties(&target, catalog, &overrides)?)
}

/// Resolve the board and libraries for `request`.
///
/// Nothing is written and no tool runs.
pub async fn resolve_build(request: &CompileRequest, catalog: &Catalog) -> Result<ResolvedBuild, CompileError> {
  let fqbn = select_fqbn(request)?;
  let sketch = Sketch::load(&request.sketch_path)?;
  let build_path = request
    .build_path
    .clone()
    .unwrap_or_else(|| default_build_path(&sketch.dir));
  info!(sketch = %sketch.dir.display(), fqbn = %fqbn, build_path = %build_path.display(), "resolving build");

  let target = BoardTarget::locate(&fqbn, catalog, &request.profile.platform_pins)?;
  let roots = library_roots(request, &sketch, &target);
  let options = ResolveOptions {
    architecture: target.fqbn.architecture().to_string(),
    pins: request.profile.library_pins.clone(),
    builtin_include_dirs: target.core_dir.iter().chain(target.variant_dir.iter()).cloned().collect(),
  };
  let overrides = RuntimeOverrides {
    build_path: build_path.clone(),
    sketch_dir: sketch.dir.clone(),
    sketch_name: sketch.name.clone(),
    extra: request.extra_properties.clone(),
  };

  let properties = {
    let (target, catalog) = (target.clone(), catalog.clone());
    tokio::task::spawn_blocking(move || resolve_properties(&target, &catalog, &overrides))
  };
  let libraries = {
    let (sketch, roots) = (sketch.clone(), roots.clone());
    tokio::task::spawn_blocking(move || resolve_libraries(&sketch, &roots, &options))
  };
  let (board, libraries) = tokio::join!(properties, libraries);
  let board = board.map_err(join_error)??;
  let libraries = libraries.map_err(join_error)??;

  Ok(ResolvedBuild {
    sketch,
    build_path,
    board,
    libraries,
    library_roots: roots,
    toolchain_identity: toolchain_identity(&target),
  })
}

/// Unresolved headers named by "No such file" errors of the failing step.
fn escalate_unresolved(result: &BuildResult, unresolved: &[UnresolvedInclude]) -> Vec<UnresolvedInclude> {
  let Some(ExecutionFailure::Toolchain { step_id, .. }) = &result.failure else {
    return Vec::new();
  };
  let missing: Vec<&str> = result
    .diagnostics
    .iter()
    .filter(|d| &d.step_id == step_id && d.severity == Severity::Error)
    .filter_map(|d| d.missing_header())
    .collect();
  unresolved
    .iter()
    .filter(|u| missing.iter().any(|m| u.header == *m || u.header.ends_with(&format!("/{m}"))))
    .cloned()
    .collect()
}

fn failure_kind(failure: &ExecutionFailure) -> ErrorKind {
  match failure {
    ExecutionFailure::Toolchain { .. } | ExecutionFailure::MissingOutput { .. } => ErrorKind::ToolchainError,
    ExecutionFailure::Action { .. } => ErrorKind::IoError,
    ExecutionFailure::Cancelled => ErrorKind::Cancelled,
  }
}

/// Build `request` end to end.
pub async fn compile_sketch(
  request: &CompileRequest,
  catalog: &Catalog,
  cancel: &CancelToken,
) -> Result<BuildReport, CompileError> {
  let resolved = resolve_build(request, catalog).await?;
  let plan = resolved.plan()?;
  let fqbn = resolved.board.fqbn.clone();
  let build_path = resolved.build_path.clone();

  let _lock = {
    let (path, policy) = (build_path.clone(), request.settings.lock_policy);
    let command = format!("compile {}", resolved.sketch.dir.display());
    tokio::task::spawn_blocking(move || BuildLock::acquire(&path, policy, &command))
      .await
      .map_err(join_error)??
  };

  let library_paths: Vec<PathBuf> = resolved.library_roots.iter().map(|r| r.path.clone()).collect();
  let identity = BuildIdentity::new(&fqbn.to_string(), &resolved.sketch.dir, catalog.roots(), &library_paths);
  let cache = CacheStore::open(&build_path, &identity)?;
  resolved.sketch.prepare(&build_path)?;

  let config = ExecuteConfig {
    jobs: request.settings.effective_jobs(),
    toolchain_identity: resolved.toolchain_identity.clone(),
    working_dir: build_path.clone(),
  };
  let result = execute_plan(&plan, &cache, &config, cancel).await?;

  let escalated_includes = escalate_unresolved(&result, &resolved.libraries.unresolved);
  for include in &escalated_includes {
    warn!(header = %include.header, "compile failed on a header no library provides");
  }
  let error_kind = result.failure.as_ref().map(failure_kind);

  let export_dir = request.output_dir.clone().or_else(|| {
    request
      .settings
      .always_export_binaries
      .then(|| default_export_dir(&resolved.sketch.dir, &fqbn))
  });
  let exported = match (&export_dir, result.success) {
    (Some(dir), true) => export_artifacts(&result.produced_artifacts, dir)?,
    _ => BTreeMap::new(),
  };

  info!(fqbn = %fqbn, success = result.success, "build finished");

  Ok(BuildReport {
    fqbn: fqbn.to_string(),
    build_path,
    result,
    error_kind,
    unresolved_includes: resolved.libraries.unresolved.clone(),
    escalated_includes,
    libraries: resolved.libraries.graph.libraries().cloned().collect(),
    export_dir,
    exported,
  })
}
