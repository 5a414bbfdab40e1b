//! Types for build plans.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::properties::expand::ExpandError;

/// Errors that can occur while compiling a plan.
#[derive(Debug, Error)]
pub enum PlanError {
  /// A recipe the build needs is not defined by the platform.
  #[error("platform does not define required recipe '{key}'")]
  MissingRecipe { key: String },

  #[error("failed to render recipe '{key}': {source}")]
  Expansion {
    key: String,
    #[source]
    source: ExpandError,
  },
}

/// What a step does in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
  Preprocess,
  Compile,
  Archive,
  Link,
  PostLink,
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StepKind::Preprocess => "preprocess",
      StepKind::Compile => "compile",
      StepKind::Archive => "archive",
      StepKind::Link => "link",
      StepKind::PostLink => "post-link",
    };
    f.write_str(name)
  }
}

/// How a step is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepAction {
  /// Fully rendered command lines, run in order.
  Commands { commands: Vec<String> },

  /// Overlay a bootloader image onto the sketch image.
  MergeHex {
    sketch: PathBuf,
    bootloader: PathBuf,
    hex_output: PathBuf,
    bin_output: PathBuf,
  },
}

impl StepAction {
  /// Lines describing the action, for display and fingerprinting.
  pub fn describe(&self) -> Vec<String> {
    match self {
      StepAction::Commands { commands } => commands.clone(),
      StepAction::MergeHex {
        sketch,
        bootloader,
        hex_output,
        bin_output,
      } => vec![format!(
        "merge-hex {} {} -> {} {}",
        sketch.display(),
        bootloader.display(),
        hex_output.display(),
        bin_output.display()
      )],
    }
  }
}

/// One unit of work in a build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeStep {
  /// Position in the plan; execution respects this order between barriers.
  pub ordinal: usize,
  /// Stable identifier, unique within the plan.
  pub id: String,
  pub kind: StepKind,
  pub action: StepAction,
  /// Files read by the step.
  pub inputs: Vec<PathBuf>,
  /// Files written by the step. A step without outputs always runs.
  pub outputs: Vec<PathBuf>,
  /// Outputs are deleted before the step runs.
  pub fresh_outputs: bool,
}

/// Id of the step reporting program and data size.
pub const SIZE_STEP_ID: &str = "size";

impl RecipeStep {
  /// Steps with outputs, and the size report, whose captured output is replayed.
  ///
  /// Hooks have no declared outputs and always run.
  pub fn is_cacheable(&self) -> bool {
    !self.outputs.is_empty() || self.id == SIZE_STEP_ID
  }
}

/// Kinds of firmware artifacts a build can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
  Elf,
  Hex,
  Eep,
  Bin,
  Map,
  HexWithBootloader,
  BinWithBootloader,
}

impl ArtifactKind {
  /// Classify a build output named `<project>.<suffix>`.
  pub fn from_output(path: &Path, project_name: &str) -> Option<Self> {
    let file_name = path.file_name()?.to_str()?;
    let suffix = file_name.strip_prefix(project_name)?.strip_prefix('.')?;
    match suffix {
      "elf" => Some(ArtifactKind::Elf),
      "hex" => Some(ArtifactKind::Hex),
      "eep" => Some(ArtifactKind::Eep),
      "bin" => Some(ArtifactKind::Bin),
      "map" => Some(ArtifactKind::Map),
      "with_bootloader.hex" => Some(ArtifactKind::HexWithBootloader),
      "with_bootloader.bin" => Some(ArtifactKind::BinWithBootloader),
      _ => None,
    }
  }
}

/// Patterns for reading the size step's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizePatterns {
  /// `recipe.size.regex`; each match's first group is summed.
  pub program: Option<String>,
  /// `recipe.size.regex.data`.
  pub data: Option<String>,
  pub program_max: Option<u64>,
  pub data_max: Option<u64>,
}

/// A compiled plan: ordered steps plus the artifacts they produce.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
  pub steps: Vec<RecipeStep>,
  /// Artifacts the plan will produce, by kind.
  pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
  /// Step id of the size report, when the platform has one.
  pub size_step: Option<String>,
  pub size_patterns: SizePatterns,
}

impl BuildPlan {
  pub fn step(&self, id: &str) -> Option<&RecipeStep> {
    self.steps.iter().find(|s| s.id == id)
  }
}
