//! Build plan compilation.
//!
//! Turns a resolved board, the library graph, and the prepared sketch files
//! into an ordered list of [`RecipeStep`]s. Every command is rendered here,
//! so the executor never sees a placeholder.
//!
//! # Step Order
//!
//! ```text
//! prebuild hooks, preproc macros
//! sketch sources          <build>/sketch/<rel>.o
//! library sources         <build>/libraries/<dir>/<rel>.o
//! core sources            <build>/core/<rel>.o
//! variant sources         <build>/core/variant/<rel>.o
//! archive                 <build>/core/core.a
//! prelink hooks, link     <build>/<project>.elf
//! objcopy (+ hooks)       <build>/<project>.<ext>
//! bootloader merge, size, postbuild hooks
//! ```
//!
//! File lists are sorted, so the same inputs always produce the same plan.

pub mod types;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::board::ResolvedBoard;
use crate::catalog::library::{LibraryCandidate, Precompiled};
use crate::libraries::graph::DependencyGraph;
use crate::libraries::scan::{folder_sources, is_source, library_sources};
use crate::properties::PropertyTable;
use crate::properties::expand::{Layered, expand_str};
use crate::sketch::{Sketch, SketchFile};

pub use types::{ArtifactKind, BuildPlan, PlanError, RecipeStep, SIZE_STEP_ID, SizePatterns, StepAction, StepKind};

/// Name of the core archive inside `<build>/core`.
pub const CORE_ARCHIVE: &str = "core.a";

/// Recipe key compiling a file with this extension.
fn compile_recipe(path: &Path) -> Option<&'static str> {
  match path.extension().and_then(|e| e.to_str())? {
    "c" => Some("recipe.c.o.pattern"),
    "cpp" | "cc" | "cxx" => Some("recipe.cpp.o.pattern"),
    "S" => Some("recipe.S.o.pattern"),
    _ => None,
  }
}

/// `<dir>/<rel>.o`
fn object_path(dir: &Path, relative: &Path) -> PathBuf {
  let mut name = relative.as_os_str().to_owned();
  name.push(".o");
  dir.join(name)
}

fn quoted(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| format!("\"{}\"", p.display()))
    .collect::<Vec<_>>()
    .join(" ")
}

struct PlanBuilder<'a> {
  board: &'a ResolvedBoard,
  build_path: &'a Path,
  includes: String,
  steps: Vec<RecipeStep>,
}

impl<'a> PlanBuilder<'a> {
  fn render(&self, key: &str, vars: &PropertyTable) -> Result<String, PlanError> {
    let raw = self
      .board
      .raw
      .get(key)
      .ok_or_else(|| PlanError::MissingRecipe { key: key.to_string() })?;
    let source = Layered {
      top: vars,
      base: &self.board.raw,
    };
    expand_str(&source, raw).map_err(|source| PlanError::Expansion {
      key: key.to_string(),
      source,
    })
  }

  fn push(
    &mut self,
    id: String,
    kind: StepKind,
    action: StepAction,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    fresh_outputs: bool,
  ) {
    self.steps.push(RecipeStep {
      ordinal: self.steps.len(),
      id,
      kind,
      action,
      inputs,
      outputs,
      fresh_outputs,
    });
  }

  fn commands(&mut self, id: String, kind: StepKind, commands: Vec<String>, inputs: Vec<PathBuf>, outputs: Vec<PathBuf>) {
    self.push(id, kind, StepAction::Commands { commands }, inputs, outputs, false);
  }

  /// Steps for `recipe.hooks.<stage>.<N>.pattern`, in numeric order.
  fn hooks(&mut self, stage: &str, kind: StepKind) -> Result<(), PlanError> {
    let prefix = format!("recipe.hooks.{stage}.");
    let mut hooks: Vec<(String, String)> = self
      .board
      .raw
      .keys()
      .filter_map(|key| {
        let index = key.strip_prefix(&prefix)?.strip_suffix(".pattern")?;
        (!index.contains('.')).then(|| (index.to_string(), key.to_string()))
      })
      .collect();
    hooks.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
      (Ok(x), Ok(y)) => x.cmp(&y),
      _ => a.cmp(b),
    });

    for (index, key) in hooks {
      let command = self.render(&key, &PropertyTable::new())?;
      if command.trim().is_empty() {
        continue;
      }
      self.commands(format!("hook:{stage}.{index}"), kind, vec![command], vec![], vec![]);
    }
    Ok(())
  }

  fn compile(&mut self, source: &Path, object: PathBuf) -> Result<Option<PathBuf>, PlanError> {
    let Some(recipe) = compile_recipe(source) else {
      return Ok(None);
    };
    let mut vars = PropertyTable::new();
    vars.insert("source_file", source.to_string_lossy());
    vars.insert("object_file", object.to_string_lossy());
    vars.insert("includes", self.includes.as_str());
    let command = self.render(recipe, &vars)?;

    let id = format!(
      "compile:{}",
      object.strip_prefix(self.build_path).unwrap_or(&object).display()
    );
    self.commands(id, StepKind::Compile, vec![command], vec![source.to_path_buf()], vec![object.clone()]);
    Ok(Some(object))
  }

  fn compile_folder(&mut self, sources: Vec<PathBuf>, root: &Path, object_dir: &Path) -> Result<Vec<PathBuf>, PlanError> {
    let mut objects = Vec::new();
    for source in sources {
      let relative = source.strip_prefix(root).unwrap_or(&source).to_path_buf();
      if let Some(object) = self.compile(&source, object_path(object_dir, &relative))? {
        objects.push(object);
      }
    }
    Ok(objects)
  }

  fn preproc_macros(&mut self, merged: &Path) -> Result<(), PlanError> {
    if !self.board.raw.contains_key("recipe.preproc.macros") {
      return Ok(());
    }
    let output = self.build_path.join("preproc").join("ctags_target_for_gcc_minus_e.cpp");
    let mut vars = PropertyTable::new();
    vars.insert("source_file", merged.to_string_lossy());
    vars.insert("preprocessed_file_path", output.to_string_lossy());
    vars.insert("includes", self.includes.as_str());
    let command = self.render("recipe.preproc.macros", &vars)?;
    self.commands(
      "preproc:macros".to_string(),
      StepKind::Preprocess,
      vec![command],
      vec![merged.to_path_buf()],
      vec![output],
    );
    Ok(())
  }

  fn archive(&mut self, objects: &[PathBuf], archive: &Path) -> Result<(), PlanError> {
    let key = "recipe.ar.pattern";
    let raw = self
      .board
      .raw
      .get(key)
      .ok_or_else(|| PlanError::MissingRecipe { key: key.to_string() })?;

    let mut vars = PropertyTable::new();
    vars.insert("archive_file", CORE_ARCHIVE);
    vars.insert("archive_file_path", archive.to_string_lossy());

    let mut commands = Vec::new();
    if raw.contains("{object_file}") {
      for object in objects {
        vars.insert("object_file", object.to_string_lossy());
        commands.push(self.render(key, &vars)?);
      }
    } else {
      vars.insert("object_files", quoted(objects));
      commands.push(self.render(key, &vars)?);
    }

    self.push(
      "archive:core".to_string(),
      StepKind::Archive,
      StepAction::Commands { commands },
      objects.to_vec(),
      vec![archive.to_path_buf()],
      true,
    );
    Ok(())
  }
}

/// Linker flags and archives of a library linked from prebuilt files.
struct PrecompiledLink {
  flags: String,
  archives: Vec<PathBuf>,
}

fn precompiled_link(lib: &LibraryCandidate, dir: &Path) -> PrecompiledLink {
  let mut flags = format!("\"-L{}\" -l{}", dir.display(), lib.name.replace(' ', "_"));
  if !lib.ldflags.is_empty() {
    flags.push(' ');
    flags.push_str(&lib.ldflags);
  }
  let mut archives: Vec<PathBuf> = std::fs::read_dir(dir)
    .map(|entries| {
      entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "a" || e == "so"))
        .collect()
    })
    .unwrap_or_default();
  archives.sort();
  PrecompiledLink { flags, archives }
}

/// Compile the ordered step list for one build.
///
/// `sketch_files` are the prepared files under `<build>/sketch`, as returned
/// by [`Sketch::prepare`].
pub fn compile_plan(
  board: &ResolvedBoard,
  graph: &DependencyGraph,
  sketch_files: &[SketchFile],
  build_path: &Path,
) -> Result<BuildPlan, PlanError> {
  let mut include_dirs: Vec<PathBuf> = board.core_dir.iter().chain(board.variant_dir.iter()).cloned().collect();
  include_dirs.extend(graph.libraries().map(|lib| lib.library.include_dir()));
  let includes = include_dirs
    .iter()
    .map(|dir| format!("\"-I{}\"", dir.display()))
    .collect::<Vec<_>>()
    .join(" ");

  let mut builder = PlanBuilder {
    board,
    build_path,
    includes,
    steps: Vec::new(),
  };

  builder.hooks("prebuild", StepKind::Preprocess)?;
  if let Some(merged) = sketch_files.iter().find(|f| f.relative.to_string_lossy().ends_with(".ino.cpp")) {
    builder.preproc_macros(&merged.path)?;
  }

  // sketch
  builder.hooks("sketch.prebuild", StepKind::Preprocess)?;
  let sketch_dir = Sketch::build_dir(build_path);
  let mut link_objects = Vec::new();
  for file in sketch_files.iter().filter(|f| is_source(&f.path)) {
    if let Some(object) = builder.compile(&file.path, object_path(&sketch_dir, &file.relative))? {
      link_objects.push(object);
    }
  }
  builder.hooks("sketch.postbuild", StepKind::Preprocess)?;

  // libraries
  builder.hooks("libraries.prebuild", StepKind::Preprocess)?;
  let mcu = board.get("build.mcu");
  let mut ldflags = Vec::new();
  let mut link_archives = Vec::new();
  for resolved in graph.libraries() {
    let lib = &resolved.library;
    if let Some(dir) = lib.precompiled_dir(mcu, board.get("build.fpu"), board.get("build.float-abi")) {
      debug!(library = %lib.name, dir = %dir.display(), "linking precompiled library");
      let link = precompiled_link(lib, &dir);
      ldflags.push(link.flags);
      link_archives.extend(link.archives);
      continue;
    }
    if lib.precompiled == Precompiled::Full {
      warn!(library = %lib.name, mcu = %mcu, "no precompiled archive for this board, compiling sources");
    }
    let object_dir = build_path.join("libraries").join(lib.dir_name());
    let objects = builder.compile_folder(library_sources(lib), &lib.root_path, &object_dir)?;
    link_objects.extend(objects);
  }
  builder.hooks("libraries.postbuild", StepKind::Preprocess)?;

  // core and variant
  builder.hooks("core.prebuild", StepKind::Preprocess)?;
  let core_build = build_path.join("core");
  let core_objects = match &board.core_dir {
    Some(dir) => builder.compile_folder(folder_sources(dir), dir, &core_build)?,
    None => Vec::new(),
  };
  if let Some(dir) = &board.variant_dir {
    let objects = builder.compile_folder(folder_sources(dir), dir, &core_build.join("variant"))?;
    link_objects.extend(objects);
  }
  let archive = core_build.join(CORE_ARCHIVE);
  if !core_objects.is_empty() {
    builder.archive(&core_objects, &archive)?;
  }
  builder.hooks("core.postbuild", StepKind::Preprocess)?;

  // link
  builder.hooks("linking.prelink", StepKind::Link)?;
  let project = board.get("build.project_name").to_string();
  let elf = build_path.join(format!("{project}.elf"));
  let map = build_path.join(format!("{project}.map"));
  let mut vars = PropertyTable::new();
  vars.insert("object_files", quoted(&link_objects));
  vars.insert("archive_file", CORE_ARCHIVE);
  vars.insert("archive_file_path", archive.to_string_lossy());
  vars.insert("compiler.libraries.ldflags", ldflags.join(" "));
  let command = builder.render("recipe.c.combine.pattern", &vars)?;
  let mut outputs = vec![elf.clone()];
  if command.contains(&format!("{project}.map")) {
    outputs.push(map);
  }
  let mut inputs = link_objects.clone();
  if !core_objects.is_empty() {
    inputs.push(archive.clone());
  }
  inputs.extend(link_archives);
  builder.commands("link".to_string(), StepKind::Link, vec![command], inputs, outputs);
  builder.hooks("linking.postlink", StepKind::Link)?;

  // objcopy
  builder.hooks("objcopy.preobjcopy", StepKind::PostLink)?;
  let objcopy: Vec<(String, String)> = board
    .raw
    .keys()
    .filter_map(|key| {
      let ext = key.strip_prefix("recipe.objcopy.")?.strip_suffix(".pattern")?;
      (!ext.contains('.')).then(|| (ext.to_string(), key.to_string()))
    })
    .collect();
  let mut hex = None;
  for (ext, key) in objcopy {
    let output = build_path.join(format!("{project}.{ext}"));
    let command = builder.render(&key, &PropertyTable::new())?;
    if ext == "hex" {
      hex = Some(output.clone());
    }
    builder.commands(
      format!("objcopy:{ext}"),
      StepKind::PostLink,
      vec![command],
      vec![elf.clone()],
      vec![output],
    );
  }
  builder.hooks("objcopy.postobjcopy", StepKind::PostLink)?;

  // bootloader
  let bootloader_file = board.get("bootloader.file");
  if let Some(hex) = hex
    && !bootloader_file.is_empty()
  {
    let bootloader = board.platform_dir.join("bootloaders").join(bootloader_file);
    if bootloader.is_file() {
      let hex_output = build_path.join(format!("{project}.with_bootloader.hex"));
      let bin_output = build_path.join(format!("{project}.with_bootloader.bin"));
      builder.push(
        "merge-hex".to_string(),
        StepKind::PostLink,
        StepAction::MergeHex {
          sketch: hex.clone(),
          bootloader: bootloader.clone(),
          hex_output: hex_output.clone(),
          bin_output: bin_output.clone(),
        },
        vec![hex, bootloader],
        vec![hex_output, bin_output],
        false,
      );
    } else {
      debug!(bootloader = %bootloader.display(), "bootloader not found, skipping merge");
    }
  }

  // size
  let mut size_step = None;
  if board.raw.contains_key("recipe.size.pattern") {
    let command = builder.render("recipe.size.pattern", &PropertyTable::new())?;
    builder.commands(SIZE_STEP_ID.to_string(), StepKind::PostLink, vec![command], vec![elf.clone()], vec![]);
    size_step = Some(SIZE_STEP_ID.to_string());
  }
  builder.hooks("postbuild", StepKind::PostLink)?;

  let non_empty = |key: &str| Some(board.get(key)).filter(|v| !v.is_empty()).map(String::from);
  let size_patterns = SizePatterns {
    program: non_empty("recipe.size.regex"),
    data: non_empty("recipe.size.regex.data"),
    program_max: board.get("upload.maximum_size").parse().ok(),
    data_max: board.get("upload.maximum_data_size").parse().ok(),
  };

  let steps = builder.steps;
  let artifacts = steps
    .iter()
    .flat_map(|step| step.outputs.iter())
    .filter_map(|out| ArtifactKind::from_output(out, &project).map(|kind| (kind, out.clone())))
    .collect();

  info!(steps = steps.len(), "compiled build plan");

  Ok(BuildPlan {
    steps,
    artifacts,
    size_step,
    size_patterns,
  })
}
