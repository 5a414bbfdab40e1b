//! Implementation of the `skf plan` command.
//!
//! Resolves the build and prints the recipe steps it would run. Nothing is
//! written to the build path and no tool runs.

use std::process::ExitCode;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use sketchforge_lib::compile::resolve_build;

use super::BuildArgs;
use crate::output::{OutputFormat, print_json, print_stat, print_success, print_warning};

pub fn cmd_plan(args: &BuildArgs, format: OutputFormat, verbose: bool) -> Result<ExitCode> {
  let request = args.request()?;
  let catalog = args.hardware.load_catalog()?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let resolved = rt
    .block_on(resolve_build(&request, &catalog))
    .context("Failed to resolve build")?;
  let plan = resolved.plan().context("Failed to compile build plan")?;
  let libraries: Vec<_> = resolved.libraries.graph.libraries().collect();

  if format.is_json() {
    print_json(&serde_json::json!({
      "fqbn": resolved.board.fqbn,
      "build_path": resolved.build_path,
      "libraries": libraries,
      "unresolved_includes": resolved.libraries.unresolved,
      "plan": plan,
    }))?;
    return Ok(ExitCode::SUCCESS);
  }

  print_success(&format!("Plan for {} ({} steps)", resolved.board.fqbn, plan.steps.len()));
  print_stat("Board", &resolved.board.board_name);
  print_stat("Build path", &resolved.build_path.display().to_string());
  for lib in &libraries {
    print_stat("Library", &format!("{} ({:?})", lib.library.root_path.display(), lib.provenance));
  }
  for include in &resolved.libraries.unresolved {
    print_warning(&format!("No installed library provides {}", include.header));
  }

  println!();
  for step in &plan.steps {
    let kind = format!("{:?}", step.kind);
    println!(
      "  {:>3} {} {}",
      step.ordinal,
      step.id,
      kind.if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    if verbose {
      for line in step.action.describe() {
        println!("        {}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
      }
    }
  }

  Ok(ExitCode::SUCCESS)
}
