//! Implementation of the `skf compile` command.
//!
//! Resolves the board and libraries, runs the build with Ctrl-C wired to
//! cancellation, and reports diagnostics, sizes and exported files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use sketchforge_lib::catalog::Catalog;
use sketchforge_lib::compile::{BuildReport, CancelToken, CompileRequest, compile_sketch};
use sketchforge_lib::execute::StepOutcome;

use super::BuildArgs;
use crate::output::{
  OutputFormat, format_duration, format_usage, print_diagnostic, print_error, print_json, print_stat, print_success,
  print_warning, symbols,
};

#[derive(Debug, Args)]
pub struct CompileArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Copy the finished binaries into this directory
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Copy the finished binaries into <sketch>/build/<fqbn>
  #[arg(short = 'e', long)]
  pub export_binaries: bool,

  /// Maximum parallel compile commands (0 uses every core)
  #[arg(short, long)]
  pub jobs: Option<usize>,
}

async fn run(request: &CompileRequest, catalog: &Catalog) -> Result<BuildReport, sketchforge_lib::compile::CompileError> {
  let cancel = CancelToken::new();
  let interrupt = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling build");
        cancel.cancel();
      }
    })
  };
  let report = compile_sketch(request, catalog, &cancel).await;
  interrupt.abort();
  report
}

pub fn cmd_compile(args: &CompileArgs, format: OutputFormat, verbose: bool) -> Result<ExitCode> {
  let mut request = args.build.request()?;
  request.output_dir = args.output_dir.clone();
  if args.export_binaries {
    request.settings.always_export_binaries = true;
  }
  if let Some(jobs) = args.jobs {
    request.settings.jobs = jobs;
  }
  let catalog = args.build.hardware.load_catalog()?;

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = match rt.block_on(run(&request, &catalog)) {
    Ok(report) => report,
    Err(err) if format.is_json() => {
      print_json(&serde_json::json!({
        "success": false,
        "error_kind": err.kind(),
        "error": err.to_string(),
      }))?;
      return Ok(ExitCode::FAILURE);
    }
    Err(err) => return Err(err).context("Compile failed"),
  };

  if format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, started.elapsed(), verbose);
  }

  Ok(if report.success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn print_report(report: &BuildReport, elapsed: std::time::Duration, verbose: bool) {
  let result = &report.result;
  for diagnostic in &result.diagnostics {
    print_diagnostic(diagnostic);
  }

  for include in &report.unresolved_includes {
    if !report.escalated_includes.contains(include) {
      print_warning(&format!(
        "No installed library provides {} (included by {})",
        include.header,
        include.included_by.join(", ")
      ));
    }
  }

  if !report.success() {
    for include in &report.escalated_includes {
      print_error(&format!("Missing header {}: no installed library provides it", include.header));
    }
    match &result.failure {
      Some(failure) => print_error(&format!("Build failed: {failure}")),
      None => print_error("Build failed"),
    }
    return;
  }

  print_success(&format!("Compiled for {} in {}", report.fqbn, format_duration(elapsed)));
  print_stat("Build path", &report.build_path.display().to_string());
  print_stat(
    "Steps",
    &format!(
      "{} run, {} cached",
      result.count(StepOutcome::Executed),
      result.count(StepOutcome::Cached)
    ),
  );
  if !report.libraries.is_empty() {
    let names: Vec<String> = report
      .libraries
      .iter()
      .map(|lib| match &lib.library.version {
        Some(version) => format!("{}@{}", lib.library.name, version),
        None => lib.library.name.clone(),
      })
      .collect();
    print_stat("Libraries", &names.join(", "));
  }

  if let Some(size) = &result.size {
    print_stat("Program", &format_usage(size.program_bytes, size.program_max));
    if let Some(data) = size.data_bytes {
      print_stat("Data", &format_usage(data, size.data_max));
    }
    if size.program_exceeded() {
      print_warning("Sketch is larger than the board's flash");
    }
    if size.data_exceeded() {
      print_warning("Global variables use more memory than the board has");
    }
  }

  if verbose {
    for (kind, path) in &result.produced_artifacts {
      println!("  {} {:?}: {}", symbols::INFO, kind, path.display());
    }
  }
  if let Some(dir) = &report.export_dir {
    println!("  {} exported {} file(s) to {}", symbols::ARROW, report.exported.len(), dir.display());
  }
}
