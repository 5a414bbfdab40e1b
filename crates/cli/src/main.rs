mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, CompileArgs, HardwareArgs};
use crate::output::{OutputFormat, print_error};

/// skf - board-aware firmware builds for sketch projects
#[derive(Parser)]
#[command(name = "skf")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t)]
  format: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a sketch for a board
  Compile(CompileArgs),

  /// Show the recipe steps a build would run, without running them
  Plan(BuildArgs),

  /// Print the resolved board properties
  Properties {
    #[command(flatten)]
    build: BuildArgs,

    /// Only print keys starting with this prefix
    #[arg(long)]
    filter: Option<String>,
  },

  /// List the boards of every installed platform
  Boards {
    #[command(flatten)]
    hardware: HardwareArgs,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match &cli.command {
    Commands::Compile(args) => cmd::cmd_compile(args, cli.format, cli.verbose),
    Commands::Plan(args) => cmd::cmd_plan(args, cli.format, cli.verbose),
    Commands::Properties { build, filter } => cmd::cmd_properties(build, filter.as_deref(), cli.format),
    Commands::Boards { hardware } => cmd::cmd_boards(hardware, cli.format, cli.verbose),
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}
