//! Implementation of the `skf properties` command.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};

use sketchforge_lib::compile::resolve_board;

use super::BuildArgs;
use crate::output::{OutputFormat, print_json};

pub fn cmd_properties(args: &BuildArgs, filter: Option<&str>, format: OutputFormat) -> Result<ExitCode> {
  let request = args.request()?;
  let catalog = args.hardware.load_catalog()?;
  let board = resolve_board(&request, &catalog).context("Failed to resolve board properties")?;

  let selected: BTreeMap<&str, &str> = board
    .properties
    .iter()
    .filter(|(key, _)| filter.is_none_or(|prefix| key.starts_with(prefix)))
    .collect();

  if format.is_json() {
    print_json(&selected)?;
  } else {
    for (key, value) in selected {
      println!("{key}={value}");
    }
  }
  Ok(ExitCode::SUCCESS)
}
