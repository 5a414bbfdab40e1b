//! Implementation of the `skf boards` command.

use std::process::ExitCode;

use anyhow::Result;

use super::HardwareArgs;
use crate::output::{OutputFormat, print_info, print_json, symbols};

pub fn cmd_boards(args: &HardwareArgs, format: OutputFormat, verbose: bool) -> Result<ExitCode> {
  let catalog = args.load_catalog()?;

  if format.is_json() {
    let boards: Vec<_> = catalog
      .platforms()
      .iter()
      .flat_map(|platform| {
        platform.boards.values().map(move |board| {
          let menus: Vec<_> = board
            .menus
            .iter()
            .map(|menu| {
              serde_json::json!({
                "id": menu.id,
                "label": menu.label,
                "options": menu.options.iter().map(|o| &o.value).collect::<Vec<_>>(),
              })
            })
            .collect();
          serde_json::json!({
            "fqbn": format!("{}:{}", platform.id(), board.id),
            "name": board.name,
            "platform_version": platform.version.as_ref().map(|v| v.to_string()),
            "menus": menus,
          })
        })
      })
      .collect();
    print_json(&boards)?;
    return Ok(ExitCode::SUCCESS);
  }

  if catalog.platforms().is_empty() {
    print_info(&format!("No platforms found in {:?}", args.roots()));
    return Ok(ExitCode::SUCCESS);
  }

  for platform in catalog.platforms() {
    let version = platform.version.as_ref().map(|v| v.to_string()).unwrap_or_default();
    println!("{} {}", platform.id(), version);
    for board in platform.boards.values() {
      println!("  {} {}:{}  {}", symbols::INFO, platform.id(), board.id, board.name);
      if verbose {
        for menu in &board.menus {
          let options: Vec<&str> = menu.options.iter().map(|o| o.value.as_str()).collect();
          println!("      {}={}", menu.id, options.join("|"));
        }
      }
    }
  }
  Ok(ExitCode::SUCCESS)
}
