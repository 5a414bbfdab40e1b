mod boards;
mod compile;
mod plan;
mod properties;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use sketchforge_lib::catalog::Catalog;
use sketchforge_lib::compile::CompileRequest;
use sketchforge_lib::config::Settings;
use sketchforge_lib::platform::paths;
use sketchforge_lib::properties::PropertyTable;

pub use boards::cmd_boards;
pub use compile::{CompileArgs, cmd_compile};
pub use plan::cmd_plan;
pub use properties::cmd_properties;

/// Where to look for installed platforms.
#[derive(Debug, Args)]
pub struct HardwareArgs {
  /// Hardware root to scan for platforms (repeatable; defaults to <sketchbook>/hardware)
  #[arg(long = "hardware", value_name = "DIR")]
  pub dirs: Vec<PathBuf>,
}

impl HardwareArgs {
  pub fn roots(&self) -> Vec<PathBuf> {
    if !self.dirs.is_empty() {
      return self.dirs.clone();
    }
    paths::sketchbook_dir()
      .map(|dir| vec![dir.join("hardware")])
      .unwrap_or_default()
  }

  pub fn load_catalog(&self) -> Result<Catalog> {
    let roots = self.roots();
    Catalog::load(&roots).with_context(|| format!("Failed to scan hardware roots: {roots:?}"))
  }
}

/// Arguments shared by every command that resolves a build.
#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Sketch folder or its main file
  #[arg(default_value = ".")]
  pub sketch: PathBuf,

  /// Fully qualified board name, e.g. arduino:avr:nano:cpu=atmega328old
  #[arg(short = 'b', long)]
  pub fqbn: Option<String>,

  #[command(flatten)]
  pub hardware: HardwareArgs,

  /// Additional library folder (repeatable)
  #[arg(long = "libraries", value_name = "DIR")]
  pub libraries: Vec<PathBuf>,

  /// Build directory (defaults to a per-sketch directory under the temp dir)
  #[arg(long)]
  pub build_path: Option<PathBuf>,

  /// Pin a library (NAME@VERSION) or platform (VENDOR:ARCH@VERSION)
  #[arg(long = "pin", value_name = "NAME@VERSION")]
  pub pins: Vec<String>,

  /// Property applied over the board's own (repeatable)
  #[arg(long = "prop", value_name = "KEY=VALUE", value_parser = parse_property)]
  pub properties: Vec<(String, String)>,
}

fn parse_property(text: &str) -> Result<(String, String), String> {
  match text.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{text}'")),
  }
}

impl BuildArgs {
  /// A compile request from these arguments over the environment's settings.
  pub fn request(&self) -> Result<CompileRequest> {
    let mut request = CompileRequest {
      sketch_path: self.sketch.clone(),
      fqbn: self.fqbn.clone(),
      build_path: self.build_path.clone(),
      library_dirs: self.libraries.clone(),
      settings: Settings::from_env(),
      ..CompileRequest::default()
    };
    for pin in &self.pins {
      request.profile.pin(pin).with_context(|| format!("Invalid --pin {pin}"))?;
    }
    let mut extra = PropertyTable::new();
    for (key, value) in &self.properties {
      extra.insert(key.clone(), value.clone());
    }
    request.extra_properties = extra;
    Ok(request)
  }
}
