//! Board property resolution.
//!
//! Resolution happens in two phases. [`BoardTarget::locate`] finds the
//! platform, board definition, core, and variant for an FQBN and validates its
//! options. [`resolve_properties`] then folds the property layers into one
//! table and expands it:
//!
//! 1. referenced core platform (when `build.core` is `vendor:core`)
//! 2. `platform.txt` and `platform.local.txt`
//! 3. board properties
//! 4. menu overlays, in menu declaration order
//! 5. runtime properties (paths, tools, caller overrides)
//!
//! Later layers win. Library resolution only needs the first phase, so the
//! two can proceed concurrently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{BoardDefinition, Catalog, PlatformRelease};
use crate::consts::{IDE_VERSION, SOFTWARE};
use crate::fqbn::Fqbn;
use crate::platform::os::Os;
use crate::properties::PropertyTable;
use crate::properties::expand::{ExpandError, expand_all};

#[derive(Debug, Error)]
pub enum BoardError {
  #[error("unknown board {fqbn}: platform {platform} is not installed")]
  UnknownPlatform { fqbn: String, platform: String },

  #[error("unknown board {fqbn}: platform {platform} has no board '{board}'")]
  UnknownBoard {
    fqbn: String,
    platform: String,
    board: String,
  },

  #[error("unknown board {fqbn}: referenced platform {reference} is not installed")]
  MissingReferencedPlatform { fqbn: String, reference: String },

  #[error("invalid option for {fqbn}: board has no menu '{option}' (available: {})", .available.join(", "))]
  UnknownMenu {
    fqbn: String,
    option: String,
    available: Vec<String>,
  },

  #[error("invalid option for {fqbn}: menu '{option}' has no value '{value}' (available: {})", .available.join(", "))]
  UnknownOptionValue {
    fqbn: String,
    option: String,
    value: String,
    available: Vec<String>,
  },

  #[error(transparent)]
  Expansion(#[from] ExpandError),
}

/// A platform and board located for an FQBN, with options validated.
#[derive(Debug, Clone)]
pub struct BoardTarget {
  /// The FQBN with every menu the board declares filled in.
  pub fqbn: Fqbn,
  pub platform: PlatformRelease,
  /// Platform providing the core when `build.core` names another vendor.
  pub core_platform: Option<PlatformRelease>,
  /// Platform providing the variant when `build.variant` names another vendor.
  pub variant_platform: Option<PlatformRelease>,
  pub board: BoardDefinition,
  pub core_dir: Option<PathBuf>,
  pub variant_dir: Option<PathBuf>,
  /// Platform, board, and menu layers merged; no referenced core, no runtime.
  layered: PropertyTable,
}

fn split_reference(value: &str) -> (Option<&str>, &str) {
  match value.split_once(':') {
    Some((vendor, name)) => (Some(vendor), name),
    None => (None, value),
  }
}

impl BoardTarget {
  /// Find the platform and board for `fqbn` and validate its options.
  pub fn locate(fqbn: &Fqbn, catalog: &Catalog, platform_pins: &BTreeMap<String, Version>) -> Result<Self, BoardError> {
    let platform_id = format!("{}:{}", fqbn.vendor(), fqbn.architecture());
    let platform = catalog
      .platform(fqbn.vendor(), fqbn.architecture(), platform_pins.get(&platform_id))
      .ok_or_else(|| BoardError::UnknownPlatform {
        fqbn: fqbn.to_string(),
        platform: platform_id.clone(),
      })?;

    let board = platform
      .board(fqbn.board_id())
      .or_else(|| {
        platform
          .boards
          .values()
          .find(|b| b.id.eq_ignore_ascii_case(fqbn.board_id()))
      })
      .ok_or_else(|| BoardError::UnknownBoard {
        fqbn: fqbn.to_string(),
        platform: platform_id.clone(),
        board: fqbn.board_id().to_string(),
      })?;

    let mut layered = platform.properties.clone();
    layered.merge(&board.properties);

    for (key, value) in fqbn.options() {
      let Some(menu) = board.menu(key) else {
        return Err(BoardError::UnknownMenu {
          fqbn: fqbn.to_string(),
          option: key.clone(),
          available: board.menu_order(),
        });
      };
      if menu.option(value).is_none() {
        return Err(BoardError::UnknownOptionValue {
          fqbn: fqbn.to_string(),
          option: key.clone(),
          value: value.clone(),
          available: menu.options.iter().map(|o| o.value.clone()).collect(),
        });
      }
    }

    let menu_order = board.menu_order();
    let mut canonical = fqbn.clone();
    for menu in &board.menus {
      let selected = match fqbn.option(&menu.id) {
        Some(value) => menu.option(value),
        None => menu.default_option(),
      };
      if let Some(option) = selected {
        layered.merge(&option.properties);
        canonical = canonical.with_option(&menu.id, &option.value, &menu_order);
      }
    }

    let core_platform = match split_reference(layered.get_or_empty("build.core")) {
      (Some(vendor), _) => Some(find_referenced(catalog, fqbn, vendor)?),
      (None, _) => None,
    };
    let variant_platform = match split_reference(layered.get_or_empty("build.variant")) {
      (Some(vendor), _) => Some(find_referenced(catalog, fqbn, vendor)?),
      (None, _) => None,
    };

    let core_dir = match split_reference(layered.get_or_empty("build.core")) {
      (_, "") => None,
      (_, core) => Some(core_platform.as_ref().unwrap_or(platform).dir.join("cores").join(core)),
    };
    let variant_dir = match split_reference(layered.get_or_empty("build.variant")) {
      (_, "") => None,
      (_, variant) => Some(
        variant_platform
          .as_ref()
          .unwrap_or(platform)
          .dir
          .join("variants")
          .join(variant),
      ),
    };

    debug!(
      fqbn = %canonical,
      platform = %platform.dir.display(),
      core = ?core_dir,
      variant = ?variant_dir,
      "located board"
    );

    Ok(Self {
      fqbn: canonical,
      platform: platform.clone(),
      core_platform,
      variant_platform,
      board: board.clone(),
      core_dir,
      variant_dir,
      layered,
    })
  }

  /// Menu ids of the board in declaration order.
  pub fn menu_order(&self) -> Vec<String> {
    self.board.menu_order()
  }
}

fn find_referenced(catalog: &Catalog, fqbn: &Fqbn, vendor: &str) -> Result<PlatformRelease, BoardError> {
  catalog
    .platform(&vendor.to_lowercase(), fqbn.architecture(), None)
    .cloned()
    .ok_or_else(|| BoardError::MissingReferencedPlatform {
      fqbn: fqbn.to_string(),
      reference: format!("{}:{}", vendor, fqbn.architecture()),
    })
}

/// Values that only exist at build time.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
  pub build_path: PathBuf,
  pub sketch_dir: PathBuf,
  pub sketch_name: String,
  /// Caller-supplied properties, applied last.
  pub extra: PropertyTable,
}

/// The outcome of property resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBoard {
  pub fqbn: Fqbn,
  pub board_name: String,
  pub platform_dir: PathBuf,
  pub core_dir: Option<PathBuf>,
  pub variant_dir: Option<PathBuf>,
  pub menu_order: Vec<String>,
  /// Merged table before expansion, for expanding recipes with step variables.
  #[serde(skip)]
  pub raw: PropertyTable,
  /// Merged table with every reference expanded.
  pub properties: PropertyTable,
}

impl ResolvedBoard {
  /// An expanded property, or `""` when absent.
  pub fn get(&self, key: &str) -> &str {
    self.properties.get_or_empty(key)
  }
}

fn runtime_layer(target: &BoardTarget, catalog: &Catalog, overrides: &RuntimeOverrides, os: Os) -> PropertyTable {
  let mut runtime = PropertyTable::new();
  let path = |p: &Path| p.to_string_lossy().to_string();

  runtime.insert("build.path", path(&overrides.build_path));
  runtime.insert("build.project_name", format!("{}.ino", overrides.sketch_name));
  runtime.insert("build.source.path", path(&overrides.sketch_dir));
  runtime.insert("build.fqbn", target.fqbn.to_string());
  runtime.insert("build.arch", target.fqbn.architecture().to_uppercase());
  if let Some(core) = &target.core_dir {
    runtime.insert("build.core.path", path(core));
  }
  if let Some(variant) = &target.variant_dir {
    runtime.insert("build.variant.path", path(variant));
  }
  runtime.insert("build.system.path", path(&target.platform.dir.join("system")));
  runtime.insert("runtime.platform.path", path(&target.platform.dir));
  runtime.insert("runtime.hardware.path", path(&target.platform.hardware_dir));
  runtime.insert("runtime.os", os.as_str());
  runtime.insert("runtime.ide.version", IDE_VERSION);
  runtime.insert("ide_version", IDE_VERSION);
  runtime.insert("software", SOFTWARE);

  for tool in catalog.tools() {
    runtime.insert(format!("runtime.tools.{}-{}.path", tool.name, tool.version), path(&tool.dir));
  }
  for (name, tool) in catalog.preferred_tools(&target.platform.vendor) {
    runtime.insert(format!("runtime.tools.{name}.path"), path(&tool.dir));
  }

  runtime
}

/// Merge all layers for `target` and expand the result.
pub fn resolve_properties(
  target: &BoardTarget,
  catalog: &Catalog,
  overrides: &RuntimeOverrides,
) -> Result<ResolvedBoard, BoardError> {
  let mut raw = match &target.core_platform {
    Some(core) => core.properties.clone(),
    None => PropertyTable::new(),
  };
  raw.merge(&target.layered);

  if raw.get("build.board").is_none() {
    let board = format!("{}_{}", target.fqbn.architecture(), target.board.id).to_uppercase();
    raw.insert("build.board", board.replace(['.', '-'], "_"));
  }

  raw.merge(&runtime_layer(target, catalog, overrides, Os::current()));
  raw.merge(&overrides.extra);

  let properties = expand_all(&raw)?;
  info!(fqbn = %target.fqbn, properties = properties.len(), "resolved board properties");

  Ok(ResolvedBoard {
    fqbn: target.fqbn.clone(),
    board_name: target.board.name.clone(),
    platform_dir: target.platform.dir.clone(),
    core_dir: target.core_dir.clone(),
    variant_dir: target.variant_dir.clone(),
    menu_order: target.menu_order(),
    raw,
    properties,
  })
}

/// Locate and resolve in one call.
pub fn resolve(
  fqbn: &Fqbn,
  catalog: &Catalog,
  platform_pins: &BTreeMap<String, Version>,
  overrides: &RuntimeOverrides,
) -> Result<ResolvedBoard, BoardError> {
  let target = BoardTarget::locate(fqbn, catalog, platform_pins)?;
  resolve_properties(&target, catalog, overrides)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::testutil::write_platform;
  use tempfile::TempDir;

  const PLATFORM: &str = "\
name=Test AVR
version=1.0.0
compiler.path={runtime.tools.avr-gcc.path}/bin/
compiler.c.flags=-c -Os {compiler.warning_flags}
compiler.warning_flags=-w
recipe.c.o.pattern=\"{compiler.path}avr-gcc\" {compiler.c.flags} -mmcu={build.mcu} -DF_CPU={build.f_cpu} {includes} \"{source_file}\" -o \"{object_file}\"
";

  const BOARDS: &str = "\
menu.speed=Clock

uno.name=Uno
uno.build.mcu=atmega328p
uno.build.f_cpu=16000000L
uno.build.core=arduino
uno.build.variant=standard

fast.name=Fast
fast.build.mcu=atmega328p
fast.build.core=arduino
fast.menu.speed.16=16 MHz
fast.menu.speed.16.build.f_cpu=16000000L
fast.menu.speed.8=8 MHz
fast.menu.speed.8.build.f_cpu=8000000L

clone.name=Clone
clone.build.core=vendor:arduino
clone.build.variant=standard
";

  fn fixture() -> (TempDir, Catalog) {
    let temp = TempDir::new().unwrap();
    write_platform(temp.path(), "vendor", "avr", PLATFORM, BOARDS);
    write_platform(
      temp.path(),
      "other",
      "avr",
      "name=Other\n",
      "clone.name=Clone\nclone.build.core=vendor:arduino\nclone.build.variant=vendor:standard\nclone.build.mcu=m\n",
    );
    let catalog = Catalog::load(&[temp.path().to_path_buf()]).unwrap();
    (temp, catalog)
  }

  fn overrides() -> RuntimeOverrides {
    RuntimeOverrides {
      build_path: PathBuf::from("/tmp/build"),
      sketch_dir: PathBuf::from("/sketches/Blink"),
      sketch_name: "Blink".to_string(),
      extra: PropertyTable::new(),
    }
  }

  fn resolve_str(catalog: &Catalog, fqbn: &str) -> Result<ResolvedBoard, BoardError> {
    resolve(&Fqbn::parse(fqbn).unwrap(), catalog, &BTreeMap::new(), &overrides())
  }

  #[test]
  fn board_without_menus_resolves_without_overlays() {
    let (_temp, catalog) = fixture();
    let board = resolve_str(&catalog, "vendor:avr:uno").unwrap();
    assert_eq!(board.fqbn.to_string(), "vendor:avr:uno");
    assert_eq!(board.get("build.f_cpu"), "16000000L");
    assert_eq!(board.get("build.project_name"), "Blink.ino");
    assert_eq!(board.get("build.arch"), "AVR");
    assert_eq!(board.get("build.board"), "AVR_UNO");
    assert_eq!(board.get("software"), "ARDUINO");
    assert!(board.core_dir.as_ref().unwrap().ends_with("vendor/avr/cores/arduino"));
    assert!(board.variant_dir.as_ref().unwrap().ends_with("vendor/avr/variants/standard"));
  }

  #[test]
  fn undeclared_option_is_rejected() {
    let (_temp, catalog) = fixture();
    let err = resolve_str(&catalog, "vendor:avr:uno:speed=16,cache=on").unwrap_err();
    assert!(matches!(&err, BoardError::UnknownMenu { option, .. } if option == "speed"));

    let err = resolve_str(&catalog, "vendor:avr:fast:speed=16,cache=on").unwrap_err();
    match err {
      BoardError::UnknownMenu { option, available, .. } => {
        assert_eq!(option, "cache");
        assert_eq!(available, vec!["speed"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn undeclared_value_is_rejected() {
    let (_temp, catalog) = fixture();
    let err = resolve_str(&catalog, "vendor:avr:fast:speed=20").unwrap_err();
    assert!(err.to_string().contains("no value '20'"));
  }

  #[test]
  fn selected_option_overlays_board() {
    let (_temp, catalog) = fixture();
    let board = resolve_str(&catalog, "vendor:avr:fast:speed=8").unwrap();
    assert_eq!(board.get("build.f_cpu"), "8000000L");
  }

  #[test]
  fn omitted_menu_defaults_to_first_value() {
    let (_temp, catalog) = fixture();
    let board = resolve_str(&catalog, "vendor:avr:fast").unwrap();
    assert_eq!(board.get("build.f_cpu"), "16000000L");
    assert_eq!(board.fqbn.to_string(), "vendor:avr:fast:speed=16");
  }

  #[test]
  fn unknown_board_and_platform() {
    let (_temp, catalog) = fixture();
    assert!(matches!(
      resolve_str(&catalog, "vendor:avr:mega"),
      Err(BoardError::UnknownBoard { .. })
    ));
    assert!(matches!(
      resolve_str(&catalog, "vendor:sam:due"),
      Err(BoardError::UnknownPlatform { .. })
    ));
  }

  #[test]
  fn recipe_expands_with_tools_and_absent_keys() {
    let (_temp, catalog) = fixture();
    let board = resolve_str(&catalog, "vendor:avr:uno").unwrap();
    // step variables are absent from the board table and expand to empty
    assert_eq!(
      board.get("recipe.c.o.pattern"),
      "\"/bin/avr-gcc\" -c -Os -w -mmcu=atmega328p -DF_CPU=16000000L  \"\" -o \"\""
    );
    assert!(board.raw.get("recipe.c.o.pattern").unwrap().contains("{source_file}"));
  }

  #[test]
  fn referenced_core_comes_from_other_vendor() {
    let (_temp, catalog) = fixture();
    let board = resolve_str(&catalog, "other:avr:clone").unwrap();
    assert!(board.core_dir.as_ref().unwrap().ends_with("vendor/avr/cores/arduino"));
    assert!(board.variant_dir.as_ref().unwrap().ends_with("vendor/avr/variants/standard"));
    // the referenced platform's properties are the lowest layer
    assert_eq!(board.get("compiler.warning_flags"), "-w");
    assert_eq!(board.get("name"), "Other");
    assert!(board.get("runtime.platform.path").ends_with("other/avr"));
  }

  #[test]
  fn extra_properties_win() {
    let (_temp, catalog) = fixture();
    let mut ov = overrides();
    ov.extra.insert("compiler.warning_flags", "-Wall");
    let board = resolve(
      &Fqbn::parse("vendor:avr:uno").unwrap(),
      &catalog,
      &BTreeMap::new(),
      &ov,
    )
    .unwrap();
    assert_eq!(board.get("compiler.c.flags"), "-c -Os -Wall");
  }

  #[test]
  fn expansion_cycle_is_reported() {
    let temp = TempDir::new().unwrap();
    write_platform(temp.path(), "v", "avr", "a={b}\nb={a}\n", "uno.name=Uno\n");
    let catalog = Catalog::load(&[temp.path().to_path_buf()]).unwrap();
    let err = resolve_str(&catalog, "v:avr:uno").unwrap_err();
    assert!(matches!(err, BoardError::Expansion(ExpandError::Cycle { .. })));
  }

  #[test]
  fn resolution_is_idempotent() {
    let (_temp, catalog) = fixture();
    let a = resolve_str(&catalog, "vendor:avr:fast:speed=8").unwrap();
    let b = resolve_str(&catalog, "vendor:avr:fast:speed=8").unwrap();
    assert_eq!(a.properties, b.properties);
  }
}
