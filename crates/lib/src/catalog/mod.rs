//! Read-only index of installed platforms, boards, and tools.
//!
//! Hardware roots are scanned in two layouts:
//!
//! - packaged: `<root>/<vendor>/hardware/<arch>/<version>/` with tools under
//!   `<root>/<vendor>/tools/<name>/<version>/`
//! - sketchbook: `<root>/<vendor>/<arch>/`, version taken from `platform.txt`
//!
//! Nothing here is ever written; the catalog only describes what is installed.

pub mod library;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::platform::os::Os;
use crate::properties::{PropertiesError, PropertyTable, parse_lines, read_file};

#[derive(Debug, Error)]
pub enum CatalogError {
  #[error(transparent)]
  Properties(#[from] PropertiesError),

  #[error("failed to read directory {path}: {source}")]
  ReadDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Parse a version the way package authors write them.
///
/// Accepts a leading `v`, and pads missing minor or patch components with
/// zero (`1.8` is `1.8.0`).
pub fn parse_version_lenient(text: &str) -> Option<Version> {
  let text = text.trim().trim_start_matches('v');
  if let Ok(version) = Version::parse(text) {
    return Some(version);
  }
  let (core, pre) = match text.split_once('-') {
    Some((core, pre)) => (core, Some(pre)),
    None => (text, None),
  };
  let mut parts = core.split('.');
  let mut next = || -> Option<u64> {
    match parts.next() {
      Some(p) => p.parse().ok(),
      None => Some(0),
    }
  };
  let (major, minor, patch) = (next()?, next()?, next()?);
  if parts.next().is_some() {
    return None;
  }
  let mut version = Version::new(major, minor, patch);
  if let Some(pre) = pre {
    version.pre = semver::Prerelease::new(pre).ok()?;
  }
  Some(version)
}

/// One option of a board menu (`uno.menu.cpu.atmega328=ATmega328P`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
  pub value: String,
  pub label: String,
  /// Properties overlaid when this option is selected.
  pub properties: PropertyTable,
}

/// A configurable menu of a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardMenu {
  pub id: String,
  pub label: String,
  /// Options in declaration order; the first is the default.
  pub options: Vec<MenuOption>,
}

impl BoardMenu {
  pub fn option(&self, value: &str) -> Option<&MenuOption> {
    self.options.iter().find(|o| o.value == value)
  }

  pub fn default_option(&self) -> Option<&MenuOption> {
    self.options.first()
  }
}

/// A board defined by a platform's `boards.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDefinition {
  pub id: String,
  pub name: String,
  /// Board properties without the `menu.` sub-tree.
  pub properties: PropertyTable,
  /// Menus in declaration order.
  pub menus: Vec<BoardMenu>,
}

impl BoardDefinition {
  pub fn menu(&self, id: &str) -> Option<&BoardMenu> {
    self.menus.iter().find(|m| m.id == id)
  }

  pub fn menu_order(&self) -> Vec<String> {
    self.menus.iter().map(|m| m.id.clone()).collect()
  }
}

/// An installed platform release.
#[derive(Debug, Clone)]
pub struct PlatformRelease {
  pub vendor: String,
  pub architecture: String,
  pub version: Option<Version>,
  pub dir: PathBuf,
  /// Root of the hardware tree that contains this platform.
  pub hardware_dir: PathBuf,
  /// `platform.txt` merged with `platform.local.txt`.
  pub properties: PropertyTable,
  pub boards: BTreeMap<String, BoardDefinition>,
}

impl PlatformRelease {
  /// Load a platform from its directory.
  pub fn load(vendor: &str, architecture: &str, dir: &Path, hardware_dir: &Path) -> Result<Self, CatalogError> {
    let mut properties = PropertyTable::load_optional(&dir.join("platform.txt"))?;
    properties.merge(&PropertyTable::load_optional(&dir.join("platform.local.txt"))?);

    let mut board_lines = Vec::new();
    for name in ["boards.txt", "boards.local.txt"] {
      let path = dir.join(name);
      if path.is_file() {
        let text = read_file(&path)?;
        board_lines.extend(parse_lines(&text, &path)?);
      }
    }
    let boards = parse_boards(&board_lines, Os::current());

    let version = dir
      .file_name()
      .and_then(|n| n.to_str())
      .and_then(parse_version_lenient)
      .or_else(|| properties.get("version").and_then(parse_version_lenient));

    debug!(
      vendor,
      architecture,
      dir = %dir.display(),
      boards = boards.len(),
      "loaded platform"
    );

    Ok(Self {
      vendor: vendor.to_lowercase(),
      architecture: architecture.to_lowercase(),
      version,
      dir: dir.to_path_buf(),
      hardware_dir: hardware_dir.to_path_buf(),
      properties,
      boards,
    })
  }

  pub fn board(&self, id: &str) -> Option<&BoardDefinition> {
    self.boards.get(id)
  }

  pub fn id(&self) -> String {
    format!("{}:{}", self.vendor, self.architecture)
  }

  /// Directory of bundled libraries.
  pub fn libraries_dir(&self) -> PathBuf {
    self.dir.join("libraries")
  }
}

/// Build board definitions from `boards.txt` lines, keeping declaration order.
fn parse_boards(lines: &[(String, String)], os: Os) -> BTreeMap<String, BoardDefinition> {
  let mut table: PropertyTable = lines.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
  table.apply_os_overrides(os);

  let menu_labels = table.sub_tree("menu");
  let mut declared_menus: Vec<String> = Vec::new();
  let mut board_ids: Vec<String> = Vec::new();
  let mut menu_first_seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
  let mut option_first_seen: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();

  for (key, _) in lines {
    let mut parts = key.split('.');
    let Some(first) = parts.next() else { continue };
    if first == "menu" {
      if let (Some(id), None) = (parts.next(), parts.next())
        && !declared_menus.iter().any(|m| m == id)
      {
        declared_menus.push(id.to_string());
      }
      continue;
    }
    if !board_ids.iter().any(|b| b == first) {
      board_ids.push(first.to_string());
    }
    if parts.next() == Some("menu")
      && let (Some(menu), Some(value)) = (parts.next(), parts.next())
    {
      if Os::PROPERTY_SUFFIXES.contains(&value) {
        continue;
      }
      let menus = menu_first_seen.entry(first.to_string()).or_default();
      if !menus.iter().any(|m| m == menu) {
        menus.push(menu.to_string());
      }
      let options = option_first_seen
        .entry((first.to_string(), menu.to_string()))
        .or_default();
      if !options.iter().any(|o| o == value) {
        options.push(value.to_string());
      }
    }
  }

  let mut boards = BTreeMap::new();
  for id in board_ids {
    let all = table.sub_tree(&id);
    if all.is_empty() {
      continue;
    }
    let mut properties = PropertyTable::new();
    for (k, v) in all.iter() {
      if !k.starts_with("menu.") {
        properties.insert(k, v);
      }
    }

    let mut used = menu_first_seen.remove(&id).unwrap_or_default();
    used.sort_by_key(|m| declared_menus.iter().position(|d| d == m).unwrap_or(usize::MAX));

    let menus = used
      .into_iter()
      .map(|menu_id| {
        let menu_tree = all.sub_tree(&format!("menu.{menu_id}"));
        let options = option_first_seen
          .remove(&(id.clone(), menu_id.clone()))
          .unwrap_or_default()
          .into_iter()
          .map(|value| MenuOption {
            label: menu_tree.get(&value).unwrap_or(value.as_str()).to_string(),
            properties: menu_tree.sub_tree(&value),
            value,
          })
          .collect();
        BoardMenu {
          label: menu_labels.get(&menu_id).unwrap_or(menu_id.as_str()).to_string(),
          id: menu_id,
          options,
        }
      })
      .collect();

    boards.insert(
      id.clone(),
      BoardDefinition {
        name: properties.get("name").unwrap_or(id.as_str()).to_string(),
        id,
        properties,
        menus,
      },
    );
  }
  boards
}

/// An installed tool release (`runtime.tools.<name>.path`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRelease {
  pub vendor: String,
  pub name: String,
  pub version: String,
  pub dir: PathBuf,
}

/// Index of everything installed under a set of hardware roots.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  roots: Vec<PathBuf>,
  platforms: Vec<PlatformRelease>,
  tools: Vec<ToolRelease>,
}

pub(crate) fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>, CatalogError> {
  if !path.is_dir() {
    return Ok(Vec::new());
  }
  let mut dirs = Vec::new();
  let walker = WalkDir::new(path)
    .min_depth(1)
    .max_depth(1)
    .follow_links(true)
    .sort_by_file_name();
  for entry in walker {
    let entry = entry.map_err(|err| CatalogError::ReadDir {
      path: path.to_path_buf(),
      source: err.into(),
    })?;
    let hidden = entry.file_name().to_str().is_none_or(|n| n.starts_with('.'));
    if entry.file_type().is_dir() && !hidden {
      dirs.push(entry.into_path());
    }
  }
  Ok(dirs)
}

fn dir_name(path: &Path) -> String {
  path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn is_platform_dir(path: &Path) -> bool {
  path.join("boards.txt").is_file() || path.join("platform.txt").is_file()
}

impl Catalog {
  /// Scan hardware roots. Roots that do not exist are skipped.
  pub fn load(roots: &[PathBuf]) -> Result<Self, CatalogError> {
    let mut catalog = Catalog {
      roots: roots.to_vec(),
      ..Default::default()
    };

    for root in roots {
      for vendor_dir in sorted_dirs(root)? {
        let vendor = dir_name(&vendor_dir);
        let hardware = vendor_dir.join("hardware");
        if hardware.is_dir() {
          for arch_dir in sorted_dirs(&hardware)? {
            let arch = dir_name(&arch_dir);
            for version_dir in sorted_dirs(&arch_dir)? {
              if is_platform_dir(&version_dir) {
                catalog
                  .platforms
                  .push(PlatformRelease::load(&vendor, &arch, &version_dir, &hardware)?);
              }
            }
          }
          for tool_dir in sorted_dirs(&vendor_dir.join("tools"))? {
            for version_dir in sorted_dirs(&tool_dir)? {
              catalog.tools.push(ToolRelease {
                vendor: vendor.to_lowercase(),
                name: dir_name(&tool_dir),
                version: dir_name(&version_dir),
                dir: version_dir,
              });
            }
          }
        } else {
          for arch_dir in sorted_dirs(&vendor_dir)? {
            if is_platform_dir(&arch_dir) {
              let arch = dir_name(&arch_dir);
              catalog
                .platforms
                .push(PlatformRelease::load(&vendor, &arch, &arch_dir, &vendor_dir)?);
            }
          }
        }
      }
    }

    if catalog.platforms.is_empty() {
      warn!(roots = ?roots, "no platforms found in hardware roots");
    }
    Ok(catalog)
  }

  pub fn roots(&self) -> &[PathBuf] {
    &self.roots
  }

  pub fn platforms(&self) -> &[PlatformRelease] {
    &self.platforms
  }

  pub fn tools(&self) -> &[ToolRelease] {
    &self.tools
  }

  /// Find a platform, honoring a version pin.
  ///
  /// Without a pin the highest version wins; among equal versions the one
  /// from the earlier root wins.
  pub fn platform(&self, vendor: &str, architecture: &str, pin: Option<&Version>) -> Option<&PlatformRelease> {
    let mut candidates = self
      .platforms
      .iter()
      .filter(|p| p.vendor == vendor && p.architecture == architecture);
    match pin {
      Some(pin) => candidates.find(|p| p.version.as_ref() == Some(pin)),
      None => candidates.fold(None, |best: Option<&PlatformRelease>, p| match best {
        Some(b) if b.version >= p.version => Some(b),
        _ => Some(p),
      }),
    }
  }

  /// The tool release used for `runtime.tools.<name>.path`, per tool name.
  ///
  /// The highest version wins; among equal versions, `prefer_vendor` wins.
  pub fn preferred_tools(&self, prefer_vendor: &str) -> BTreeMap<String, &ToolRelease> {
    let mut best: BTreeMap<String, &ToolRelease> = BTreeMap::new();
    for tool in &self.tools {
      let rank = |t: &ToolRelease| (parse_version_lenient(&t.version), t.vendor == prefer_vendor);
      match best.get(&tool.name) {
        Some(current) if rank(current) >= rank(tool) => {}
        _ => {
          best.insert(tool.name.clone(), tool);
        }
      }
    }
    best
  }
}
