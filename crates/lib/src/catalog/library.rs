//! Installed library metadata.
//!
//! A library is a directory, optionally carrying `library.properties`. The
//! metadata decides which headers it exports, where its sources live, and
//! whether it ships prebuilt archives.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use serde::Serialize;
use tracing::warn;

use super::{CatalogError, parse_version_lenient, sorted_dirs};
use crate::properties::PropertyTable;

/// Header file extensions a library can export.
pub const HEADER_EXTENSIONS: [&str; 3] = ["h", "hpp", "hh"];

/// Where a library's sources live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryLayout {
  /// Sources in the root and `utility/`.
  Flat,
  /// Sources anywhere under `src/`.
  Recursive,
}

/// Prebuilt archive support (`precompiled=` in `library.properties`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precompiled {
  No,
  /// Archives are linked when present, sources otherwise.
  WithSources,
  /// Only archives are used; sources are never compiled.
  Full,
}

/// A declared dependency (`depends=Name (>=1.0.0)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyConstraint {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub requirement: Option<VersionReq>,
}

/// A library found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryCandidate {
  pub name: String,
  pub root_path: PathBuf,
  pub version: Option<Version>,
  pub precompiled: Precompiled,
  /// Headers listed by `includes=`; empty when not declared.
  pub declared_includes: Vec<String>,
  pub declared_dependencies: Vec<DependencyConstraint>,
  /// `depends=` is present and empty.
  pub declares_no_dependencies: bool,
  pub architectures: Vec<String>,
  pub layout: LibraryLayout,
  pub ldflags: String,
}

impl LibraryCandidate {
  /// Load the library rooted at `dir`.
  pub fn load(dir: &Path) -> Result<Self, CatalogError> {
    let dir_name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let metadata_path = dir.join("library.properties");
    let props = PropertyTable::load_optional(&metadata_path)?;

    let name = props.get("name").filter(|n| !n.is_empty()).unwrap_or(dir_name.as_str()).to_string();
    let version = props.get("version").and_then(|v| {
      let parsed = parse_version_lenient(v);
      if parsed.is_none() {
        warn!(library = %name, version = v, "ignoring unparsable library version");
      }
      parsed
    });

    let precompiled = match props.get("precompiled").map(|v| v.trim().to_lowercase()) {
      Some(v) if v == "true" => Precompiled::WithSources,
      Some(v) if v == "full" => Precompiled::Full,
      _ => Precompiled::No,
    };

    let layout = if dir.join("src").is_dir() {
      LibraryLayout::Recursive
    } else {
      LibraryLayout::Flat
    };

    Ok(Self {
      name,
      root_path: dir.to_path_buf(),
      version,
      precompiled,
      declared_includes: split_list(props.get_or_empty("includes")),
      declared_dependencies: parse_depends(props.get_or_empty("depends")),
      declares_no_dependencies: props.get("depends").is_some_and(|d| d.trim().is_empty()),
      architectures: split_list(props.get("architectures").unwrap_or("*"))
        .into_iter()
        .map(|a| a.to_lowercase())
        .collect(),
      layout,
      ldflags: props.get_or_empty("ldflags").to_string(),
    })
  }

  /// Directory added to the include path.
  pub fn include_dir(&self) -> PathBuf {
    match self.layout {
      LibraryLayout::Recursive => self.root_path.join("src"),
      LibraryLayout::Flat => self.root_path.clone(),
    }
  }

  /// Directory name used for object and archive paths.
  pub fn dir_name(&self) -> String {
    self
      .root_path
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| self.name.clone())
  }

  pub fn supports_architecture(&self, arch: &str) -> bool {
    self.architectures.iter().any(|a| a == "*" || a == arch)
  }

  /// Whether `#include <header>` is satisfied by this library.
  pub fn exports_header(&self, header: &str) -> bool {
    if !self.declared_includes.is_empty() {
      return self.declared_includes.iter().any(|h| h == header);
    }
    self.include_dir().join(header).is_file()
  }

  /// Top-level headers of the include directory, sorted.
  pub fn headers(&self) -> Vec<String> {
    if !self.declared_includes.is_empty() {
      return self.declared_includes.clone();
    }
    let Ok(entries) = fs::read_dir(self.include_dir()) else {
      return Vec::new();
    };
    let mut headers: Vec<String> = entries
      .filter_map(|e| e.ok())
      .map(|e| e.path())
      .filter(|p| p.is_file() && is_header(p))
      .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
      .collect();
    headers.sort();
    headers
  }

  /// Directory holding the prebuilt archive for `mcu` (and FPU flags).
  ///
  /// Tries `<src>/<mcu>/<fpu>-<float_abi>` first, then `<src>/<mcu>`.
  pub fn precompiled_dir(&self, mcu: &str, fpu: &str, float_abi: &str) -> Option<PathBuf> {
    if self.precompiled == Precompiled::No || mcu.is_empty() {
      return None;
    }
    let base = self.include_dir().join(mcu);
    if !fpu.is_empty() && !float_abi.is_empty() {
      let specific = base.join(format!("{fpu}-{float_abi}"));
      if specific.is_dir() {
        return Some(specific);
      }
    }
    base.is_dir().then_some(base)
  }
}

pub(crate) fn is_header(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| HEADER_EXTENSIONS.contains(&e))
}

fn split_list(text: &str) -> Vec<String> {
  text
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// Parse `depends=A, B (>=1.2.0), C`.
pub fn parse_depends(text: &str) -> Vec<DependencyConstraint> {
  split_list(text)
    .into_iter()
    .map(|entry| match entry.split_once('(') {
      Some((name, rest)) => {
        let req_text = rest.trim_end_matches(')').trim();
        let requirement = VersionReq::parse(req_text).ok();
        if requirement.is_none() {
          warn!(dependency = %entry, "ignoring unparsable version constraint");
        }
        DependencyConstraint {
          name: name.trim().to_string(),
          requirement,
        }
      }
      None => DependencyConstraint {
        name: entry,
        requirement: None,
      },
    })
    .collect()
}

/// Every library directly under `root`, grouped by name.
///
/// Directories that fail to load are skipped with a warning. Versions of
/// one name keep directory order.
pub fn scan_library_root(root: &Path) -> Result<BTreeMap<String, Vec<LibraryCandidate>>, CatalogError> {
  let mut libraries: BTreeMap<String, Vec<LibraryCandidate>> = BTreeMap::new();
  for dir in sorted_dirs(root)? {
    match LibraryCandidate::load(&dir) {
      Ok(lib) => libraries.entry(lib.name.clone()).or_default().push(lib),
      Err(err) => warn!(dir = %dir.display(), error = %err, "skipping unreadable library"),
    }
  }
  Ok(libraries)
}
