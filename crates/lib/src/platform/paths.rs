use std::path::{Path, PathBuf};

use crate::consts::BUILD_DIR_PREFIX;
use crate::util::hash::md5_upper;

/// Returns the user's home directory, if the environment names one.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if the environment names one.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the default sketchbook directory.
#[cfg(target_os = "linux")]
pub fn sketchbook_dir() -> Option<PathBuf> {
  home_dir().map(|home| home.join("Arduino"))
}

/// Returns the default sketchbook directory.
#[cfg(not(target_os = "linux"))]
pub fn sketchbook_dir() -> Option<PathBuf> {
  home_dir().map(|home| home.join("Documents").join("Arduino"))
}

/// Returns the user library directory (`<sketchbook>/libraries`).
pub fn user_library_dir() -> Option<PathBuf> {
  sketchbook_dir().map(|dir| dir.join("libraries"))
}

/// Returns the default build directory for a sketch.
///
/// `<tmp>/arduino-sketch-<MD5 of the sketch path, uppercase hex>`, so every
/// sketch gets its own stable directory.
pub fn default_build_path(sketch_dir: &Path) -> PathBuf {
  let digest = md5_upper(sketch_dir.to_string_lossy().as_bytes());
  std::env::temp_dir().join(format!("{BUILD_DIR_PREFIX}{digest}"))
}
