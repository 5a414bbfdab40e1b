//! Build settings loaded from the environment, and build profiles.
//!
//! Settings are optional knobs that apply to every build. A profile pins the
//! board and exact library or platform versions for one sketch.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::paths;

/// What to do when another build holds the build path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
  /// Fail immediately with a conflict error.
  #[default]
  FailFast,
  /// Block until the other build finishes.
  Wait,
}

/// Settings shared by all builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Maximum concurrent compile commands. 0 uses the available parallelism.
  pub jobs: usize,
  /// Export binaries next to the sketch even without an output directory
  /// (SKETCHFORGE_ALWAYS_EXPORT_BINARIES or ARDUINO_SKETCH_ALWAYS_EXPORT_BINARIES).
  pub always_export_binaries: bool,
  /// Behavior when the build path is locked (SKETCHFORGE_LOCK_WAIT=1 waits).
  pub lock_policy: LockPolicy,
  /// User library directory (SKETCHFORGE_USER_LIBRARIES).
  pub user_library_dir: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      jobs: 0,
      always_export_binaries: false,
      lock_policy: LockPolicy::FailFast,
      user_library_dir: paths::user_library_dir(),
    }
  }
}

fn env_flag(name: &str) -> Option<bool> {
  env::var(name).ok().map(|v| {
    let lower = v.trim().to_lowercase();
    !(lower.is_empty() || lower == "0" || lower == "false" || lower == "off" || lower == "no")
  })
}

impl Settings {
  /// Load settings from environment variables over the defaults.
  pub fn from_env() -> Self {
    let mut settings = Self::default();

    if let Some(jobs) = env::var("SKETCHFORGE_JOBS").ok().and_then(|v| v.trim().parse().ok()) {
      settings.jobs = jobs;
    }
    if let Some(always) =
      env_flag("SKETCHFORGE_ALWAYS_EXPORT_BINARIES").or_else(|| env_flag("ARDUINO_SKETCH_ALWAYS_EXPORT_BINARIES"))
    {
      settings.always_export_binaries = always;
    }
    if env_flag("SKETCHFORGE_LOCK_WAIT") == Some(true) {
      settings.lock_policy = LockPolicy::Wait;
    }
    if let Some(dir) = env::var_os("SKETCHFORGE_USER_LIBRARIES") {
      settings.user_library_dir = Some(PathBuf::from(dir));
    }

    settings
  }

  /// The effective job count.
  pub fn effective_jobs(&self) -> usize {
    if self.jobs > 0 {
      self.jobs
    } else {
      std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PinError {
  #[error("invalid pin '{0}', expected NAME@VERSION")]
  Format(String),

  #[error("invalid version in pin '{pin}': {message}")]
  Version { pin: String, message: String },
}

/// Parse a `NAME@VERSION` pin.
pub fn parse_pin(text: &str) -> Result<(String, Version), PinError> {
  let Some((name, version)) = text.rsplit_once('@') else {
    return Err(PinError::Format(text.to_string()));
  };
  let name = name.trim();
  if name.is_empty() {
    return Err(PinError::Format(text.to_string()));
  }
  let version = crate::catalog::parse_version_lenient(version.trim()).ok_or_else(|| PinError::Version {
    pin: text.to_string(),
    message: format!("'{}' is not a version", version.trim()),
  })?;
  Ok((name.to_string(), version))
}

/// Pinned board and versions for a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildProfile {
  /// The board to build for, overriding the request's FQBN.
  pub fqbn: Option<String>,
  /// Library name to exact version.
  pub library_pins: BTreeMap<String, Version>,
  /// Platform `vendor:arch` to exact version.
  pub platform_pins: BTreeMap<String, Version>,
}

impl BuildProfile {
  /// Add a pin; names containing `:` pin a platform, others a library.
  pub fn pin(&mut self, text: &str) -> Result<(), PinError> {
    let (name, version) = parse_pin(text)?;
    if name.contains(':') {
      self.platform_pins.insert(name.to_lowercase(), version);
    } else {
      self.library_pins.insert(name, version);
    }
    Ok(())
  }
}
