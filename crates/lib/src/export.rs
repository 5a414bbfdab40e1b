//! Copying finished artifacts out of the build path.
//!
//! The build path keeps its copies; they are what the next incremental build
//! checks against.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::fqbn::Fqbn;
use crate::plan::ArtifactKind;

#[derive(Debug, Error)]
pub enum ExportError {
  #[error("failed to create export directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("artifact path has no file name: {0}")]
  NoFileName(PathBuf),
}

/// The default export directory: `<sketch>/build/<vendor.arch.board...>`.
pub fn default_export_dir(sketch_dir: &Path, fqbn: &Fqbn) -> PathBuf {
  sketch_dir.join("build").join(fqbn.build_dir_name())
}

/// Copy every artifact into `destination`, keeping file names.
///
/// Returns where each artifact was written.
pub fn export_artifacts(
  artifacts: &BTreeMap<ArtifactKind, PathBuf>,
  destination: &Path,
) -> Result<BTreeMap<ArtifactKind, PathBuf>, ExportError> {
  fs::create_dir_all(destination).map_err(|source| ExportError::CreateDir {
    path: destination.to_path_buf(),
    source,
  })?;

  let mut exported = BTreeMap::new();
  for (kind, from) in artifacts {
    let name = from.file_name().ok_or_else(|| ExportError::NoFileName(from.clone()))?;
    let to = destination.join(name);
    fs::copy(from, &to).map_err(|source| ExportError::Copy {
      from: from.clone(),
      to: to.clone(),
      source,
    })?;
    debug!(kind = ?kind, to = %to.display(), "exported artifact");
    exported.insert(*kind, to);
  }

  info!(count = exported.len(), destination = %destination.display(), "exported artifacts");
  Ok(exported)
}
