//! Persistent step cache.
//!
//! # Storage Layout
//!
//! ```text
//! <build>/.sketchforge-cache/
//! ├── identity.json
//! └── entries/
//!     └── <sha256 of step id>.json
//! ```
//!
//! An entry is only trusted when its fingerprint matches the step as planned
//! now, every recorded output still exists with the recorded content, and
//! every header discovered from the step's dependency file is unchanged.
//! Entries are written atomically after each successful step.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{CACHE_DIR_NAME, CACHE_FORMAT_VERSION};
use crate::util::hash::{ContentHash, hash_bytes, hash_file};

const IDENTITY_FILENAME: &str = "identity.json";
const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to clear cache {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache data: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// The build a cache directory belongs to.
///
/// A build path reused for another board or sketch starts from an empty
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentity {
  pub version: u32,
  pub fqbn: String,
  pub sketch_path: PathBuf,
  pub hardware_roots: Vec<PathBuf>,
  pub library_roots: Vec<PathBuf>,
}

impl BuildIdentity {
  pub fn new(fqbn: &str, sketch_path: &Path, hardware_roots: &[PathBuf], library_roots: &[PathBuf]) -> Self {
    Self {
      version: CACHE_FORMAT_VERSION,
      fqbn: fqbn.to_string(),
      sketch_path: sketch_path.to_path_buf(),
      hardware_roots: hardware_roots.to_vec(),
      library_roots: library_roots.to_vec(),
    }
  }
}

/// What a successful step left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub version: u32,
  pub step_id: String,
  pub fingerprint: ContentHash,
  /// Declared outputs and their content hashes.
  pub outputs: BTreeMap<PathBuf, ContentHash>,
  /// Headers read by the step, from its `.d` file.
  pub discovered_inputs: BTreeMap<PathBuf, ContentHash>,
  /// Captured stdout and stderr, replayed on a hit.
  pub captured_output: String,
}

impl CacheEntry {
  /// Whether every output and discovered input still has its recorded content.
  pub fn is_current(&self) -> bool {
    let unchanged = |(path, hash): (&PathBuf, &ContentHash)| match hash_file(path) {
      Ok(actual) => actual == *hash,
      Err(_) => false,
    };
    self.outputs.iter().all(unchanged) && self.discovered_inputs.iter().all(unchanged)
  }
}

/// Step cache rooted under one build path.
#[derive(Debug, Clone)]
pub struct CacheStore {
  dir: PathBuf,
}

impl CacheStore {
  /// Open the cache for `build_path`, wiping it when `identity` changed.
  pub fn open(build_path: &Path, identity: &BuildIdentity) -> Result<Self, CacheError> {
    let dir = build_path.join(CACHE_DIR_NAME);
    let store = Self { dir };
    let identity_path = store.dir.join(IDENTITY_FILENAME);

    let previous: Option<BuildIdentity> = fs::read_to_string(&identity_path)
      .ok()
      .and_then(|content| serde_json::from_str(&content).ok());

    if previous.as_ref() != Some(identity) {
      if previous.is_some() {
        info!(fqbn = %identity.fqbn, "build identity changed, clearing cache");
      }
      store.clear()?;
      let entries = store.dir.join(ENTRIES_DIR);
      fs::create_dir_all(&entries).map_err(|source| CacheError::CreateDir { path: entries, source })?;
      let content = serde_json::to_vec_pretty(identity).map_err(CacheError::Serialize)?;
      write_atomic(&store.dir, &identity_path, &content)?;
    }

    Ok(store)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn entry_path(&self, step_id: &str) -> PathBuf {
    self
      .dir
      .join(ENTRIES_DIR)
      .join(format!("{}.json", hash_bytes(step_id.as_bytes())))
  }

  /// A valid entry for `step_id` with this fingerprint, if any.
  pub fn lookup(&self, step_id: &str, fingerprint: &ContentHash) -> Option<CacheEntry> {
    let path = self.entry_path(step_id);
    let content = fs::read_to_string(&path).ok()?;
    let entry: CacheEntry = match serde_json::from_str(&content) {
      Ok(entry) => entry,
      Err(err) => {
        warn!(step = step_id, error = %err, "ignoring corrupt cache entry");
        return None;
      }
    };

    if entry.version != CACHE_FORMAT_VERSION || entry.step_id != step_id {
      return None;
    }
    if entry.fingerprint != *fingerprint {
      debug!(step = step_id, "fingerprint changed");
      return None;
    }
    if !entry.is_current() {
      debug!(step = step_id, "outputs or discovered inputs changed");
      return None;
    }
    Some(entry)
  }

  /// Persist `entry`, replacing any previous entry for the step.
  pub fn record(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let path = self.entry_path(&entry.step_id);
    let dir = self.dir.join(ENTRIES_DIR);
    fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
      path: dir.clone(),
      source,
    })?;
    let content = serde_json::to_vec(entry).map_err(CacheError::Serialize)?;
    write_atomic(&dir, &path, &content)?;
    debug!(step = %entry.step_id, "recorded cache entry");
    Ok(())
  }

  /// Drop the entry for `step_id`.
  pub fn invalidate(&self, step_id: &str) -> Result<(), CacheError> {
    let path = self.entry_path(step_id);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Remove { path, source }),
    }
  }

  /// Remove every entry and the identity file.
  pub fn clear(&self) -> Result<(), CacheError> {
    match fs::remove_dir_all(&self.dir) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Remove {
        path: self.dir.clone(),
        source,
      }),
    }
  }
}

/// Write to a temp file in `dir`, then rename over `path`.
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), CacheError> {
  let write_err = |source| CacheError::Write {
    path: path.to_path_buf(),
    source,
  };
  let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(content).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;
  Ok(())
}
