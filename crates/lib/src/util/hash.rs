//! Hashing utilities for cache fingerprints and output verification.
//!
//! - `ContentHash`: a full 64-character SHA-256 of file or byte content
//! - `Fingerprinter`: an incremental hasher over labelled fields
//! - `hash_file()` / `hash_bytes()`: one-shot content hashing
//! - `md5_upper()`: build directory names

use std::fs;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA-256 hash of the file.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Uppercase hex MD5 of `data`.
///
/// Names per-sketch build directories (`arduino-sketch-<MD5>`).
pub fn md5_upper(data: &[u8]) -> String {
  hex::encode_upper(Md5::digest(data))
}

/// Incremental SHA-256 over labelled, length-delimited fields.
///
/// Each field is written as `label`, a NUL, its length, and its bytes, so two
/// different field sequences never produce the same byte stream.
pub struct Fingerprinter {
  hasher: Sha256,
}

impl Fingerprinter {
  pub fn new() -> Self {
    Self { hasher: Sha256::new() }
  }

  pub fn field(&mut self, label: &str, value: impl AsRef<[u8]>) -> &mut Self {
    let value = value.as_ref();
    self.hasher.update(label.as_bytes());
    self.hasher.update([0u8]);
    self.hasher.update((value.len() as u64).to_le_bytes());
    self.hasher.update(value);
    self
  }

  pub fn finish(self) -> ContentHash {
    ContentHash(hex::encode(self.hasher.finalize()))
  }
}

impl Default for Fingerprinter {
  fn default() -> Self {
    Self::new()
  }
}
