//! Property tables and the `key=value` file format used by platforms.
//!
//! Platform, board, and programmer definitions are flat maps from dotted keys
//! to string values. This module parses those files, merges tables in layers,
//! and carves out sub-trees (`uno.*`, `menu.cpu.*`).

pub mod expand;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::os::Os;

/// Errors that can occur while reading property files.
#[derive(Debug, Error)]
pub enum PropertiesError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{path}:{line}: invalid line '{content}', expected key=value")]
  InvalidLine { path: PathBuf, line: usize, content: String },
}

/// A flat, ordered-by-key map of property values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTable(BTreeMap<String, String>);

impl PropertyTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(|s| s.as_str())
  }

  /// The value of `key`, or `""` when absent.
  pub fn get_or_empty(&self, key: &str) -> &str {
    self.get(key).unwrap_or("")
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn remove(&mut self, key: &str) -> Option<String> {
    self.0.remove(key)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(|k| k.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Overlay `other` onto this table; keys of `other` win.
  pub fn merge(&mut self, other: &PropertyTable) {
    for (k, v) in other.iter() {
      self.insert(k, v);
    }
  }

  /// All entries under `prefix.`, with the prefix stripped.
  pub fn sub_tree(&self, prefix: &str) -> PropertyTable {
    let dotted = format!("{prefix}.");
    PropertyTable(
      self
        .0
        .range(dotted.clone()..)
        .take_while(|(k, _)| k.starts_with(&dotted))
        .map(|(k, v)| (k[dotted.len()..].to_string(), v.clone()))
        .collect(),
    )
  }

  /// The distinct first components of all keys, sorted.
  pub fn first_level_keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self
      .0
      .keys()
      .map(|k| k.split('.').next().unwrap_or(k).to_string())
      .collect();
    keys.dedup();
    keys
  }

  /// Resolve OS-specific keys (`key.linux`, `key.windows`, ...).
  ///
  /// The variant matching `os` replaces the base key; all suffixed variants are
  /// removed from the table.
  pub fn apply_os_overrides(&mut self, os: Os) {
    let mut overrides = Vec::new();
    let mut suffixed = Vec::new();
    for key in self.0.keys() {
      let Some((base, suffix)) = key.rsplit_once('.') else {
        continue;
      };
      if Os::PROPERTY_SUFFIXES.contains(&suffix) {
        suffixed.push(key.clone());
        if suffix == os.property_suffix() {
          overrides.push((base.to_string(), key.clone()));
        }
      }
    }
    for (base, key) in overrides {
      if let Some(value) = self.0.get(&key).cloned() {
        self.0.insert(base, value);
      }
    }
    for key in suffixed {
      self.0.remove(&key);
    }
  }

  /// Parse the `key=value` format into a table.
  pub fn parse(text: &str, origin: &Path) -> Result<Self, PropertiesError> {
    Ok(PropertyTable(parse_lines(text, origin)?.into_iter().collect()))
  }

  /// Load a property file, resolving OS-specific keys for the running OS.
  pub fn load(path: &Path) -> Result<Self, PropertiesError> {
    let text = read_file(path)?;
    let mut table = Self::parse(&text, path)?;
    table.apply_os_overrides(Os::current());
    Ok(table)
  }

  /// Load a property file if it exists, returning an empty table otherwise.
  pub fn load_optional(path: &Path) -> Result<Self, PropertiesError> {
    if path.is_file() { Self::load(path) } else { Ok(Self::new()) }
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyTable {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    PropertyTable(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

pub(crate) fn read_file(path: &Path) -> Result<String, PropertiesError> {
  let bytes = fs::read(path).map_err(|source| PropertiesError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let text = String::from_utf8_lossy(&bytes);
  Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
}

/// Parse the `key=value` format keeping file order.
///
/// Blank lines and lines starting with `#` are skipped. Keys and values are
/// trimmed. Order matters to callers that derive menu declaration order.
pub fn parse_lines(text: &str, origin: &Path) -> Result<Vec<(String, String)>, PropertiesError> {
  let mut pairs = Vec::new();
  for (idx, raw) in text.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let Some((key, value)) = line.split_once('=') else {
      return Err(PropertiesError::InvalidLine {
        path: origin.to_path_buf(),
        line: idx + 1,
        content: line.to_string(),
      });
    };
    pairs.push((key.trim().to_string(), value.trim().to_string()));
  }
  Ok(pairs)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> PathBuf {
    PathBuf::from("platform.txt")
  }

  #[test]
  fn parse_skips_comments_and_blanks() {
    let text = "# header\n\nname=Test AVR\n  version = 1.8.6  \n";
    let table = PropertyTable::parse(text, &origin()).unwrap();
    assert_eq!(table.get("name"), Some("Test AVR"));
    assert_eq!(table.get("version"), Some("1.8.6"));
    assert_eq!(table.len(), 2);
  }

  #[test]
  fn parse_keeps_equals_in_value() {
    let table = PropertyTable::parse("build.extra_flags=-DFOO=1 -DBAR=2\n", &origin()).unwrap();
    assert_eq!(table.get("build.extra_flags"), Some("-DFOO=1 -DBAR=2"));
  }

  #[test]
  fn parse_rejects_line_without_equals() {
    let err = PropertyTable::parse("ok=1\nnot a property\n", &origin()).unwrap_err();
    match err {
      PropertiesError::InvalidLine { line, content, .. } => {
        assert_eq!(line, 2);
        assert_eq!(content, "not a property");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn parse_lines_preserves_file_order() {
    let pairs = parse_lines("menu.cpu=Processor\nmenu.baud=Upload Speed\n", &origin()).unwrap();
    let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["menu.cpu", "menu.baud"]);
  }

  #[test]
  fn later_layer_wins_on_merge() {
    let mut base: PropertyTable = [("a", "1"), ("b", "2")].into_iter().collect();
    let overlay: PropertyTable = [("b", "20"), ("c", "30")].into_iter().collect();
    base.merge(&overlay);
    assert_eq!(base.get("a"), Some("1"));
    assert_eq!(base.get("b"), Some("20"));
    assert_eq!(base.get("c"), Some("30"));
  }

  #[test]
  fn sub_tree_strips_prefix() {
    let table: PropertyTable = [
      ("uno.name", "Arduino Uno"),
      ("uno.build.mcu", "atmega328p"),
      ("unoR4.name", "other"),
      ("menu.cpu", "Processor"),
    ]
    .into_iter()
    .collect();
    let uno = table.sub_tree("uno");
    assert_eq!(uno.len(), 2);
    assert_eq!(uno.get("build.mcu"), Some("atmega328p"));
  }

  #[test]
  fn first_level_keys_are_unique_and_sorted() {
    let table: PropertyTable = [("nano.name", "n"), ("uno.name", "u"), ("uno.build.mcu", "m"), ("menu.cpu", "c")]
      .into_iter()
      .collect();
    assert_eq!(table.first_level_keys(), vec!["menu", "nano", "uno"]);
  }

  #[test]
  fn os_override_replaces_base_key() {
    let mut table: PropertyTable = [
      ("tools.cmd", "generic"),
      ("tools.cmd.linux", "linux-cmd"),
      ("tools.cmd.windows", "win-cmd"),
      ("tools.cmd.macosx", "mac-cmd"),
    ]
    .into_iter()
    .collect();
    table.apply_os_overrides(Os::Windows);
    assert_eq!(table.get("tools.cmd"), Some("win-cmd"));
    assert!(!table.contains_key("tools.cmd.linux"));
    assert!(!table.contains_key("tools.cmd.windows"));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn os_override_without_match_keeps_base() {
    let mut table: PropertyTable = [("tools.cmd", "generic"), ("tools.cmd.windows", "win")]
      .into_iter()
      .collect();
    table.apply_os_overrides(Os::Linux);
    assert_eq!(table.get("tools.cmd"), Some("generic"));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn load_optional_missing_file_is_empty() {
    let temp = tempfile::tempdir().unwrap();
    let table = PropertyTable::load_optional(&temp.path().join("platform.local.txt")).unwrap();
    assert!(table.is_empty());
  }

  #[test]
  fn load_strips_byte_order_mark() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("boards.txt");
    fs::write(&path, "\u{feff}uno.name=Uno\n").unwrap();
    let table = PropertyTable::load(&path).unwrap();
    assert_eq!(table.get("uno.name"), Some("Uno"));
  }
}
