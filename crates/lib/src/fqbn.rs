//! Fully qualified board names.
//!
//! An FQBN selects a vendor, an architecture, a board, and an ordered list of
//! menu options: `vendor:arch:board[:key=value,key=value]`.
//!
//! Parsing normalizes the three leading tokens to lowercase, so `Display` is the
//! canonical form and round-trips through [`Fqbn::parse`].
//!
//! # Example
//!
//! ```
//! use sketchforge_lib::fqbn::Fqbn;
//!
//! let fqbn = Fqbn::parse("arduino:avr:nano:cpu=atmega328old").unwrap();
//! assert_eq!(fqbn.board_id(), "nano");
//! assert_eq!(fqbn.option("cpu"), Some("atmega328old"));
//! assert_eq!(fqbn.to_string(), "arduino:avr:nano:cpu=atmega328old");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing an FQBN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FqbnError {
  #[error("invalid FQBN '{fqbn}': expected vendor:architecture:board[:options], got {segments} segment(s)")]
  SegmentCount { fqbn: String, segments: usize },

  #[error("invalid FQBN '{fqbn}': {part} is empty")]
  EmptySegment { fqbn: String, part: &'static str },

  #[error("invalid FQBN '{fqbn}': {part} '{value}' contains invalid characters")]
  InvalidToken {
    fqbn: String,
    part: &'static str,
    value: String,
  },

  #[error("invalid FQBN '{fqbn}': option '{option}' is not of the form key=value")]
  MalformedOption { fqbn: String, option: String },

  #[error("invalid FQBN '{fqbn}': option '{key}' is given more than once")]
  DuplicateOption { fqbn: String, key: String },
}

/// A parsed, immutable board identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fqbn {
  vendor: String,
  architecture: String,
  board_id: String,
  options: Vec<(String, String)>,
}

fn is_token_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn check_token(fqbn: &str, part: &'static str, value: &str) -> Result<String, FqbnError> {
  if value.is_empty() {
    return Err(FqbnError::EmptySegment {
      fqbn: fqbn.to_string(),
      part,
    });
  }
  if !value.chars().all(is_token_char) {
    return Err(FqbnError::InvalidToken {
      fqbn: fqbn.to_string(),
      part,
      value: value.to_string(),
    });
  }
  Ok(value.to_ascii_lowercase())
}

impl Fqbn {
  /// Parse an FQBN string.
  ///
  /// Fails when fewer than three (or more than four) colon-separated segments
  /// are present, when any segment is empty, when a token has characters
  /// outside `[A-Za-z0-9_.-]`, or when an option key repeats.
  pub fn parse(text: &str) -> Result<Self, FqbnError> {
    let segments: Vec<&str> = text.split(':').collect();
    if segments.len() < 3 || segments.len() > 4 {
      return Err(FqbnError::SegmentCount {
        fqbn: text.to_string(),
        segments: segments.len(),
      });
    }

    let vendor = check_token(text, "vendor", segments[0])?;
    let architecture = check_token(text, "architecture", segments[1])?;
    let board_id = check_token(text, "board", segments[2])?;

    let mut options: Vec<(String, String)> = Vec::new();
    if let Some(raw) = segments.get(3) {
      if raw.is_empty() {
        return Err(FqbnError::EmptySegment {
          fqbn: text.to_string(),
          part: "options",
        });
      }
      for option in raw.split(',') {
        let (key, value) = option.split_once('=').ok_or_else(|| FqbnError::MalformedOption {
          fqbn: text.to_string(),
          option: option.to_string(),
        })?;
        if key.is_empty() || !key.chars().all(is_token_char) {
          return Err(FqbnError::MalformedOption {
            fqbn: text.to_string(),
            option: option.to_string(),
          });
        }
        if !value.chars().all(|c| is_token_char(c) || c == '=') {
          return Err(FqbnError::InvalidToken {
            fqbn: text.to_string(),
            part: "option value",
            value: value.to_string(),
          });
        }
        if options.iter().any(|(k, _)| k == key) {
          return Err(FqbnError::DuplicateOption {
            fqbn: text.to_string(),
            key: key.to_string(),
          });
        }
        options.push((key.to_string(), value.to_string()));
      }
    }

    Ok(Self {
      vendor,
      architecture,
      board_id,
      options,
    })
  }

  pub fn vendor(&self) -> &str {
    &self.vendor
  }

  pub fn architecture(&self) -> &str {
    &self.architecture
  }

  pub fn board_id(&self) -> &str {
    &self.board_id
  }

  /// Menu options in canonical order.
  pub fn options(&self) -> &[(String, String)] {
    &self.options
  }

  /// The selected value for a menu, if any.
  pub fn option(&self, key: &str) -> Option<&str> {
    self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
  }

  /// The `vendor:arch:board` prefix without options.
  pub fn base(&self) -> String {
    format!("{}:{}:{}", self.vendor, self.architecture, self.board_id)
  }

  /// Return a copy with `key` set to `value`.
  ///
  /// An existing option is overwritten; a new one is inserted. Options are then
  /// ordered by `menu_order` (the board's menu declaration order); keys missing
  /// from `menu_order` keep their relative order after the declared ones.
  pub fn with_option(&self, key: &str, value: &str, menu_order: &[String]) -> Fqbn {
    let mut options = self.options.clone();
    match options.iter_mut().find(|(k, _)| k == key) {
      Some(slot) => slot.1 = value.to_string(),
      None => options.push((key.to_string(), value.to_string())),
    }

    // stable sort keeps undeclared keys in insertion order
    options.sort_by_key(|(k, _)| menu_order.iter().position(|m| m == k).unwrap_or(usize::MAX));

    Fqbn {
      vendor: self.vendor.clone(),
      architecture: self.architecture.clone(),
      board_id: self.board_id.clone(),
      options,
    }
  }

  /// Directory name for exported binaries: the canonical form with `:` as `.`.
  pub fn build_dir_name(&self) -> String {
    self.to_string().replace(':', ".")
  }
}

impl fmt::Display for Fqbn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.base())?;
    if !self.options.is_empty() {
      let joined: Vec<String> = self.options.iter().map(|(k, v)| format!("{k}={v}")).collect();
      write!(f, ":{}", joined.join(","))?;
    }
    Ok(())
  }
}

impl FromStr for Fqbn {
  type Err = FqbnError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Fqbn::parse(s)
  }
}

impl Serialize for Fqbn {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Fqbn {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let text = String::deserialize(deserializer)?;
    Fqbn::parse(&text).map_err(serde::de::Error::custom)
  }
}
