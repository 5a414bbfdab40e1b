//! Placeholder parsing and recursive expansion for property values.
//!
//! A value may reference other keys of the same table with `{key}`. Expansion
//! substitutes referenced values recursively until no references remain.
//!
//! # Reference Syntax
//!
//! - `{build.mcu}` - replaced by the expanded value of `build.mcu`
//! - `{{` / `}}` - a literal `{` / `}`
//!
//! Only brace groups whose content is a valid key (`[A-Za-z0-9_.+-]+`) are
//! references. Anything else (`{ echo; }` in a shell snippet, an unclosed `{`)
//! passes through unchanged.
//!
//! A reference to a key that is not in the table expands to the empty string.
//! A key that (transitively) references itself is an [`ExpandError::Cycle`].
//! Chains of references deeper than [`MAX_DEPTH`] are an [`ExpandError::TooDeep`].
//!
//! # Example
//!
//! ```
//! use sketchforge_lib::properties::PropertyTable;
//! use sketchforge_lib::properties::expand::expand_str;
//!
//! let mut table = PropertyTable::new();
//! table.insert("compiler.path", "/opt/gcc/bin/");
//! table.insert("compiler.cmd", "{compiler.path}avr-gcc");
//!
//! assert_eq!(expand_str(&table, "\"{compiler.cmd}\" -c").unwrap(), "\"/opt/gcc/bin/avr-gcc\" -c");
//! ```

use std::collections::HashMap;

use thiserror::Error;

use super::PropertyTable;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no references)
  Literal(String),

  /// A `{key}` reference to be expanded
  Reference(String),
}

/// Longest chain of nested references followed before giving up.
pub const MAX_DEPTH: usize = 128;

/// Errors that can occur during expansion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
  #[error("property expansion cycle: {}", .cycle.join(" -> "))]
  Cycle { cycle: Vec<String> },

  #[error("property expansion of {key} nests deeper than {max} references")]
  TooDeep { key: String, max: usize },
}

/// Read access to unexpanded property values.
pub trait PropertySource {
  /// The raw value of `key`, before expansion.
  fn raw_value(&self, key: &str) -> Option<&str>;
}

impl PropertySource for PropertyTable {
  fn raw_value(&self, key: &str) -> Option<&str> {
    self.get(key)
  }
}

/// Two tables viewed as one, `top` shadowing `base`.
///
/// Used to expand a recipe against per-step variables without cloning the
/// whole board table for every source file.
pub struct Layered<'a> {
  pub top: &'a PropertyTable,
  pub base: &'a PropertyTable,
}

impl PropertySource for Layered<'_> {
  fn raw_value(&self, key: &str) -> Option<&str> {
    self.top.get(key).or_else(|| self.base.get(key))
  }
}

fn is_key_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+')
}

/// Parse a value into literal and reference segments.
///
/// Parsing never fails: malformed braces are literal text.
pub fn parse(input: &str) -> Vec<Segment> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;

  while let Some(ch) = rest.chars().next() {
    match ch {
      '{' if rest.starts_with("{{") => {
        literal.push('{');
        rest = &rest[2..];
      }
      '}' if rest.starts_with("}}") => {
        literal.push('}');
        rest = &rest[2..];
      }
      '{' => {
        let body = &rest[1..];
        match body.find('}') {
          Some(end) if end > 0 && body[..end].chars().all(is_key_char) => {
            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Reference(body[..end].to_string()));
            rest = &body[end + 1..];
          }
          _ => {
            literal.push('{');
            rest = body;
          }
        }
      }
      _ => {
        literal.push(ch);
        rest = &rest[ch.len_utf8()..];
      }
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  segments
}

/// Recursive expander with memoization and cycle detection.
///
/// The memo only ever holds fully expanded values, so one expander can be
/// reused across many top-level keys of the same source.
pub struct Expander<'a, S: PropertySource + ?Sized> {
  source: &'a S,
  memo: HashMap<String, String>,
  stack: Vec<String>,
}

impl<'a, S: PropertySource + ?Sized> Expander<'a, S> {
  pub fn new(source: &'a S) -> Self {
    Self {
      source,
      memo: HashMap::new(),
      stack: Vec::new(),
    }
  }

  /// Expand the value stored under `key`. Absent keys expand to `""`.
  pub fn expand_key(&mut self, key: &str) -> Result<String, ExpandError> {
    if let Some(done) = self.memo.get(key) {
      return Ok(done.clone());
    }

    if let Some(pos) = self.stack.iter().position(|k| k == key) {
      let mut cycle = self.stack[pos..].to_vec();
      cycle.push(key.to_string());
      return Err(ExpandError::Cycle { cycle });
    }

    let source = self.source;
    let Some(raw) = source.raw_value(key) else {
      return Ok(String::new());
    };

    if self.stack.len() >= MAX_DEPTH {
      let key = self.stack.first().cloned().unwrap_or_else(|| key.to_string());
      return Err(ExpandError::TooDeep { key, max: MAX_DEPTH });
    }

    self.stack.push(key.to_string());
    let result = self.expand_text(raw);
    self.stack.pop();

    let value = result?;
    self.memo.insert(key.to_string(), value.clone());
    Ok(value)
  }

  /// Expand free text that is not itself a key of the source.
  pub fn expand_text(&mut self, text: &str) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(text.len());
    for segment in parse(text) {
      match segment {
        Segment::Literal(s) => out.push_str(&s),
        Segment::Reference(key) => out.push_str(&self.expand_key(&key)?),
      }
    }
    Ok(out)
  }
}

/// Expand a piece of text against `source`.
pub fn expand_str<S: PropertySource + ?Sized>(source: &S, text: &str) -> Result<String, ExpandError> {
  Expander::new(source).expand_text(text)
}

/// Expand every value of `table`, producing a table free of references.
pub fn expand_all(table: &PropertyTable) -> Result<PropertyTable, ExpandError> {
  let mut expander = Expander::new(table);
  let mut expanded = PropertyTable::new();
  for key in table.keys() {
    let value = expander.expand_key(key)?;
    expanded.insert(key, value);
  }
  Ok(expanded)
}
