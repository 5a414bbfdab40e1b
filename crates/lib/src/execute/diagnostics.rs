//! Compiler output parsing: diagnostics and dependency files.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"(?m)^(?P<file>(?:[A-Za-z]:)?[^:\r\n]+):(?P<line>\d+):(?:(?P<column>\d+):)?[ \t]*(?P<severity>fatal error|error|warning|note):[ \t]*(?P<message>[^\r\n]*)",
  )
  .expect("diagnostic regex is valid")
});

static MISSING_HEADER_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(?P<header>\S+): No such file or directory").expect("missing header regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Error,
  Warning,
  Note,
}

/// One `file:line[:col]: severity: message` line of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
  pub step_id: String,
  pub file: PathBuf,
  pub line: u32,
  pub column: Option<u32>,
  pub severity: Severity,
  pub message: String,
}

impl Diagnostic {
  /// The header named by a "No such file or directory" error.
  pub fn missing_header(&self) -> Option<&str> {
    if self.severity != Severity::Error {
      return None;
    }
    MISSING_HEADER_RE
      .captures(&self.message)
      .and_then(|c| c.name("header"))
      .map(|m| m.as_str())
  }
}

/// Every diagnostic in `output`, in order.
pub fn parse_diagnostics(step_id: &str, output: &str) -> Vec<Diagnostic> {
  DIAGNOSTIC_RE
    .captures_iter(output)
    .filter_map(|caps| {
      let severity = match &caps["severity"] {
        "warning" => Severity::Warning,
        "note" => Severity::Note,
        _ => Severity::Error,
      };
      Some(Diagnostic {
        step_id: step_id.to_string(),
        file: PathBuf::from(caps["file"].trim()),
        line: caps["line"].parse().ok()?,
        column: caps.name("column").and_then(|c| c.as_str().parse().ok()),
        severity,
        message: caps["message"].trim().to_string(),
      })
    })
    .collect()
}

/// Prerequisites of the first rule in a make-style `.d` file.
///
/// Handles line continuations and `\ `-escaped spaces. Later phony rules
/// (`-MP`) are ignored.
pub fn parse_depfile(text: &str) -> Vec<PathBuf> {
  let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
  let Some(rule) = joined.lines().find(|l| !l.trim().is_empty()) else {
    return Vec::new();
  };
  let Some(colon) = rule.find(": ").or_else(|| rule.strip_suffix(':').map(|r| r.len())) else {
    return Vec::new();
  };
  let prerequisites = &rule[colon + 1..];

  let mut paths = Vec::new();
  let mut current = String::new();
  let mut chars = prerequisites.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '\\' if chars.peek() == Some(&' ') => {
        current.push(' ');
        chars.next();
      }
      c if c.is_whitespace() => {
        if !current.is_empty() {
          paths.push(PathBuf::from(std::mem::take(&mut current)));
        }
      }
      c => current.push(c),
    }
  }
  if !current.is_empty() {
    paths.push(PathBuf::from(current));
  }
  paths
}
