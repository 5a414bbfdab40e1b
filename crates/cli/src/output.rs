//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, size and duration formatting, and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use sketchforge_lib::execute::{Diagnostic, Severity};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// `used bytes (P% of max)`, or just the byte count without a maximum.
pub fn format_usage(used: u64, max: Option<u64>) -> String {
  match max {
    Some(max) if max > 0 => format!("{} bytes ({}% of {})", used, used * 100 / max, max),
    _ => format!("{} bytes", used),
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// Print a toolchain diagnostic in `file:line:col: severity: message` form.
pub fn print_diagnostic(diagnostic: &Diagnostic) {
  let location = match diagnostic.column {
    Some(column) => format!("{}:{}:{}", diagnostic.file.display(), diagnostic.line, column),
    None => format!("{}:{}", diagnostic.file.display(), diagnostic.line),
  };
  let severity = match diagnostic.severity {
    Severity::Error => "error".if_supports_color(Stream::Stderr, |s| s.red()).to_string(),
    Severity::Warning => "warning".if_supports_color(Stream::Stderr, |s| s.yellow()).to_string(),
    Severity::Note => "note".if_supports_color(Stream::Stderr, |s| s.dimmed()).to_string(),
  };
  eprintln!("{}: {}: {}", location, severity, diagnostic.message);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
