//! Program and data size from the size recipe's output.

use regex::Regex;
use tracing::warn;

use crate::plan::SizePatterns;

use super::types::SizeReport;

/// Sum of the first capture group over every match, or `None` when nothing matched.
fn sum_matches(pattern: &str, output: &str) -> Option<u64> {
  let re = match Regex::new(&format!("(?m){pattern}")) {
    Ok(re) => re,
    Err(err) => {
      warn!(pattern, error = %err, "invalid size pattern");
      return None;
    }
  };
  let mut total = None;
  for caps in re.captures_iter(output) {
    if let Some(value) = caps.get(1).and_then(|m| m.as_str().trim().parse::<u64>().ok()) {
      total = Some(total.unwrap_or(0) + value);
    }
  }
  total
}

/// Read the size report out of `output`. `None` without a program pattern.
pub fn size_report(output: &str, patterns: &SizePatterns) -> Option<SizeReport> {
  let program = patterns.program.as_deref()?;
  Some(SizeReport {
    program_bytes: sum_matches(program, output).unwrap_or(0),
    program_max: patterns.program_max,
    data_bytes: patterns.data.as_deref().map(|p| sum_matches(p, output).unwrap_or(0)),
    data_max: patterns.data_max,
  })
}
