//! Test utilities for sketchforge-lib.
//!
//! Helpers that render shell snippets as recipe command lines, so tests can
//! stand in for a toolchain.

/// A command line running `script` with `/bin/sh`.
pub fn sh(script: &str) -> String {
  format!("/bin/sh -c \"{}\"", script.replace('"', "\\\""))
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::execute::cmd::split_command;

  #[test]
  fn sh_survives_command_splitting() {
    let line = sh(r#"echo "a b" 'c'"#);
    assert_eq!(split_command(&line).unwrap(), vec!["/bin/sh", "-c", r#"echo "a b" 'c'"#]);
  }
}
