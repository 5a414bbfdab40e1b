//! Running rendered recipe commands.
//!
//! Command lines are split into argv with quote handling and the tool is
//! spawned directly; no shell is involved. Tools run in their own process
//! group so cancellation can take down any children they start.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use super::types::CancelToken;

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("cannot parse command line '{command}': {message}")]
  Parse { command: String, message: String },

  #[error("empty command line")]
  Empty,

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed waiting for tool: {0}")]
  Io(#[from] std::io::Error),

  #[error("cancelled")]
  Cancelled,
}

/// Exit status and captured output of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  pub success: bool,
  pub exit_code: Option<i32>,
  /// Stdout followed by stderr.
  pub output: String,
}

/// Split a command line into arguments.
///
/// Whitespace separates arguments. Single and double quotes group; inside
/// double quotes `\"` is a literal quote. Other backslashes are kept as is
/// so Windows paths survive.
pub fn split_command(line: &str) -> Result<Vec<String>, CommandError> {
  let mut args = Vec::new();
  let mut current = String::new();
  let mut in_arg = false;
  let mut quote: Option<char> = None;
  let mut chars = line.chars().peekable();

  while let Some(c) = chars.next() {
    match (quote, c) {
      (Some('"'), '\\') if chars.peek() == Some(&'"') => {
        current.push('"');
        chars.next();
      }
      (Some(q), c) if c == q => quote = None,
      (Some(_), c) => current.push(c),
      (None, '"' | '\'') => {
        quote = Some(c);
        in_arg = true;
      }
      (None, c) if c.is_whitespace() => {
        if in_arg {
          args.push(std::mem::take(&mut current));
          in_arg = false;
        }
      }
      (None, c) => {
        current.push(c);
        in_arg = true;
      }
    }
  }

  if let Some(q) = quote {
    return Err(CommandError::Parse {
      command: line.to_string(),
      message: format!("unterminated {q} quote"),
    });
  }
  if in_arg {
    args.push(current);
  }
  Ok(args)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
  let Some(mut reader) = reader else {
    return String::new();
  };
  let mut buf = Vec::new();
  if let Err(err) = reader.read_to_end(&mut buf).await {
    trace!(error = %err, read = buf.len(), "tool output stream ended early");
  }
  String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn kill_tree(child: &Child) {
  use rustix::process::{Pid, Signal, kill_process_group};

  if let Some(id) = child.id()
    && let Some(pid) = Pid::from_raw(id as i32)
    && let Err(err) = kill_process_group(pid, Signal::KILL)
  {
    trace!(pid = id, error = %err, "process group already gone");
  }
}

#[cfg(not(unix))]
fn kill_tree(_child: &Child) {}

/// Run one command line to completion or until `cancel` fires.
pub async fn run_command(line: &str, working_dir: &Path, cancel: &CancelToken) -> Result<CommandOutput, CommandError> {
  let argv = split_command(line)?;
  let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
  if cancel.is_cancelled() {
    return Err(CommandError::Cancelled);
  }

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(working_dir)
    // Diagnostics are parsed, keep them untranslated
    .env("LC_ALL", "C")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  debug!(program = %program, args = args.len(), "spawning tool");

  let mut child = command.spawn().map_err(|source| CommandError::Spawn {
    program: program.clone(),
    source,
  })?;
  let stdout = tokio::spawn(read_all(child.stdout.take()));
  let stderr = tokio::spawn(read_all(child.stderr.take()));

  let status = tokio::select! {
    status = child.wait() => status?,
    () = cancel.cancelled() => {
      kill_tree(&child);
      if let Err(err) = child.kill().await {
        trace!(program = %program, error = %err, "tool already exited");
      }
      debug!(program = %program, "tool killed on cancel");
      return Err(CommandError::Cancelled);
    }
  };

  let mut output = stdout.await.unwrap_or_default();
  output.push_str(&stderr.await.unwrap_or_default());

  Ok(CommandOutput {
    success: status.success(),
    exit_code: status.code(),
    output,
  })
}
