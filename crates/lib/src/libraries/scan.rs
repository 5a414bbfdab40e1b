//! Textual `#include` discovery.
//!
//! The scanner does not preprocess: it strips comments and collects every
//! `#include <x>` / `#include "x"` directive, including ones inside
//! conditional blocks. Over-reporting is harmless because unresolved names are
//! never fatal on their own.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::catalog::library::{LibraryCandidate, LibraryLayout};

/// Extensions compiled as translation units.
pub const SOURCE_EXTENSIONS: [&str; 5] = ["c", "cpp", "cc", "cxx", "S"];

static INCLUDE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*[<"]([^>"\n]+)[>"]"#).expect("valid include regex"));

/// Remove `/* */` and `//` comments, keeping line structure and string literals.
fn strip_comments(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();
  let mut in_string = false;

  while let Some(c) = chars.next() {
    if in_string {
      out.push(c);
      match c {
        '\\' => {
          if let Some(next) = chars.next() {
            out.push(next);
          }
        }
        '"' | '\n' => in_string = false,
        _ => {}
      }
      continue;
    }
    match c {
      '/' if chars.peek() == Some(&'/') => {
        for next in chars.by_ref() {
          if next == '\n' {
            out.push('\n');
            break;
          }
        }
      }
      '/' if chars.peek() == Some(&'*') => {
        chars.next();
        let mut prev = '\0';
        for next in chars.by_ref() {
          if next == '\n' {
            out.push('\n');
          }
          if prev == '*' && next == '/' {
            break;
          }
          prev = next;
        }
        out.push(' ');
      }
      '"' => {
        in_string = true;
        out.push(c);
      }
      _ => out.push(c),
    }
  }
  out
}

/// Include names in `text`, in order of appearance, without duplicates.
pub fn scan_includes(text: &str) -> Vec<String> {
  let stripped = strip_comments(text);
  let mut includes: Vec<String> = Vec::new();
  for cap in INCLUDE_RE.captures_iter(&stripped) {
    let name = cap[1].trim().to_string();
    if !name.is_empty() && !includes.contains(&name) {
      includes.push(name);
    }
  }
  includes
}

/// Include names in a file. Unreadable files yield nothing.
pub fn scan_file(path: &Path) -> Vec<String> {
  match fs::read(path) {
    Ok(bytes) => scan_includes(&String::from_utf8_lossy(&bytes)),
    Err(_) => Vec::new(),
  }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| extensions.contains(&e))
}

pub fn is_source(path: &Path) -> bool {
  has_extension(path, &SOURCE_EXTENSIONS)
}

fn walk_sorted(dir: &Path, recursive: bool) -> Vec<PathBuf> {
  if !dir.is_dir() {
    return Vec::new();
  }
  let walker = WalkDir::new(dir).sort_by_file_name().max_depth(if recursive { usize::MAX } else { 1 });
  walker
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .map(|e| e.into_path())
    .collect()
}

/// Files of a library, sorted, for both scanning and compiling.
///
/// Recursive layouts contribute everything under `src/`; flat layouts
/// contribute the root folder and `utility/`.
pub fn library_files(lib: &LibraryCandidate) -> Vec<PathBuf> {
  match lib.layout {
    LibraryLayout::Recursive => walk_sorted(&lib.root_path.join("src"), true),
    LibraryLayout::Flat => {
      let mut files = walk_sorted(&lib.root_path, false);
      files.extend(walk_sorted(&lib.root_path.join("utility"), true));
      files
    }
  }
}

/// Translation units of a library.
pub fn library_sources(lib: &LibraryCandidate) -> Vec<PathBuf> {
  library_files(lib).into_iter().filter(|p| is_source(p)).collect()
}

/// Source files of a core or variant folder, sorted.
pub fn folder_sources(dir: &Path) -> Vec<PathBuf> {
  walk_sorted(dir, true).into_iter().filter(|p| is_source(p)).collect()
}
