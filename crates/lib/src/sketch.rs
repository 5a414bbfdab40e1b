//! Sketch discovery and preparation.
//!
//! A sketch is a folder holding `<Folder>.ino` plus optional extra `.ino`
//! files and C/C++ sources. The `.ino` files are concatenated into a single
//! translation unit under the build path; other sources are mirrored next to
//! it so relative includes keep working.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Extensions of `.ino`-style main files.
pub const MAIN_EXTENSIONS: [&str; 2] = ["ino", "pde"];

/// Extensions of additional files copied into the build.
pub const ADDITIONAL_EXTENSIONS: [&str; 10] = ["c", "cpp", "cc", "cxx", "S", "h", "hh", "hpp", "ipp", "tpp"];

#[derive(Debug, Error)]
pub enum SketchError {
  #[error("sketch not found: {0}")]
  NotFound(PathBuf),

  #[error("invalid sketch {dir}: main file {expected} is missing")]
  MissingMain { dir: PathBuf, expected: String },

  #[error("failed to read sketch file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A file of the sketch, relative to the sketch folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchFile {
  pub path: PathBuf,
  pub relative: PathBuf,
}

/// A loaded sketch folder.
#[derive(Debug, Clone)]
pub struct Sketch {
  pub name: String,
  pub dir: PathBuf,
  pub main_file: PathBuf,
  /// Secondary `.ino`/`.pde` files, sorted.
  pub other_main_files: Vec<PathBuf>,
  /// Sources and headers at the top level and under `src/`, sorted.
  pub additional_files: Vec<SketchFile>,
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| extensions.contains(&e))
}

impl Sketch {
  /// Load a sketch from its folder or its main file.
  pub fn load(path: &Path) -> Result<Self, SketchError> {
    let path = dunce::canonicalize(path).map_err(|_| SketchError::NotFound(path.to_path_buf()))?;
    let dir = if path.is_file() {
      path.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
      path
    };
    let name = dir
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_default();

    let main_file = MAIN_EXTENSIONS
      .iter()
      .map(|ext| dir.join(format!("{name}.{ext}")))
      .find(|p| p.is_file())
      .ok_or_else(|| SketchError::MissingMain {
        dir: dir.clone(),
        expected: format!("{name}.ino"),
      })?;

    let read_err = |source| SketchError::Read {
      path: dir.clone(),
      source,
    };
    let mut other_main_files = Vec::new();
    let mut additional_files = Vec::new();
    for entry in fs::read_dir(&dir).map_err(read_err)? {
      let entry_path = entry.map_err(read_err)?.path();
      if !entry_path.is_file() || entry_path == main_file {
        continue;
      }
      if has_extension(&entry_path, &MAIN_EXTENSIONS) {
        other_main_files.push(entry_path);
      } else if has_extension(&entry_path, &ADDITIONAL_EXTENSIONS) {
        additional_files.push(SketchFile {
          relative: entry_path.strip_prefix(&dir).unwrap_or(&entry_path).to_path_buf(),
          path: entry_path,
        });
      }
    }

    let src = dir.join("src");
    if src.is_dir() {
      for entry in WalkDir::new(&src).sort_by_file_name() {
        let entry = entry.map_err(|e| read_err(std::io::Error::other(e)))?;
        if entry.file_type().is_file() && has_extension(entry.path(), &ADDITIONAL_EXTENSIONS) {
          additional_files.push(SketchFile {
            relative: entry.path().strip_prefix(&dir).unwrap_or(entry.path()).to_path_buf(),
            path: entry.path().to_path_buf(),
          });
        }
      }
    }

    other_main_files.sort();
    additional_files.sort_by(|a, b| a.relative.cmp(&b.relative));

    debug!(
      sketch = %name,
      ino = other_main_files.len() + 1,
      additional = additional_files.len(),
      "loaded sketch"
    );

    Ok(Self {
      name,
      dir,
      main_file,
      other_main_files,
      additional_files,
    })
  }

  /// Sketch-local library folder.
  pub fn libraries_dir(&self) -> PathBuf {
    self.dir.join("libraries")
  }

  /// Every file the include scanner should read, main file first.
  pub fn scan_files(&self) -> Vec<PathBuf> {
    std::iter::once(self.main_file.clone())
      .chain(self.other_main_files.iter().cloned())
      .chain(self.additional_files.iter().map(|f| f.path.clone()))
      .collect()
  }

  /// Whether `include` names a file of the sketch itself.
  pub fn provides_header(&self, include: &str) -> bool {
    self
      .additional_files
      .iter()
      .any(|f| f.relative == Path::new(include) || f.relative == Path::new("src").join(include))
  }

  /// All `.ino` files concatenated, with `#line` markers back to the originals.
  pub fn merged_source(&self) -> Result<String, SketchError> {
    let mut merged = String::from("#include <Arduino.h>\n");
    for file in std::iter::once(&self.main_file).chain(self.other_main_files.iter()) {
      let text = fs::read_to_string(file).map_err(|source| SketchError::Read {
        path: file.clone(),
        source,
      })?;
      let escaped = file.to_string_lossy().replace('\\', "\\\\");
      merged.push_str(&format!("#line 1 \"{escaped}\"\n"));
      merged.push_str(&text);
      if !text.ends_with('\n') {
        merged.push('\n');
      }
    }
    Ok(merged)
  }

  /// Directory under the build path holding the prepared sketch.
  pub fn build_dir(build_path: &Path) -> PathBuf {
    build_path.join("sketch")
  }

  /// The files [`prepare`](Self::prepare) writes, without writing them.
  ///
  /// The merged translation unit comes first.
  pub fn build_files(&self, build_path: &Path) -> Vec<SketchFile> {
    let out_dir = Self::build_dir(build_path);
    let merged_name = PathBuf::from(format!("{}.ino.cpp", self.name));
    let mut files = vec![SketchFile {
      path: out_dir.join(&merged_name),
      relative: merged_name,
    }];
    files.extend(self.additional_files.iter().map(|file| SketchFile {
      path: out_dir.join(&file.relative),
      relative: file.relative.clone(),
    }));
    files
  }

  /// Write the merged translation unit and mirror additional files.
  ///
  /// Files whose content is unchanged are not rewritten. Returns the files to
  /// compile or include, relative to `<build>/sketch`.
  pub fn prepare(&self, build_path: &Path) -> Result<Vec<SketchFile>, SketchError> {
    let prepared = self.build_files(build_path);
    write_if_changed(&prepared[0].path, self.merged_source()?.as_bytes())?;

    for (file, target) in self.additional_files.iter().zip(&prepared[1..]) {
      let content = fs::read(&file.path).map_err(|source| SketchError::Read {
        path: file.path.clone(),
        source,
      })?;
      write_if_changed(&target.path, &content)?;
    }

    Ok(prepared)
  }
}

fn write_if_changed(path: &Path, content: &[u8]) -> Result<(), SketchError> {
  if fs::read(path).is_ok_and(|existing| existing == content) {
    return Ok(());
  }
  let write_err = |source| SketchError::Write {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  fs::write(path, content).map_err(write_err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sketch_dir(temp: &TempDir, name: &str) -> PathBuf {
    let dir = temp.path().join(name);
    fs::create_dir_all(dir.join("src/util")).unwrap();
    fs::write(dir.join(format!("{name}.ino")), "void setup() {}\nvoid loop() {}").unwrap();
    fs::write(dir.join("b_tab.ino"), "int b;\n").unwrap();
    fs::write(dir.join("a_tab.ino"), "int a;\n").unwrap();
    fs::write(dir.join("helper.h"), "#pragma once\n").unwrap();
    fs::write(dir.join("helper.cpp"), "#include \"helper.h\"\n").unwrap();
    fs::write(dir.join("README.md"), "docs").unwrap();
    fs::write(dir.join("src/util/math.c"), "int m;\n").unwrap();
    dir
  }

  #[test]
  fn load_from_folder_or_main_file() {
    let temp = TempDir::new().unwrap();
    let dir = sketch_dir(&temp, "Blink");
    let from_dir = Sketch::load(&dir).unwrap();
    let from_file = Sketch::load(&dir.join("Blink.ino")).unwrap();
    assert_eq!(from_dir.main_file, from_file.main_file);
    assert_eq!(from_dir.name, "Blink");
  }

  #[test]
  fn files_are_sorted_and_filtered() {
    let temp = TempDir::new().unwrap();
    let dir = sketch_dir(&temp, "Blink");
    let sketch = Sketch::load(&dir).unwrap();
    let other: Vec<_> = sketch
      .other_main_files
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
      .collect();
    assert_eq!(other, vec!["a_tab.ino", "b_tab.ino"]);
    let rel: Vec<_> = sketch.additional_files.iter().map(|f| f.relative.clone()).collect();
    assert_eq!(
      rel,
      vec![
        PathBuf::from("helper.cpp"),
        PathBuf::from("helper.h"),
        PathBuf::from("src/util/math.c")
      ]
    );
    assert!(sketch.provides_header("helper.h"));
    assert!(sketch.provides_header("util/math.c"));
    assert!(!sketch.provides_header("Servo.h"));
  }

  #[test]
  fn missing_main_file_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("Empty");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("other.ino"), "").unwrap();
    assert!(matches!(Sketch::load(&dir), Err(SketchError::MissingMain { .. })));
    assert!(matches!(
      Sketch::load(&temp.path().join("Nope")),
      Err(SketchError::NotFound(_))
    ));
  }

  #[test]
  fn merged_source_has_line_markers() {
    let temp = TempDir::new().unwrap();
    let dir = sketch_dir(&temp, "Blink");
    let merged = Sketch::load(&dir).unwrap().merged_source().unwrap();
    assert!(merged.starts_with("#include <Arduino.h>\n#line 1 \""));
    let main_pos = merged.find("void setup()").unwrap();
    let a_pos = merged.find("int a;").unwrap();
    let b_pos = merged.find("int b;").unwrap();
    assert!(main_pos < a_pos && a_pos < b_pos);
    assert_eq!(merged.matches("#line 1").count(), 3);
  }

  #[test]
  fn prepare_skips_unchanged_writes() {
    let temp = TempDir::new().unwrap();
    let dir = sketch_dir(&temp, "Blink");
    let build = temp.path().join("build");
    let sketch = Sketch::load(&dir).unwrap();

    let prepared = sketch.prepare(&build).unwrap();
    assert_eq!(prepared[0].relative, PathBuf::from("Blink.ino.cpp"));
    assert!(build.join("sketch/src/util/math.c").is_file());

    let merged = build.join("sketch/Blink.ino.cpp");
    let before = fs::metadata(&merged).unwrap().modified().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    sketch.prepare(&build).unwrap();
    assert_eq!(fs::metadata(&merged).unwrap().modified().unwrap(), before);
  }
}
