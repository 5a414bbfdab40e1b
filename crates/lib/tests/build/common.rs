//! Shared helpers for build pipeline tests.
//!
//! `TestEnv` lays out a hardware root with a `vendor:avr` platform whose tools
//! are small shell scripts. Every tool run appends one line to `tools.log`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sketchforge_lib::catalog::Catalog;
use sketchforge_lib::compile::CompileRequest;
use sketchforge_lib::config::Settings;
use tempfile::TempDir;

const FAKE_CC: &str = r#"#!/bin/sh
# fake-cc LOG SOURCE OBJECT
echo "cc $2" >> "$1"
if grep -q '^#include "Foo.h"' "$2"; then
  echo "$2:2:10: fatal error: Foo.h: No such file or directory" >&2
  echo "compilation terminated." >&2
  exit 1
fi
cat "$2" > "$3"
"#;

const FAKE_AR: &str = r#"#!/bin/sh
# fake-ar LOG ARCHIVE OBJECT
echo "ar $3" >> "$1"
cat "$3" >> "$2"
"#;

const FAKE_LD: &str = r#"#!/bin/sh
# fake-ld LOG ELF INPUT...
log="$1"
elf="$2"
shift 2
echo "ld $elf" >> "$log"
: > "$elf"
for input in "$@"; do
  case "$input" in
    -*) ;;
    *) cat "$input" >> "$elf" ;;
  esac
done
"#;

const FAKE_OBJCOPY: &str = r#"#!/bin/sh
# fake-objcopy LOG ELF OUTPUT
echo "objcopy $3" >> "$1"
printf ':0400000001020304F2\n:00000001FF\n' > "$3"
"#;

const FAKE_SIZE: &str = r#"#!/bin/sh
# fake-size LOG ELF
echo "size $2" >> "$1"
bytes=$(wc -c < "$2" | tr -d ' ')
printf '.text %s 0\n.data 4 8388864\n.bss 2 8388868\n' "$bytes"
"#;

const BOARDS_TXT: &str = "\
menu.speed=Speed

uno.name=Test Uno
uno.build.mcu=atmega328p
uno.build.core=arduino
uno.build.variant=standard
uno.upload.maximum_size=32256
uno.upload.maximum_data_size=2048

mega.name=Test Mega
mega.build.mcu=atmega2560
mega.build.core=arduino
mega.build.variant=standard
mega.bootloader.file=optiboot.hex
mega.menu.speed.16=16 MHz
mega.menu.speed.16.build.f_cpu=16000000L
mega.menu.speed.8=8 MHz
mega.menu.speed.8.build.f_cpu=8000000L
";

/// Bootloader image at 0x7E00.
pub const BOOTLOADER_HEX: &str = ":027E000011224D\n:00000001FF\n";

fn platform_txt(log: &Path) -> String {
  let tool = |name: &str| format!("\"{{fake.path}}/{name}\" \"{{fake.log}}\"");
  let elf = "\"{build.path}/{build.project_name}.elf\"";
  [
    "name=Test AVR".to_string(),
    "version=1.0.0".to_string(),
    "fake.path={runtime.platform.path}/tools".to_string(),
    format!("fake.log={}", log.display()),
    format!("recipe.c.o.pattern={} \"{{source_file}}\" \"{{object_file}}\"", tool("fake-cc")),
    format!("recipe.cpp.o.pattern={} \"{{source_file}}\" \"{{object_file}}\"", tool("fake-cc")),
    format!("recipe.S.o.pattern={} \"{{source_file}}\" \"{{object_file}}\"", tool("fake-cc")),
    format!("recipe.ar.pattern={} \"{{archive_file_path}}\" \"{{object_file}}\"", tool("fake-ar")),
    format!(
      "recipe.c.combine.pattern={} {elf} {{object_files}} \"{{build.path}}/core/{{archive_file}}\" {{compiler.libraries.ldflags}}",
      tool("fake-ld")
    ),
    format!(
      "recipe.objcopy.eep.pattern={} {elf} \"{{build.path}}/{{build.project_name}}.eep\"",
      tool("fake-objcopy")
    ),
    format!(
      "recipe.objcopy.hex.pattern={} {elf} \"{{build.path}}/{{build.project_name}}.hex\"",
      tool("fake-objcopy")
    ),
    format!("recipe.size.pattern={} {elf}", tool("fake-size")),
    r"recipe.size.regex=^(?:\.text|\.data)\s+([0-9]+).*".to_string(),
    r"recipe.size.regex.data=^(?:\.data|\.bss)\s+([0-9]+).*".to_string(),
  ]
  .join("\n")
    + "\n"
}

/// Isolated build environment.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Lay out the fake platform with its core, variant and bootloader.
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    let platform = env.platform_dir();
    env.write_file(&platform.join("platform.txt"), &platform_txt(&env.tool_log()));
    env.write_file(&platform.join("boards.txt"), BOARDS_TXT);
    env.write_file(&platform.join("cores/arduino/Arduino.h"), "#pragma once\n");
    env.write_file(&platform.join("cores/arduino/wiring.c"), "/* wiring */\n");
    env.write_file(&platform.join("cores/arduino/main.cpp"), "/* main */\n");
    env.write_file(&platform.join("variants/standard/pins_arduino.h"), "#pragma once\n");
    env.write_file(&platform.join("bootloaders/optiboot.hex"), BOOTLOADER_HEX);

    for (name, script) in [
      ("fake-cc", FAKE_CC),
      ("fake-ar", FAKE_AR),
      ("fake-ld", FAKE_LD),
      ("fake-objcopy", FAKE_OBJCOPY),
      ("fake-size", FAKE_SIZE),
    ] {
      let path = platform.join("tools").join(name);
      env.write_file(&path, script);
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    env
  }

  /// Canonical temp root.
  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  pub fn hardware_root(&self) -> PathBuf {
    self.root().join("hardware")
  }

  pub fn platform_dir(&self) -> PathBuf {
    self.hardware_root().join("vendor").join("avr")
  }

  pub fn build_path(&self) -> PathBuf {
    self.root().join("build")
  }

  pub fn tool_log(&self) -> PathBuf {
    self.root().join("tools.log")
  }

  /// Write a file, creating parent directories.
  pub fn write_file(&self, path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }

  /// Create `sketches/<name>/<name>.ino` and return the sketch folder.
  pub fn sketch(&self, name: &str, source: &str) -> PathBuf {
    let dir = self.root().join("sketches").join(name);
    self.write_file(&dir.join(format!("{name}.ino")), source);
    dir
  }

  /// Create a recursive-layout library `<root>/<name>` exporting `<name>.h`.
  pub fn library(&self, root: &Path, name: &str, properties: &str) -> PathBuf {
    let dir = root.join(name);
    self.write_file(&dir.join("library.properties"), &format!("name={name}\n{properties}"));
    self.write_file(&dir.join("src").join(format!("{name}.h")), "#pragma once\n");
    self.write_file(&dir.join("src").join(format!("{name}.cpp")), &format!("#include \"{name}.h\"\n"));
    dir
  }

  pub fn catalog(&self) -> Catalog {
    Catalog::load(&[self.hardware_root()]).unwrap()
  }

  /// A request with no user library directory and two jobs.
  pub fn request(&self, sketch: &Path, fqbn: &str) -> CompileRequest {
    CompileRequest {
      sketch_path: sketch.to_path_buf(),
      fqbn: Some(fqbn.to_string()),
      build_path: Some(self.build_path()),
      settings: Settings {
        jobs: 2,
        user_library_dir: None,
        ..Settings::default()
      },
      ..CompileRequest::default()
    }
  }

  /// Tool invocations logged so far.
  pub fn tool_runs(&self) -> Vec<String> {
    fs::read_to_string(self.tool_log())
      .unwrap_or_default()
      .lines()
      .map(String::from)
      .collect()
  }

  pub fn clear_tool_runs(&self) {
    let _ = fs::remove_file(self.tool_log());
  }
}

pub const BLINK: &str = "void setup() {}\nvoid loop() {}\n";
