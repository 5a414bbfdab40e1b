use sketchforge_lib::compile::{CancelToken, ErrorKind, compile_sketch, resolve_build};
use sketchforge_lib::libraries::Provenance;
use sketchforge_lib::plan::StepAction;

use super::common::TestEnv;

const USES_SERVO: &str = "#include <Servo.h>\nvoid setup() {}\nvoid loop() {}\n";

#[tokio::test]
async fn sketch_local_library_beats_user_library() {
  let env = TestEnv::new();
  let sketch = env.sketch("Sweep", USES_SERVO);
  let local = env.library(&sketch.join("libraries"), "Servo", "version=1.0.0\n");
  let user = env.root().join("user-libraries");
  env.library(&user, "Servo", "version=2.0.0\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.settings.user_library_dir = Some(user);
  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(report.success(), "{report:?}");
  assert_eq!(report.libraries.len(), 1);
  assert_eq!(report.libraries[0].provenance, Provenance::SketchLocal);
  assert_eq!(report.libraries[0].library.root_path, local);
  assert!(env.tool_runs().iter().any(|r| r.ends_with("Sweep/libraries/Servo/src/Servo.cpp")));
}

#[tokio::test]
async fn user_library_beats_platform_library() {
  let env = TestEnv::new();
  let sketch = env.sketch("Sweep", USES_SERVO);
  env.library(&env.platform_dir().join("libraries"), "Servo", "version=3.0.0\n");
  let user = env.root().join("user-libraries");
  env.library(&user, "Servo", "version=1.0.0\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.library_dirs = vec![user.clone()];
  let resolved = resolve_build(&request, &env.catalog()).await.unwrap();

  let libs: Vec<_> = resolved.libraries.graph.libraries().collect();
  assert_eq!(libs.len(), 1);
  assert_eq!(libs[0].provenance, Provenance::GlobalUser);
  assert_eq!(libs[0].library.root_path, user.join("Servo"));
}

#[tokio::test]
async fn platform_library_is_found_last() {
  let env = TestEnv::new();
  let sketch = env.sketch("Sweep", USES_SERVO);
  env.library(&env.platform_dir().join("libraries"), "Servo", "version=3.0.0\n");

  let resolved = resolve_build(&env.request(&sketch, "vendor:avr:uno"), &env.catalog()).await.unwrap();

  let libs: Vec<_> = resolved.libraries.graph.libraries().collect();
  assert_eq!(libs.len(), 1);
  assert_eq!(libs[0].provenance, Provenance::PlatformBundled);
  assert!(resolved.libraries.unresolved.is_empty());
}

#[tokio::test]
async fn library_includes_pull_in_dependencies() {
  let env = TestEnv::new();
  let sketch = env.sketch("Clock", "#include <Display.h>\nvoid setup() {}\nvoid loop() {}\n");
  let libs = env.root().join("user-libraries");
  let display = env.library(&libs, "Display", "version=1.0.0\n");
  env.write_file(&display.join("src/Display.h"), "#pragma once\n#include <Wire.h>\n");
  env.library(&libs, "Wire", "version=1.0.0\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.library_dirs = vec![libs];
  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(report.success(), "{report:?}");
  let mut names: Vec<_> = report.libraries.iter().map(|l| l.library.name.as_str()).collect();
  names.sort();
  assert_eq!(names, vec!["Display", "Wire"]);
  let runs = env.tool_runs();
  assert!(runs.iter().any(|r| r.ends_with("Wire/src/Wire.cpp")), "{runs:?}");
}

#[tokio::test]
async fn precompiled_library_is_linked_not_compiled() {
  let env = TestEnv::new();
  let sketch = env.sketch("Sense", "#include <Sensor.h>\nvoid setup() {}\nvoid loop() {}\n");
  let libs = env.root().join("user-libraries");
  let sensor = env.library(&libs, "Sensor", "version=1.0.0\nprecompiled=true\nldflags=-lm\n");
  let archive = sensor.join("src/atmega328p/libSensor.a");
  env.write_file(&archive, "!<arch>\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.library_dirs = vec![libs];
  let resolved = resolve_build(&request, &env.catalog()).await.unwrap();
  let plan = resolved.plan().unwrap();

  assert!(plan.steps.iter().all(|s| !s.id.starts_with("compile:libraries/Sensor")));
  let link = plan.step("link").unwrap();
  assert!(link.inputs.contains(&archive));
  let StepAction::Commands { commands } = &link.action else {
    panic!("link should run a command");
  };
  assert!(commands[0].contains(&format!("-L{}", sensor.join("src/atmega328p").display())));
  assert!(commands[0].contains("-lSensor -lm"));

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();
  assert!(report.success(), "{report:?}");
}

#[tokio::test]
async fn fully_precompiled_library_dependencies_are_detected() {
  let env = TestEnv::new();
  let sketch = env.sketch("Sense", "#include <Sensor.h>\nvoid setup() {}\nvoid loop() {}\n");
  let libs = env.root().join("user-libraries");
  let sensor = env.library(&libs, "Sensor", "version=1.0.0\nprecompiled=full\n");
  env.write_file(&sensor.join("src/Sensor.h"), "#pragma once\n#include <Bus.h>\n");
  env.write_file(&sensor.join("src/atmega328p/libSensor.a"), "!<arch>\n");
  env.library(&libs, "Bus", "version=1.0.0\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.library_dirs = vec![libs];
  let resolved = resolve_build(&request, &env.catalog()).await.unwrap();

  let names: Vec<_> = resolved.libraries.graph.libraries().map(|l| l.library.name.clone()).collect();
  assert!(names.contains(&"Bus".to_string()), "{names:?}");
  assert!(resolved.libraries.unresolved.is_empty());
}

#[tokio::test]
async fn library_cycle_is_fatal() {
  let env = TestEnv::new();
  let sketch = env.sketch("Loop", "#include <Ping.h>\nvoid setup() {}\nvoid loop() {}\n");
  let libs = env.root().join("user-libraries");
  let ping = env.library(&libs, "Ping", "version=1.0.0\n");
  env.write_file(&ping.join("src/Ping.h"), "#pragma once\n#include <Pong.h>\n");
  let pong = env.library(&libs, "Pong", "version=1.0.0\n");
  env.write_file(&pong.join("src/Pong.h"), "#pragma once\n#include <Ping.h>\n");

  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.library_dirs = vec![libs];
  let err = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::LibraryDependencyCycle);
  assert!(!env.build_path().exists());
  assert!(env.tool_runs().is_empty());
}
