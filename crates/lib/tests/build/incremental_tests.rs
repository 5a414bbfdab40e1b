use std::fs;

use sketchforge_lib::compile::{CancelToken, compile_sketch};
use sketchforge_lib::execute::StepOutcome;

use super::common::{BLINK, TestEnv};

fn count(runs: &[String], tool: &str) -> usize {
  runs.iter().filter(|r| r.starts_with(&format!("{tool} "))).count()
}

#[tokio::test]
async fn unchanged_rebuild_runs_no_tools() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let request = env.request(&sketch, "vendor:avr:uno");
  let catalog = env.catalog();

  let first = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  env.clear_tool_runs();
  let second = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(first.success() && second.success());
  assert_eq!(first.result.produced_artifacts, second.result.produced_artifacts);
  assert!(env.tool_runs().is_empty(), "{:?}", env.tool_runs());
  assert!(second.result.steps.iter().all(|s| s.outcome == StepOutcome::Cached));
  assert_eq!(first.result.size, second.result.size);
}

#[tokio::test]
async fn hooks_run_on_every_build() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.extra_properties.insert(
    "recipe.hooks.prebuild.1.pattern",
    format!("/bin/sh -c \"echo hook >> '{}'\"", env.tool_log().display()),
  );
  let catalog = env.catalog();

  compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  env.clear_tool_runs();
  let second = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(second.success());
  assert_eq!(env.tool_runs(), vec!["hook"]);
  for step in &second.result.steps {
    let expected = if step.id == "hook:prebuild.1" {
      StepOutcome::Executed
    } else {
      StepOutcome::Cached
    };
    assert_eq!(step.outcome, expected, "{}", step.id);
  }
}

#[tokio::test]
async fn edited_sketch_recompiles_only_the_sketch() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let request = env.request(&sketch, "vendor:avr:uno");
  let catalog = env.catalog();

  compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  env.clear_tool_runs();
  fs::write(sketch.join("Blink.ino"), "void setup() { int x = 1; }\nvoid loop() {}\n").unwrap();
  let report = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(report.success());
  let runs = env.tool_runs();
  assert_eq!(count(&runs, "cc"), 1, "{runs:?}");
  assert!(runs[0].ends_with("sketch/Blink.ino.cpp"), "{runs:?}");
  assert_eq!(count(&runs, "ar"), 0);
  assert_eq!(count(&runs, "ld"), 1);
  assert_eq!(count(&runs, "objcopy"), 2);
  assert_eq!(count(&runs, "size"), 1);

  let outcome = |id: &str| report.result.steps.iter().find(|s| s.id == id).unwrap().outcome;
  assert_eq!(outcome("compile:core/wiring.c.o"), StepOutcome::Cached);
  assert_eq!(outcome("archive:core"), StepOutcome::Cached);
  assert_eq!(outcome("link"), StepOutcome::Executed);
}

#[tokio::test]
async fn edited_library_source_recompiles_only_that_library() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", "#include <Servo.h>\nvoid setup() {}\nvoid loop() {}\n");
  let servo = env.library(&sketch.join("libraries"), "Servo", "version=1.0.0\n");
  let request = env.request(&sketch, "vendor:avr:uno");
  let catalog = env.catalog();

  compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  env.clear_tool_runs();
  fs::write(servo.join("src/Servo.cpp"), "#include \"Servo.h\"\nint angle;\n").unwrap();
  let report = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(report.success());
  let runs = env.tool_runs();
  assert_eq!(count(&runs, "cc"), 1, "{runs:?}");
  assert!(runs[0].ends_with("Servo/src/Servo.cpp"), "{runs:?}");
  let outcome = |id: &str| report.result.steps.iter().find(|s| s.id == id).unwrap().outcome;
  assert_eq!(outcome("compile:sketch/Blink.ino.cpp.o"), StepOutcome::Cached);
  assert_eq!(outcome("compile:libraries/Servo/src/Servo.cpp.o"), StepOutcome::Executed);
}

#[tokio::test]
async fn deleted_artifact_is_regenerated() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let request = env.request(&sketch, "vendor:avr:uno");
  let catalog = env.catalog();

  compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  env.clear_tool_runs();
  let hex = env.build_path().join("Blink.ino.hex");
  fs::remove_file(&hex).unwrap();
  let report = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(report.success());
  assert!(hex.is_file());
  assert_eq!(env.tool_runs(), vec![format!("objcopy {}", hex.display())]);
}

#[tokio::test]
async fn switching_board_rebuilds_everything() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let catalog = env.catalog();

  compile_sketch(&env.request(&sketch, "vendor:avr:uno"), &catalog, &CancelToken::new())
    .await
    .unwrap();
  env.clear_tool_runs();
  let report = compile_sketch(&env.request(&sketch, "vendor:avr:mega"), &catalog, &CancelToken::new())
    .await
    .unwrap();

  assert!(report.success());
  assert_eq!(count(&env.tool_runs(), "cc"), 3);
  assert_eq!(report.result.count(StepOutcome::Cached), 0);
}

#[tokio::test]
async fn failed_build_resumes_from_cache() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", "#include \"Foo.h\"\nvoid setup() {}\nvoid loop() {}\n");
  let request = env.request(&sketch, "vendor:avr:uno");
  let catalog = env.catalog();

  let failed = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();
  assert!(!failed.success());

  fs::write(sketch.join("Blink.ino"), BLINK).unwrap();
  env.clear_tool_runs();
  let report = compile_sketch(&request, &catalog, &CancelToken::new()).await.unwrap();

  assert!(report.success(), "{report:?}");
  let runs = env.tool_runs();
  let core_recompiled = runs.iter().any(|r| r.starts_with("cc ") && r.contains("cores/arduino"));
  let core_finished = failed
    .result
    .steps
    .iter()
    .filter(|s| s.id.starts_with("compile:core/"))
    .all(|s| s.outcome == StepOutcome::Executed);
  assert!(!core_finished || !core_recompiled, "{runs:?}");
}
