use std::fs;

use sketchforge_lib::cache::BuildLock;
use sketchforge_lib::compile::{CancelToken, ErrorKind, compile_sketch, resolve_board, resolve_build};
use sketchforge_lib::config::LockPolicy;
use sketchforge_lib::execute::{ExecutionFailure, StepOutcome};
use sketchforge_lib::plan::ArtifactKind;

use super::common::{BLINK, BOOTLOADER_HEX, TestEnv};

#[tokio::test]
async fn blink_builds_every_artifact() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let request = env.request(&sketch, "vendor:avr:uno");

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(report.success(), "{report:?}");
  assert_eq!(report.error_kind, None);
  let build = env.build_path();
  let artifacts = &report.result.produced_artifacts;
  assert_eq!(artifacts[&ArtifactKind::Elf], build.join("Blink.ino.elf"));
  assert_eq!(artifacts[&ArtifactKind::Hex], build.join("Blink.ino.hex"));
  assert_eq!(artifacts[&ArtifactKind::Eep], build.join("Blink.ino.eep"));
  assert!(artifacts.values().all(|path| path.is_file()));
  assert!(report.result.steps.iter().all(|s| s.outcome == StepOutcome::Executed));

  let size = report.result.size.unwrap();
  assert!(size.program_bytes > 4);
  assert_eq!(size.data_bytes, Some(6));
  assert_eq!(size.program_max, Some(32256));
  assert!(!size.program_exceeded());

  let runs = env.tool_runs();
  assert_eq!(runs.iter().filter(|r| r.starts_with("cc ")).count(), 3);
  assert_eq!(runs.iter().filter(|r| r.starts_with("ar ")).count(), 2);
  assert_eq!(runs.iter().filter(|r| r.starts_with("ld ")).count(), 1);
}

#[tokio::test]
async fn board_without_menus_resolves_bare_fqbn() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let board = resolve_board(&env.request(&sketch, "vendor:avr:uno"), &env.catalog()).unwrap();

  assert_eq!(board.fqbn.to_string(), "vendor:avr:uno");
  assert_eq!(board.get("build.mcu"), "atmega328p");
  assert_eq!(board.get("build.project_name"), "Blink.ino");
}

#[tokio::test]
async fn menu_option_selects_properties() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let catalog = env.catalog();

  let board = resolve_board(&env.request(&sketch, "vendor:avr:mega:speed=8"), &catalog).unwrap();
  assert_eq!(board.get("build.f_cpu"), "8000000L");

  let board = resolve_board(&env.request(&sketch, "vendor:avr:mega"), &catalog).unwrap();
  assert_eq!(board.get("build.f_cpu"), "16000000L");
}

#[tokio::test]
async fn unknown_option_fails_before_any_tool_runs() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let request = env.request(&sketch, "vendor:avr:mega:speed=16,cache=on");

  let err = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::UnknownOption);
  assert!(err.to_string().contains("cache"), "{err}");
  assert!(env.tool_runs().is_empty());
}

#[tokio::test]
async fn unknown_board_and_malformed_fqbn_are_reported() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let catalog = env.catalog();
  let cancel = CancelToken::new();

  let err = compile_sketch(&env.request(&sketch, "vendor:avr:nano"), &catalog, &cancel).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnknownBoard);

  let err = compile_sketch(&env.request(&sketch, "vendor:avr"), &catalog, &cancel).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::MalformedFqbn);
}

#[tokio::test]
async fn missing_header_failure_is_toolchain_error() {
  let env = TestEnv::new();
  let sketch = env.sketch("Probe", "#include \"Foo.h\"\nvoid setup() {}\nvoid loop() {}\n");
  let request = env.request(&sketch, "vendor:avr:uno");

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(!report.success());
  assert_eq!(report.error_kind, Some(ErrorKind::ToolchainError));
  assert!(matches!(
    &report.result.failure,
    Some(ExecutionFailure::Toolchain { step_id, .. }) if step_id == "compile:sketch/Probe.ino.cpp.o"
  ));
  assert_eq!(report.unresolved_includes.len(), 1);
  assert_eq!(report.unresolved_includes[0].header, "Foo.h");
  assert_eq!(report.escalated_includes, report.unresolved_includes);
  assert!(report.exported.is_empty());
}

#[tokio::test]
async fn guarded_unresolved_include_is_not_fatal() {
  let env = TestEnv::new();
  let sketch = env.sketch("Probe", "#if 0\n  #include \"Foo.h\"\n#endif\nvoid setup() {}\nvoid loop() {}\n");
  let request = env.request(&sketch, "vendor:avr:uno");

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(report.success(), "{report:?}");
  assert_eq!(report.unresolved_includes.len(), 1);
  assert_eq!(report.unresolved_includes[0].header, "Foo.h");
  assert!(report.escalated_includes.is_empty());
}

#[tokio::test]
async fn missing_recipe_fails_before_any_tool_runs() {
  let env = TestEnv::new();
  let platform_txt = env.platform_dir().join("platform.txt");
  let text = fs::read_to_string(&platform_txt).unwrap();
  let without_link: String = text
    .lines()
    .filter(|line| !line.starts_with("recipe.c.combine.pattern"))
    .map(|line| format!("{line}\n"))
    .collect();
  fs::write(&platform_txt, without_link).unwrap();

  let sketch = env.sketch("Blink", BLINK);
  let err = compile_sketch(&env.request(&sketch, "vendor:avr:uno"), &env.catalog(), &CancelToken::new())
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::MissingRecipe);
  assert!(err.to_string().contains("recipe.c.combine.pattern"), "{err}");
  assert!(env.tool_runs().is_empty());
}

#[tokio::test]
async fn locked_build_path_is_a_conflict() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let _held = BuildLock::acquire(&env.build_path(), LockPolicy::FailFast, "other build").unwrap();

  let err = compile_sketch(&env.request(&sketch, "vendor:avr:uno"), &env.catalog(), &CancelToken::new())
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::ConcurrentBuildConflict);
  assert!(err.to_string().contains("other build"), "{err}");
  assert!(env.tool_runs().is_empty());
}

#[tokio::test]
async fn cancelled_build_runs_nothing() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let cancel = CancelToken::new();
  cancel.cancel();

  let report = compile_sketch(&env.request(&sketch, "vendor:avr:uno"), &env.catalog(), &cancel)
    .await
    .unwrap();

  assert!(!report.success());
  assert_eq!(report.error_kind, Some(ErrorKind::Cancelled));
  assert!(matches!(report.result.failure, Some(ExecutionFailure::Cancelled)));
  assert!(env.tool_runs().is_empty());
}

#[tokio::test]
async fn resolve_build_writes_nothing() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);

  let resolved = resolve_build(&env.request(&sketch, "vendor:avr:uno"), &env.catalog()).await.unwrap();
  let plan = resolved.plan().unwrap();

  assert!(plan.step("link").is_some());
  assert!(plan.step("compile:sketch/Blink.ino.cpp.o").is_some());
  assert!(!env.build_path().exists());
  assert!(env.tool_runs().is_empty());
}

#[tokio::test]
async fn output_dir_receives_artifacts() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let out = env.root().join("out");
  let mut request = env.request(&sketch, "vendor:avr:uno");
  request.output_dir = Some(out.clone());

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  assert!(report.success());
  assert_eq!(report.export_dir, Some(out.clone()));
  assert_eq!(report.exported[&ArtifactKind::Hex], out.join("Blink.ino.hex"));
  assert!(out.join("Blink.ino.elf").is_file());
  assert!(env.build_path().join("Blink.ino.hex").is_file());
}

#[tokio::test]
async fn always_export_uses_sketch_build_folder() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);
  let mut request = env.request(&sketch, "vendor:avr:mega:speed=8");
  request.settings.always_export_binaries = true;

  let report = compile_sketch(&request, &env.catalog(), &CancelToken::new()).await.unwrap();

  let expected = sketch.join("build").join("vendor.avr.mega.speed=8");
  assert!(report.success());
  assert_eq!(report.export_dir, Some(expected.clone()));
  assert!(expected.join("Blink.ino.hex").is_file());
}

#[tokio::test]
async fn no_export_without_output_dir() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);

  let report = compile_sketch(&env.request(&sketch, "vendor:avr:uno"), &env.catalog(), &CancelToken::new())
    .await
    .unwrap();

  assert!(report.success());
  assert_eq!(report.export_dir, None);
  assert!(!sketch.join("build").exists());
}

#[tokio::test]
async fn bootloader_is_merged_into_hex() {
  let env = TestEnv::new();
  let sketch = env.sketch("Blink", BLINK);

  let report = compile_sketch(&env.request(&sketch, "vendor:avr:mega"), &env.catalog(), &CancelToken::new())
    .await
    .unwrap();

  assert!(report.success(), "{report:?}");
  let merged = &report.result.produced_artifacts[&ArtifactKind::HexWithBootloader];
  let text = fs::read_to_string(merged).unwrap();
  assert!(text.contains("01020304"), "{text}");
  assert!(text.contains(BOOTLOADER_HEX.lines().next().unwrap()), "{text}");

  let bin = fs::read(&report.result.produced_artifacts[&ArtifactKind::BinWithBootloader]).unwrap();
  assert_eq!(bin.len(), 0x7E02);
  assert_eq!(&bin[..4], &[1, 2, 3, 4]);
  assert_eq!(&bin[0x7E00..], &[0x11, 0x22]);
}
