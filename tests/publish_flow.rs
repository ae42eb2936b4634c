//! Publish cycle tests
//!
//! Every external tool is a `MockRunner` rule: the merge utility is
//! recognised by its `merge_bin` subcommand and writes its `-o` output, the
//! integration suite by its `--host` argument.

use std::fs;
use std::path::{Path, PathBuf};

use fwrel::image::MergeError;
use fwrel::publish::{PublishError, PublishState};
use fwrel::{BuildContext, MockRunner, PublishOrchestrator, ReleaseConfig};
use fwrel_exec::MockResponse;
use serde_json::Value;

const HEADER: &str = "#define BUILD_DATE_TIME \"250101:1430\"\n";
const APP_IMAGE: &[u8] = b"application-image";
const MERGED_IMAGE: &[u8] = b"merged-image";

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("bootloader.bin"), b"bootloader").unwrap();
        fs::write(build.join("partitions.bin"), b"partitions").unwrap();
        fs::write(build.join("firmware.bin"), APP_IMAGE).unwrap();
        fs::create_dir_all(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/build_info.h"), HEADER).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn ctx(&self) -> BuildContext {
        BuildContext::builder(self.root())
            .build_dir(self.root().join("build"))
            .python_exe("/usr/bin/python3")
            .platformio_home(self.root().join("pio-home"))
            .build()
    }

    fn out(&self, name: &str) -> PathBuf {
        self.root().join("firmware/webtools").join(name)
    }

    /// Leave a complete previous release in the output directory.
    fn seed_previous_release(&self) {
        fs::create_dir_all(self.out("")).unwrap();
        fs::write(self.out("esp32c3.bin"), b"old-merged").unwrap();
        fs::write(self.out("SOTACAT-ESP32C3-OTA.bin"), b"old-ota").unwrap();
        fs::write(
            self.out("manifest.json"),
            r#"{"name": "My SOTACAT", "new_install_prompt_erase": true, "version": "v240101.0900", "builds": []}"#,
        )
        .unwrap();
    }

    fn manifest(&self) -> Value {
        let text = fs::read_to_string(self.out("manifest.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

fn merge_tool(code: i32) -> MockResponse {
    MockResponse::exit(code).with_effect(|inv| {
        if let Some(out) = inv.arg_after("-o") {
            fs::write(out, MERGED_IMAGE).unwrap();
        }
    })
}

fn runner_with_suite(suite_exit: i32) -> MockRunner {
    MockRunner::new()
        .on_arg("merge_bin", merge_tool(0))
        .on_arg(
            "--host",
            MockResponse::exit(suite_exit).with_lines(["test_version ... ok", "test_status ... done"]),
        )
}

#[test]
fn test_package_writes_all_outputs() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    let report = orchestrator.build_and_publish().unwrap();

    assert_eq!(report.version.as_str(), "v250101.1430");
    assert_eq!(fs::read(project.out("esp32c3.bin")).unwrap(), MERGED_IMAGE);
    assert_eq!(fs::read(project.out("SOTACAT-ESP32C3-OTA.bin")).unwrap(), APP_IMAGE);
    assert!(!project.out("esp32c3.bin.tmp").exists());
    assert!(report.tests.is_none());
    assert!(runner.calls_with_arg("--host").is_empty());
    assert_eq!(
        orchestrator.run().history(),
        &[
            PublishState::Idle,
            PublishState::ClearingStaleArtifacts,
            PublishState::Merging,
            PublishState::WritingManifest,
            PublishState::Done,
        ]
    );
}

#[test]
fn test_merge_command_line() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap();

    let calls = runner.calls_with_arg("merge_bin");
    assert_eq!(calls.len(), 1);
    let merge = &calls[0];
    assert_eq!(merge.program, PathBuf::from("/usr/bin/python3"));
    assert!(merge.args[0].ends_with("esptool.py"));
    assert_eq!(merge.arg_after("--chip"), Some("esp32c3"));
    assert_eq!(merge.arg_after("--flash_mode"), Some("dio"));
    assert_eq!(merge.arg_after("--flash_freq"), Some("80m"));
    assert_eq!(merge.arg_after("--flash_size"), Some("4MB"));

    let tail: Vec<&str> = merge.args[merge.args.len() - 6..]
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(tail[0], "0x0000");
    assert!(tail[1].ends_with("bootloader.bin"));
    assert_eq!(tail[2], "0x8000");
    assert!(tail[3].ends_with("partitions.bin"));
    assert_eq!(tail[4], "0x10000");
    assert!(tail[5].ends_with("firmware.bin"));
}

#[test]
fn test_manifest_contents_are_deterministic() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap();

    let manifest = project.manifest();
    assert_eq!(manifest["name"], "SOTACAT for Elecraft KX2, KX3, and KH1");
    assert_eq!(manifest["version"], "v250101.1430");
    assert_eq!(manifest["builds"][0]["chipFamily"], "ESP32-C3");
    assert_eq!(
        manifest["builds"][0]["parts"][0]["path"],
        "https://github.com/SOTAmat/SOTAcat/releases/download/v250101.1430/esp32c3.bin"
    );
    assert_eq!(manifest["builds"][0]["parts"][0]["offset"], 0);

    // A second cycle an hour later on the same header yields the same file.
    let first = fs::read_to_string(project.out("manifest.json")).unwrap();
    PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap();
    assert_eq!(fs::read_to_string(project.out("manifest.json")).unwrap(), first);
}

#[test]
fn test_stale_artifacts_replaced_and_fields_preserved() {
    let project = Project::new();
    project.seed_previous_release();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let report = PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap();

    assert_eq!(report.removed.len(), 3);
    assert_eq!(fs::read(project.out("esp32c3.bin")).unwrap(), MERGED_IMAGE);
    assert_eq!(fs::read(project.out("SOTACAT-ESP32C3-OTA.bin")).unwrap(), APP_IMAGE);

    let manifest = project.manifest();
    assert_eq!(manifest["name"], "My SOTACAT");
    assert_eq!(manifest["new_install_prompt_erase"], true);
    assert_eq!(manifest["version"], "v250101.1430");
    assert_eq!(manifest["builds"].as_array().unwrap().len(), 1);
}

#[test]
fn test_failing_suite_blocks_publish() {
    let project = Project::new();
    project.seed_previous_release();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(1);

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    let err = orchestrator.verify_and_publish().unwrap_err();

    assert!(matches!(err, PublishError::TestsFailed(1)));
    assert_eq!(err.exit_code(), 5);
    assert!(runner.calls_with_arg("merge_bin").is_empty());
    assert_eq!(orchestrator.state(), PublishState::Failed);
    assert!(!orchestrator.run().visited(PublishState::ClearingStaleArtifacts));

    // The previous release is untouched.
    assert_eq!(fs::read(project.out("esp32c3.bin")).unwrap(), b"old-merged");
    assert_eq!(fs::read(project.out("SOTACAT-ESP32C3-OTA.bin")).unwrap(), b"old-ota");
    assert_eq!(project.manifest()["version"], "v240101.0900");
}

#[test]
fn test_passing_suite_publishes_once() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    let report = orchestrator.verify_and_publish().unwrap();

    assert!(report.tests.is_some_and(|t| t.passed()));
    let calls = runner.calls();
    let suite_at = calls.iter().position(|c| c.has_arg("--host")).unwrap();
    let merge_at = calls.iter().position(|c| c.has_arg("merge_bin")).unwrap();
    assert!(suite_at < merge_at);
    assert_eq!(runner.calls_with_arg("merge_bin").len(), 1);
    assert_eq!(runner.calls_with_arg("--host").len(), 1);
    assert_eq!(calls[suite_at].arg_after("--host"), Some("sotacat.local"));
    assert_eq!(orchestrator.run().history()[1], PublishState::TestGating);
    assert!(project.out("manifest.json").is_file());
}

#[test]
fn test_missing_input_stops_before_merge_tool() {
    let project = Project::new();
    project.seed_previous_release();
    fs::remove_file(project.root().join("build/partitions.bin")).unwrap();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let err = PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap_err();

    match &err {
        PublishError::Merge(MergeError::MissingInput { path, .. }) => {
            assert_eq!(path, &project.root().join("build/partitions.bin"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert!(runner.calls().is_empty());
    // Cleared before the merge, so nothing from the previous release is
    // left to be mistaken for this build.
    assert!(!project.out("esp32c3.bin").exists());
    assert!(!project.out("SOTACAT-ESP32C3-OTA.bin").exists());
    assert!(!project.out("manifest.json").exists());
}

#[test]
fn test_unparsable_header_is_a_precondition() {
    let project = Project::new();
    project.seed_previous_release();
    fs::write(project.root().join("include/build_info.h"), "// generated\n").unwrap();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    let err = orchestrator.build_and_publish().unwrap_err();

    assert!(matches!(err, PublishError::Precondition(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(runner.calls().is_empty());
    assert_eq!(orchestrator.run().history(), &[PublishState::Idle, PublishState::Failed]);
    assert_eq!(fs::read(project.out("esp32c3.bin")).unwrap(), b"old-merged");
}

#[test]
fn test_merge_tool_failure_leaves_no_outputs() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = MockRunner::new().on_arg("merge_bin", merge_tool(2));

    let err = PublishOrchestrator::new(&ctx, &config, &runner)
        .build_and_publish()
        .unwrap_err();

    assert!(matches!(err, PublishError::Merge(MergeError::ToolExit { code: 2, .. })));
    assert_eq!(err.exit_code(), 3);
    assert!(!project.out("esp32c3.bin").exists());
    assert!(!project.out("esp32c3.bin.tmp").exists());
    assert!(!project.out("SOTACAT-ESP32C3-OTA.bin").exists());
    assert!(!project.out("manifest.json").exists());
}

#[test]
fn test_ota_copy_failure_leaves_no_merged_image() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let ota = project.out("SOTACAT-ESP32C3-OTA.bin");
    let blocked = ota.clone();
    let runner = MockRunner::new().on_arg(
        "merge_bin",
        MockResponse::success().with_effect(move |inv| {
            fs::write(inv.arg_after("-o").unwrap(), MERGED_IMAGE).unwrap();
            fs::create_dir_all(&blocked).unwrap();
        }),
    );

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    let err = orchestrator.build_and_publish().unwrap_err();

    assert!(matches!(err, PublishError::Merge(MergeError::Io { .. })));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(orchestrator.state(), PublishState::Failed);
    assert!(!project.out("esp32c3.bin").exists());
    assert!(!project.out("esp32c3.bin.tmp").exists());
    assert!(ota.is_dir());
    assert!(!project.out("manifest.json").exists());
}

#[test]
fn test_orchestrator_runs_one_cycle() {
    let project = Project::new();
    let ctx = project.ctx();
    let config = ReleaseConfig::default();
    let runner = runner_with_suite(0);

    let mut orchestrator = PublishOrchestrator::new(&ctx, &config, &runner);
    orchestrator.build_and_publish().unwrap();
    let err = orchestrator.build_and_publish().unwrap_err();

    assert!(matches!(err, PublishError::Transition(_)));
    assert_eq!(orchestrator.state(), PublishState::Done);
    assert_eq!(runner.calls_with_arg("merge_bin").len(), 1);
}
