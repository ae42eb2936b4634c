//! Classifier correctness corpus tests
//!
//! Each case is (targets, clean flag, expected kind, expected rule code),
//! covering the target sets the build driver actually produces.

use fwrel::{classify, BuildInvocation, InvocationKind};
use fwrel_classifier::ClassifierConfig;

use InvocationKind::{Compile, NonCompile};

const CORPUS: &[(&[&str], bool, InvocationKind, &str)] = &[
    // Plain builds
    (&[], false, Compile, "DEFAULT_BUILD"),
    (&["buildprog"], false, Compile, "COMPILE_TARGET:buildprog"),
    (&["upload"], false, Compile, "COMPILE_TARGET:upload"),
    (&["upload", "monitor"], false, Compile, "COMPILE_TARGET:upload"),
    (&["size"], false, Compile, "COMPILE_TARGET:size"),
    (&["package_webtools"], false, Compile, "COMPILE_TARGET:package_webtools"),
    (
        &["verify_and_publish_webtools"],
        false,
        Compile,
        "COMPILE_TARGET:verify_and_publish_webtools",
    ),
    // Upload aliases
    (&["__upload"], false, Compile, "UPLOAD_ALIAS:__upload"),
    (&["__upload_app", "erase"], false, Compile, "UPLOAD_ALIAS:__upload_app"),
    // Clean in all its spellings
    (&[], true, NonCompile, "CLEAN_FLAG"),
    (&["upload"], true, NonCompile, "CLEAN_FLAG"),
    (&["clean"], false, NonCompile, "CLEAN_TARGET:clean"),
    (&["fullclean"], false, NonCompile, "CLEAN_TARGET:fullclean"),
    (&["upload", "clean"], false, NonCompile, "CLEAN_TARGET:clean"),
    // Metadata and filesystem-only runs
    (&["idedata"], false, NonCompile, "NON_COMPILE_ONLY"),
    (&["compiledb"], false, NonCompile, "NON_COMPILE_ONLY"),
    (&["envdump", "menuconfig"], false, NonCompile, "NON_COMPILE_ONLY"),
    (&["buildfs", "uploadfs"], false, NonCompile, "NON_COMPILE_ONLY"),
    (&["uploadfsota"], false, NonCompile, "NON_COMPILE_ONLY"),
    (&["erase"], false, NonCompile, "NON_COMPILE_ONLY"),
    // Mixed and unknown
    (&["buildfs", "upload"], false, Compile, "COMPILE_TARGET:upload"),
    (&["monitor"], false, Compile, "UNKNOWN_TARGETS"),
    (&["idedata", "monitor"], false, Compile, "UNKNOWN_TARGETS"),
];

#[test]
fn test_corpus() {
    let config = ClassifierConfig::default();
    for (targets, clean, kind, code) in CORPUS {
        let invocation = BuildInvocation::new(targets.iter().copied(), *clean);
        let result = classify(&invocation, &config);
        assert_eq!(
            result.kind, *kind,
            "targets {:?} clean={} classified as {:?}",
            targets, clean, result.rule
        );
        assert_eq!(result.rule.to_code(), *code, "targets {:?} clean={}", targets, clean);
    }
}

#[test]
fn test_target_strings_are_normalised() {
    let config = ClassifierConfig::default();
    let spaced = BuildInvocation::new([" upload , monitor "], false);
    let split = BuildInvocation::new(["monitor", "upload", "upload"], false);
    assert_eq!(classify(&spaced, &config), classify(&split, &config));
}

#[test]
fn test_clean_flag_is_total() {
    let config = ClassifierConfig::default();
    for (targets, _, _, _) in CORPUS {
        let invocation = BuildInvocation::new(targets.iter().copied(), true);
        assert_eq!(classify(&invocation, &config).kind, NonCompile, "{:?}", targets);
    }
}

#[test]
fn test_integration_dump_precedes_everything() {
    let config = ClassifierConfig::default();
    for (targets, clean, _, _) in CORPUS {
        let invocation =
            BuildInvocation::new(targets.iter().copied(), *clean).with_integration_dump(true);
        assert_eq!(classify(&invocation, &config).rule.to_code(), "INTEGRATION_DUMP");
    }
}
