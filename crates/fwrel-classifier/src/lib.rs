//! Compile/non-compile classifier for build-driver invocations.
//!
//! Pre-build steps that mutate generated metadata (the build timestamp
//! header, compressed assets) must only run when the driver is actually
//! going to compile. This crate decides that from the requested target set
//! and the driver's clean flag with a fixed, ordered rule table. It performs
//! no I/O.

mod config;
mod parser;
mod result;

pub use config::{
    ClassifierConfig, ClassifierConfigError, DEFAULT_COMPILE_TARGETS, DEFAULT_NON_COMPILE_TARGETS,
};
pub use parser::{parse_target_list, BuildInvocation};
pub use result::{Classification, InvocationKind, MatchedRule};

/// Classify a build invocation.
///
/// Rules, first match wins:
/// 0. IDE integration dump → non-compile
/// 1. clean flag → non-compile
/// 2. no targets → compile
/// 3. any upload alias → compile
/// 4. any target equal to or ending in the clean token → non-compile
/// 5. all targets on the non-compile list → non-compile
/// 6. any target on the compile list → compile
/// 7. otherwise → compile
pub fn classify(invocation: &BuildInvocation, config: &ClassifierConfig) -> Classification {
    let targets: Vec<String> = invocation.targets.iter().cloned().collect();

    if invocation.integration_dump {
        return Classification::new(MatchedRule::IntegrationDump, targets);
    }

    if invocation.clean {
        return Classification::new(MatchedRule::CleanFlag, targets);
    }

    if invocation.targets.is_empty() {
        return Classification::new(MatchedRule::DefaultBuild, targets);
    }

    if let Some(alias) = invocation
        .targets
        .iter()
        .find(|t| t.starts_with(&config.upload_alias_prefix))
    {
        return Classification::new(MatchedRule::UploadAlias(alias.clone()), targets);
    }

    if let Some(clean) = invocation
        .targets
        .iter()
        .find(|t| t.ends_with(&config.clean_token))
    {
        return Classification::new(MatchedRule::CleanTarget(clean.clone()), targets);
    }

    if invocation.targets.is_subset(&config.non_compile_targets) {
        return Classification::new(MatchedRule::NonCompileOnly, targets);
    }

    let compiling: Vec<String> = invocation
        .targets
        .intersection(&config.compile_targets)
        .cloned()
        .collect();
    if !compiling.is_empty() {
        return Classification::new(MatchedRule::CompileTarget(compiling), targets);
    }

    Classification::new(MatchedRule::UnknownTargets, targets)
}

/// Convenience wrapper returning only the kind.
pub fn is_compile_invocation(invocation: &BuildInvocation, config: &ClassifierConfig) -> bool {
    classify(invocation, config).is_compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(targets: &[&str], clean: bool) -> BuildInvocation {
        BuildInvocation::new(targets.iter().copied(), clean)
    }

    #[test]
    fn test_clean_flag_wins_over_everything() {
        let config = ClassifierConfig::default();
        for targets in [&[][..], &["upload"][..], &["__upload_app"][..], &["mystery"][..]] {
            let result = classify(&inv(targets, true), &config);
            assert_eq!(result.kind, InvocationKind::NonCompile);
            assert_eq!(result.rule, MatchedRule::CleanFlag);
        }
    }

    #[test]
    fn test_default_build_compiles() {
        let result = classify(&inv(&[], false), &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::DefaultBuild);
        assert!(result.is_compile());
    }

    #[test]
    fn test_upload_alias_beats_clean_target() {
        let result = classify(&inv(&["__upload", "fullclean"], false), &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::UploadAlias("__upload".to_string()));
        assert!(result.is_compile());
    }

    #[test]
    fn test_clean_suffix_is_non_compile() {
        let result = classify(&inv(&["fullclean"], false), &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::CleanTarget("fullclean".to_string()));
        assert!(!result.is_compile());
    }

    #[test]
    fn test_clean_target_beats_compile_target() {
        let result = classify(&inv(&["upload", "clean"], false), &ClassifierConfig::default());
        assert_eq!(result.kind, InvocationKind::NonCompile);
    }

    #[test]
    fn test_non_compile_subset() {
        let result = classify(&inv(&["idedata", "envdump"], false), &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::NonCompileOnly);
    }

    #[test]
    fn test_mixed_non_compile_and_compile() {
        let result = classify(&inv(&["buildfs", "upload"], false), &ClassifierConfig::default());
        assert_eq!(
            result.rule,
            MatchedRule::CompileTarget(vec!["upload".to_string()])
        );
    }

    #[test]
    fn test_unknown_target_compiles() {
        let result = classify(&inv(&["monitor"], false), &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::UnknownTargets);
        assert!(result.is_compile());
    }

    #[test]
    fn test_integration_dump() {
        let invocation = inv(&["upload"], false).with_integration_dump(true);
        let result = classify(&invocation, &ClassifierConfig::default());
        assert_eq!(result.rule, MatchedRule::IntegrationDump);
        assert!(!is_compile_invocation(&invocation, &ClassifierConfig::default()));
    }
}
