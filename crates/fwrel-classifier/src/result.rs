//! Classification result types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an invocation will compile the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// Source will be compiled, linked, uploaded, or packaged.
    Compile,
    /// Clean, introspection, or filesystem-only run; must not mutate metadata.
    NonCompile,
}

impl InvocationKind {
    /// True for [`InvocationKind::Compile`].
    pub fn is_compile(&self) -> bool {
        matches!(self, InvocationKind::Compile)
    }
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Compile => write!(f, "compile"),
            InvocationKind::NonCompile => write!(f, "non-compile"),
        }
    }
}

/// The rule that decided a classification, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum MatchedRule {
    /// IDE metadata scan.
    IntegrationDump,

    /// Driver is in clean mode.
    CleanFlag,

    /// No targets: a bare build.
    DefaultBuild,

    /// An internal upload alias was requested.
    UploadAlias(String),

    /// A clean target was requested.
    CleanTarget(String),

    /// Every target is on the non-compile allowlist.
    NonCompileOnly,

    /// At least one target is on the compile allowlist.
    CompileTarget(Vec<String>),

    /// Nothing matched; unknown targets compile.
    UnknownTargets,
}

impl MatchedRule {
    /// The kind this rule yields.
    pub fn kind(&self) -> InvocationKind {
        match self {
            MatchedRule::IntegrationDump
            | MatchedRule::CleanFlag
            | MatchedRule::CleanTarget(_)
            | MatchedRule::NonCompileOnly => InvocationKind::NonCompile,
            MatchedRule::DefaultBuild
            | MatchedRule::UploadAlias(_)
            | MatchedRule::CompileTarget(_)
            | MatchedRule::UnknownTargets => InvocationKind::Compile,
        }
    }

    /// Machine-readable form, e.g. `CLEAN_TARGET:fullclean`.
    pub fn to_code(&self) -> String {
        match self {
            MatchedRule::IntegrationDump => "INTEGRATION_DUMP".to_string(),
            MatchedRule::CleanFlag => "CLEAN_FLAG".to_string(),
            MatchedRule::DefaultBuild => "DEFAULT_BUILD".to_string(),
            MatchedRule::UploadAlias(t) => format!("UPLOAD_ALIAS:{}", t),
            MatchedRule::CleanTarget(t) => format!("CLEAN_TARGET:{}", t),
            MatchedRule::NonCompileOnly => "NON_COMPILE_ONLY".to_string(),
            MatchedRule::CompileTarget(ts) => format!("COMPILE_TARGET:{}", ts.join(",")),
            MatchedRule::UnknownTargets => "UNKNOWN_TARGETS".to_string(),
        }
    }

    fn describe(&self) -> String {
        match self {
            MatchedRule::IntegrationDump => "IDE integration dump never mutates state".to_string(),
            MatchedRule::CleanFlag => "clean mode never mutates build metadata".to_string(),
            MatchedRule::DefaultBuild => "no targets requested, a bare build compiles".to_string(),
            MatchedRule::UploadAlias(t) => format!("'{}' is an internal upload alias", t),
            MatchedRule::CleanTarget(t) => format!("'{}' is a clean target", t),
            MatchedRule::NonCompileOnly => {
                "all targets are introspection or filesystem-only".to_string()
            }
            MatchedRule::CompileTarget(ts) => format!("compile target(s) requested: {}", ts.join(", ")),
            MatchedRule::UnknownTargets => {
                "unrecognised targets are treated as compiling".to_string()
            }
        }
    }
}

/// Result of classifying one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Compile or non-compile.
    pub kind: InvocationKind,

    /// The first rule that matched.
    pub rule: MatchedRule,

    /// The normalised targets that were classified.
    pub targets: Vec<String>,
}

impl Classification {
    pub(crate) fn new(rule: MatchedRule, targets: Vec<String>) -> Self {
        Self {
            kind: rule.kind(),
            rule,
            targets,
        }
    }

    /// Shorthand for `kind.is_compile()`.
    pub fn is_compile(&self) -> bool {
        self.kind.is_compile()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable explanation.
    pub fn to_human(&self) -> String {
        let targets = if self.targets.is_empty() {
            "(default build)".to_string()
        } else {
            self.targets.join(", ")
        };
        format!(
            "Targets: {}\nDecision: {}\nRule: {} ({})",
            targets,
            self.kind,
            self.rule.to_code(),
            self.rule.describe()
        )
    }
}
