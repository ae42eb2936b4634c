//! Build invocation parsing.
//!
//! The build driver hands over its command-line targets as loosely formatted
//! strings (`"upload, monitor"`, `" size "`). They are normalised here into a
//! set so classification never depends on order, duplicates, or whitespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One build-driver invocation, as far as classification cares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInvocation {
    /// Requested targets; empty means a default build.
    pub targets: BTreeSet<String>,

    /// The driver runs in clean mode.
    #[serde(default)]
    pub clean: bool,

    /// The driver only dumps project metadata for an IDE.
    #[serde(default)]
    pub integration_dump: bool,
}

impl BuildInvocation {
    /// Build an invocation from raw target strings.
    ///
    /// Each entry may itself hold several comma-separated targets.
    pub fn new<I, S>(targets: I, clean: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .flat_map(|raw| parse_target_list(raw.as_ref()))
            .collect();
        Self {
            targets,
            clean,
            integration_dump: false,
        }
    }

    /// Mark the invocation as an IDE integration dump.
    pub fn with_integration_dump(mut self, integration_dump: bool) -> Self {
        self.integration_dump = integration_dump;
        self
    }

    /// True when no explicit target was requested.
    pub fn is_default_build(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Split a target list on commas and whitespace, dropping empty entries.
pub fn parse_target_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_list() {
        assert_eq!(parse_target_list("upload, monitor"), vec!["upload", "monitor"]);
        assert_eq!(parse_target_list("  size "), vec!["size"]);
        assert!(parse_target_list(" , ").is_empty());
    }

    #[test]
    fn test_invocation_dedupes_and_trims() {
        let inv = BuildInvocation::new(["upload", " upload ", "size,upload"], false);
        assert_eq!(inv.targets.len(), 2);
        assert!(inv.targets.contains("size"));
        assert!(!inv.clean);
    }

    #[test]
    fn test_blank_targets_mean_default_build() {
        let inv = BuildInvocation::new(["", "   "], false);
        assert!(inv.is_default_build());
    }
}
