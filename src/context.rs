//! Build invocation context
//!
//! Everything the build driver tells the lane about the current invocation
//! (directories, interpreter, build flags, requested targets) is captured
//! once in an immutable [`BuildContext`] and passed by reference to every
//! step. Nothing below the CLI reads ambient process state for these values.

use regex_lite::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use fwrel_classifier::BuildInvocation;

/// Build type encoded in the driver's build flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildType {
    Debug,
    Release,
    Unknown,
}

impl BuildType {
    /// Detect from a flag string such as `-DDEBUG -Os -D CORE_DEBUG_LEVEL=3`.
    ///
    /// The first bare `DEBUG` or `RELEASE` define wins. Valued defines
    /// (`-DRELEASE=1`) do not count.
    pub fn from_flags(flags: &str) -> Self {
        let mut tokens = flags.split_whitespace();
        while let Some(token) = tokens.next() {
            let define = match token.strip_prefix("-D") {
                Some("") => tokens.next().unwrap_or_default(),
                Some(rest) => rest,
                None => continue,
            };
            match define {
                "DEBUG" => return BuildType::Debug,
                "RELEASE" => return BuildType::Release,
                _ => {}
            }
        }
        BuildType::Unknown
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildType::Debug => write!(f, "Debug"),
            BuildType::Release => write!(f, "Release"),
            BuildType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Immutable context for one lane invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    project_dir: PathBuf,
    build_dir: PathBuf,
    python_exe: PathBuf,
    build_flags: String,
    invocation: BuildInvocation,
    frameworks: Vec<String>,
    platformio_home: PathBuf,
    vars: BTreeMap<String, String>,
}

impl BuildContext {
    /// Start building a context rooted at `project_dir`.
    pub fn builder(project_dir: impl Into<PathBuf>) -> BuildContextBuilder {
        BuildContextBuilder::new(project_dir.into())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Driver build directory, falling back to `.pio/build/<env>`.
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Interpreter the build driver itself runs on.
    pub fn python_exe(&self) -> &Path {
        &self.python_exe
    }

    pub fn build_flags(&self) -> &str {
        &self.build_flags
    }

    pub fn build_type(&self) -> BuildType {
        BuildType::from_flags(&self.build_flags)
    }

    pub fn invocation(&self) -> &BuildInvocation {
        &self.invocation
    }

    pub fn platformio_home(&self) -> &Path {
        &self.platformio_home
    }

    /// Whether the build uses `framework` (e.g. `espidf`).
    pub fn has_framework(&self, framework: &str) -> bool {
        self.frameworks.iter().any(|f| f == framework)
    }

    /// Replace `$NAME` and `${NAME}` with context variables.
    ///
    /// Unknown variables are left untouched so they show up in error
    /// messages instead of silently collapsing to an empty string.
    pub fn subst(&self, template: &str) -> String {
        var_pattern()
            .replace_all(template, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.vars.get(name) {
                    Some(value) => value.clone(),
                    None => caps
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            })
            .into_owned()
    }

    /// Substitute and resolve relative results against the project dir.
    pub fn subst_path(&self, template: &str) -> PathBuf {
        let path = PathBuf::from(self.subst(template));
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable pattern is a valid regex")
    })
}

/// Default `PLATFORMIO_HOME`: the env var, else `~/.platformio`.
pub fn default_platformio_home() -> PathBuf {
    if let Some(home) = std::env::var_os("PLATFORMIO_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    home_dir().join(".platformio")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Builder for [`BuildContext`].
#[derive(Debug, Clone)]
pub struct BuildContextBuilder {
    project_dir: PathBuf,
    build_dir: Option<PathBuf>,
    python_exe: Option<PathBuf>,
    build_flags: String,
    invocation: BuildInvocation,
    frameworks: Vec<String>,
    env_name: Option<String>,
    platformio_home: Option<PathBuf>,
}

impl BuildContextBuilder {
    fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            build_dir: None,
            python_exe: None,
            build_flags: String::new(),
            invocation: BuildInvocation::default(),
            frameworks: Vec::new(),
            env_name: None,
            platformio_home: None,
        }
    }

    pub fn build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.build_dir = (!dir.as_os_str().is_empty()).then_some(dir);
        self
    }

    pub fn python_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.python_exe = Some(exe.into());
        self
    }

    pub fn build_flags(mut self, flags: impl Into<String>) -> Self {
        self.build_flags = flags.into();
        self
    }

    pub fn invocation(mut self, invocation: BuildInvocation) -> Self {
        self.invocation = invocation;
        self
    }

    pub fn frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn env_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.env_name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn platformio_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.platformio_home = Some(home.into());
        self
    }

    pub fn build(self) -> BuildContext {
        let project_dir = self.project_dir;
        let env_name = self.env_name;
        let build_dir = self.build_dir.unwrap_or_else(|| {
            let build_root = project_dir.join(".pio").join("build");
            match env_name {
                Some(ref env) => build_root.join(env),
                None => build_root,
            }
        });
        let python_exe = self.python_exe.unwrap_or_else(|| PathBuf::from("python3"));
        let platformio_home = self.platformio_home.unwrap_or_else(default_platformio_home);

        let mut vars = BTreeMap::new();
        vars.insert("PROJECT_DIR".to_string(), project_dir.display().to_string());
        vars.insert("BUILD_DIR".to_string(), build_dir.display().to_string());
        vars.insert("PYTHONEXE".to_string(), python_exe.display().to_string());
        vars.insert("PLATFORMIO_HOME".to_string(), platformio_home.display().to_string());
        vars.insert("HOME".to_string(), home_dir().display().to_string());
        vars.insert("BUILD_FLAGS".to_string(), self.build_flags.clone());
        if let Some(ref env) = env_name {
            vars.insert("PIOENV".to_string(), env.clone());
        }

        BuildContext {
            project_dir,
            build_dir,
            python_exe,
            build_flags: self.build_flags,
            invocation: self.invocation,
            frameworks: self.frameworks,
            platformio_home,
            vars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BuildContext {
        BuildContext::builder("/work/fw")
            .build_dir("/work/fw/.pio/build/release")
            .python_exe("/opt/pio/bin/python")
            .platformio_home("/opt/pio")
            .env_name("release")
            .frameworks(["espidf"])
            .build()
    }

    #[test]
    fn test_subst_both_forms() {
        let ctx = ctx();
        assert_eq!(ctx.subst("$PROJECT_DIR/firmware"), "/work/fw/firmware");
        assert_eq!(
            ctx.subst("${PLATFORMIO_HOME}/packages/tool-esptoolpy/esptool.py"),
            "/opt/pio/packages/tool-esptoolpy/esptool.py"
        );
    }

    #[test]
    fn test_subst_leaves_unknown_vars() {
        assert_eq!(ctx().subst("$NOPE/x"), "$NOPE/x");
    }

    #[test]
    fn test_subst_path_relative_to_project() {
        assert_eq!(
            ctx().subst_path("include/build_info.h"),
            PathBuf::from("/work/fw/include/build_info.h")
        );
    }

    #[test]
    fn test_build_dir_fallback() {
        let ctx = BuildContext::builder("/p").build_dir("").env_name("dbg").build();
        assert_eq!(ctx.build_dir(), Path::new("/p/.pio/build/dbg"));
        assert_eq!(ctx.subst("$PIOENV"), "dbg");
    }

    #[test]
    fn test_build_type_detection() {
        assert_eq!(BuildType::from_flags("-Os -DDEBUG"), BuildType::Debug);
        assert_eq!(BuildType::from_flags("-D RELEASE -DDEBUG"), BuildType::Release);
        assert_eq!(BuildType::from_flags("-DRELEASE=1"), BuildType::Unknown);
        assert_eq!(BuildType::from_flags("-DDEBUG=0 -DRELEASE"), BuildType::Release);
        assert_eq!(BuildType::from_flags("-D DEBUG=1"), BuildType::Unknown);
        assert_eq!(BuildType::from_flags("-DCORE_DEBUG_LEVEL=3"), BuildType::Unknown);
    }

    #[test]
    fn test_frameworks() {
        let ctx = ctx();
        assert!(ctx.has_framework("espidf"));
        assert!(!ctx.has_framework("arduino"));
    }
}
