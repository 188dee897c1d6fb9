//! Core types: the formula data model and install results.

use crate::condition::Condition;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Default location of a formula's configuration directory.
pub const DEFAULT_CONFIG_PATH: &str = "{etc}/{name}";

/// A declarative recipe for one package version.
///
/// Formulas are plain values: version-specific behavior is expressed
/// through data (options, conditional rules, steps), not subclassing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Formula name (e.g. "php74").
    pub name: String,

    /// Version identity; required before install.
    #[serde(default)]
    pub version: Option<String>,

    /// Packaging revision of this version.
    #[serde(default)]
    pub revision: u32,

    /// One-line description.
    #[serde(default)]
    pub desc: String,

    /// Project homepage.
    #[serde(default)]
    pub homepage: Option<String>,

    /// Source tarball URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Expected SHA-256 of the source tarball.
    #[serde(default)]
    pub sha256: Option<String>,

    /// Source location for head builds.
    #[serde(default)]
    pub head: Option<String>,

    /// Other versions of the same package that must not be co-installed.
    #[serde(default)]
    pub family: Option<Family>,

    /// Template for the configuration directory.
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Explicit conflicts.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,

    /// Build-time options, in declaration order.
    #[serde(default)]
    pub options: Vec<OptionDecl>,

    /// Conditional configure argument fragments.
    #[serde(default)]
    pub rules: Vec<ArgRule>,

    /// Environment overlay entries for build subprocesses.
    #[serde(default)]
    pub env: Vec<EnvRule>,

    /// Build steps.
    #[serde(default)]
    pub build: BuildSpec,

    /// Paths moved aside for the duration of the install.
    #[serde(default)]
    pub preserve: Vec<String>,

    /// Non-fatal repair actions run after a successful install.
    #[serde(default)]
    pub post_install: Vec<PostInstallAction>,

    /// Notes shown to the user after install.
    #[serde(default)]
    pub caveats: Option<String>,

    /// Smoke test run against the installed prefix.
    #[serde(default)]
    pub test: Option<Invocation>,
}

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

impl Formula {
    /// Create a formula with default build steps and nothing else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            revision: 0,
            desc: String::new(),
            homepage: None,
            url: None,
            sha256: None,
            head: None,
            family: None,
            config_path: default_config_path(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            options: Vec::new(),
            rules: Vec::new(),
            env: Vec::new(),
            build: BuildSpec::default(),
            preserve: Vec::new(),
            post_install: Vec::new(),
            caveats: None,
            test: None,
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add an explicit conflict.
    pub fn with_conflict(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.conflicts.push(Conflict {
            name: name.into(),
            reason: reason.into(),
        });
        self
    }

    /// Add an option declaration.
    pub fn with_option(mut self, option: OptionDecl) -> Self {
        self.options.push(option);
        self
    }

    /// Set the family pattern.
    pub fn with_family(mut self, pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        self.family = Some(Family {
            pattern: pattern.into(),
            reason: reason.into(),
        });
        self
    }

    /// The version identity, or [`Error::MissingVersion`] if unset or blank.
    pub fn version_str(&self) -> Result<&str> {
        match self.version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::MissingVersion {
                formula: self.name.clone(),
            }),
        }
    }

    /// Declared options followed by the implicit options of optional
    /// dependencies that do not already have an explicit declaration.
    pub fn effective_options(&self) -> Vec<OptionDecl> {
        let mut options = self.options.clone();
        for dep in self.dependencies.iter().filter(|d| d.optional) {
            if !options.iter().any(|o| o.name == dep.name) {
                options.push(OptionDecl::flag(
                    &dep.name,
                    format!("Build with {} support", dep.name),
                    false,
                ));
            }
        }
        options
    }

    /// Check the formula for internal consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::InvalidFormula {
            name: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("formula name is empty".into()));
        }

        let options = self.effective_options();
        let mut seen = HashSet::new();
        for option in &options {
            if !seen.insert(option.name.as_str()) {
                return Err(invalid(format!("option '{}' declared twice", option.name)));
            }
            option.validate().map_err(invalid)?;
        }

        for dep in &self.dependencies {
            if dep.name == self.name {
                return Err(invalid("formula depends on itself".into()));
            }
        }

        if let Some(family) = &self.family {
            regex::Regex::new(&family.pattern)
                .map_err(|e| invalid(format!("invalid family pattern: {e}")))?;
        }

        let mut referenced = Vec::new();
        for dep in &self.dependencies {
            if let Some(when) = &dep.when {
                when.referenced_options(&mut referenced);
            }
        }
        for rule in &self.rules {
            rule.when.referenced_options(&mut referenced);
        }
        for rule in &self.env {
            if let Some(when) = &rule.when {
                when.referenced_options(&mut referenced);
            }
        }
        for patch in &self.build.patches {
            if let Some(when) = &patch.when {
                when.referenced_options(&mut referenced);
            }
        }
        for action in &self.post_install {
            if let Some(when) = action.condition() {
                when.referenced_options(&mut referenced);
            }
        }
        if let Some(name) = referenced
            .iter()
            .find(|name| !options.iter().any(|o| o.name == **name))
        {
            return Err(invalid(format!("condition refers to undeclared option '{name}'")));
        }

        Ok(())
    }
}

/// A name pattern matching the other versions of the same package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    /// Regular expression over formula names.
    pub pattern: String,
    /// Why family members conflict.
    #[serde(default = "default_family_reason")]
    pub reason: String,
}

fn default_family_reason() -> String {
    "different versions install the same files".to_string()
}

/// A declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the required formula.
    pub name: String,
    /// Only needed while building.
    #[serde(default)]
    pub build: bool,
    /// Only planned when the same-named option is enabled.
    #[serde(default)]
    pub optional: bool,
    /// Only planned when this condition holds.
    #[serde(default)]
    pub when: Option<Condition>,
}

impl Dependency {
    /// A runtime dependency.
    pub fn runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            build: false,
            optional: false,
            when: None,
        }
    }

    /// A build-only dependency.
    pub fn build(name: impl Into<String>) -> Self {
        Self {
            build: true,
            ..Self::runtime(name)
        }
    }

    /// An optional dependency.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::runtime(name)
        }
    }

    /// Gate the dependency on a condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }
}

/// An explicit conflict declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflicting formula.
    pub name: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Value of a build option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean switch.
    Bool(bool),
    /// One of a fixed set of choices.
    Choice(String),
}

impl OptionValue {
    /// Whether this is an enabled boolean switch.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    /// Compare with a textual value.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Bool(b) => parse_bool(text) == Some(*b),
            Self::Choice(c) => c == text,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Choice(c) => write!(f, "{c}"),
        }
    }
}

/// Parse the textual boolean spellings accepted on the command line.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// A declared build option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDecl {
    /// Option name (e.g. "pear").
    pub name: String,
    /// Help text.
    #[serde(default)]
    pub description: String,
    /// Default value; a boolean for switches, a string for choices.
    #[serde(default = "default_option_value")]
    pub default: OptionValue,
    /// Allowed values of a choice option.
    #[serde(default)]
    pub choices: Vec<String>,
    /// Fragments emitted when the switch is on, or for any choice (`{value}`).
    #[serde(default)]
    pub on: Vec<String>,
    /// Fragments emitted when the switch is off.
    #[serde(default)]
    pub off: Vec<String>,
}

fn default_option_value() -> OptionValue {
    OptionValue::Bool(false)
}

impl OptionDecl {
    /// A boolean switch with no fragments.
    pub fn flag(name: impl Into<String>, description: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: OptionValue::Bool(default),
            choices: Vec::new(),
            on: Vec::new(),
            off: Vec::new(),
        }
    }

    /// A choice option with no fragments.
    pub fn choice(
        name: impl Into<String>,
        description: impl Into<String>,
        choices: &[&str],
        default: &str,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: OptionValue::Choice(default.to_string()),
            choices: choices.iter().map(|c| (*c).to_string()).collect(),
            on: Vec::new(),
            off: Vec::new(),
        }
    }

    /// Set the fragments emitted when enabled.
    pub fn on(mut self, fragments: &[&str]) -> Self {
        self.on = fragments.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Set the fragments emitted when disabled.
    pub fn off(mut self, fragments: &[&str]) -> Self {
        self.off = fragments.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Whether this is a choice option.
    pub fn is_choice(&self) -> bool {
        matches!(self.default, OptionValue::Choice(_))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match &self.default {
            OptionValue::Bool(_) if !self.choices.is_empty() => Err(format!(
                "option '{}' has choices but a boolean default",
                self.name
            )),
            OptionValue::Choice(c) if !self.choices.contains(c) => Err(format!(
                "default '{}' of option '{}' is not one of its choices",
                c, self.name
            )),
            _ => Ok(()),
        }
    }
}

/// Configure fragments emitted when a condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgRule {
    /// Guard.
    pub when: Condition,
    /// Fragments to append.
    pub args: Vec<String>,
}

/// How an overlay entry combines with an inherited value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvMode {
    /// Replace any inherited value.
    #[default]
    Set,
    /// Put the value in front of the inherited value.
    Prepend,
    /// Put the value after the inherited value.
    Append,
}

/// An environment overlay entry of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRule {
    /// Variable name.
    pub name: String,
    /// Value template.
    pub value: String,
    /// Combination mode.
    #[serde(default)]
    pub mode: EnvMode,
    /// Separator for prepend/append.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Guard.
    #[serde(default)]
    pub when: Option<Condition>,
}

fn default_separator() -> String {
    ":".to_string()
}

/// A program and its arguments; both may contain placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Program to run.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation.
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Rewrite of a `VAR = value` line in a generated Makefile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeVarEdit {
    /// File relative to the source directory.
    #[serde(default = "default_makefile")]
    pub file: String,
    /// Variable name.
    pub var: String,
    /// Text appended to the existing value.
    pub append: String,
}

fn default_makefile() -> String {
    "Makefile".to_string()
}

/// A patch applied to the unpacked sources before the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Where the patch comes from: a URL or a local path.
    pub url: String,
    /// Expected SHA-256 of the patch file.
    #[serde(default)]
    pub sha256: Option<String>,
    /// Leading path components to strip (`patch -p<strip>`).
    #[serde(default = "default_strip")]
    pub strip: u32,
    /// Guard.
    #[serde(default)]
    pub when: Option<Condition>,
}

fn default_strip() -> u32 {
    1
}

impl Patch {
    /// An unconditional `-p1` patch.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
            strip: default_strip(),
            when: None,
        }
    }

    /// Gate the patch on a condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }
}

/// The build steps of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Patches applied before any other step.
    #[serde(default)]
    pub patches: Vec<Patch>,
    /// Steps run only for head builds (e.g. `./buildconf --force`).
    #[serde(default)]
    pub prepare: Vec<Invocation>,
    /// Configure program; receives the evaluated argument list.
    #[serde(default = "default_configure")]
    pub configure: Invocation,
    /// Edits applied after configure.
    #[serde(default)]
    pub make_var_edits: Vec<MakeVarEdit>,
    /// Compile steps.
    #[serde(default = "default_compile")]
    pub compile: Vec<Invocation>,
    /// Install steps.
    #[serde(default = "default_install")]
    pub install: Vec<Invocation>,
    /// Force a single-job install and report an exclusive scheduling hint.
    #[serde(default)]
    pub deparallelize_install: bool,
}

fn default_configure() -> Invocation {
    Invocation::new("./configure", &["--prefix={prefix}"])
}

fn default_compile() -> Vec<Invocation> {
    vec![Invocation::new("make", &[])]
}

fn default_install() -> Vec<Invocation> {
    vec![Invocation::new("make", &["install"])]
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            patches: Vec::new(),
            prepare: Vec::new(),
            configure: default_configure(),
            make_var_edits: Vec::new(),
            compile: default_compile(),
            install: default_install(),
            deparallelize_install: false,
        }
    }
}

/// A non-fatal action run after a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostInstallAction {
    /// Create a convenience symlink; skipped when the target is absent.
    Symlink {
        /// What the link points to; relative targets resolve from the link's directory.
        target: String,
        /// Where the link is created.
        link: String,
        /// Replace an existing link.
        #[serde(default)]
        force: bool,
        /// Guard.
        #[serde(default)]
        when: Option<Condition>,
    },
    /// Copy a default config file, only if the destination does not exist.
    DefaultConfig {
        /// File relative to the source directory.
        source: String,
        /// Destination path.
        dest: String,
        /// Guard.
        #[serde(default)]
        when: Option<Condition>,
    },
    /// Recursively set permissions (`mode = 0o775`).
    Chmod {
        /// Root of the tree.
        path: String,
        /// Permission bits.
        mode: u32,
        /// Guard.
        #[serde(default)]
        when: Option<Condition>,
    },
    /// Run a program from the installed prefix.
    Run {
        /// Program to run.
        program: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Guard.
        #[serde(default)]
        when: Option<Condition>,
    },
}

impl PostInstallAction {
    /// The guard of this action.
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Symlink { when, .. }
            | Self::DefaultConfig { when, .. }
            | Self::Chmod { when, .. }
            | Self::Run { when, .. } => when.as_ref(),
        }
    }

    /// Short label used in warnings and logs.
    pub fn label(&self) -> String {
        match self {
            Self::Symlink { link, .. } => format!("symlink {link}"),
            Self::DefaultConfig { dest, .. } => format!("default config {dest}"),
            Self::Chmod { path, mode, .. } => format!("chmod {mode:o} {path}"),
            Self::Run { program, .. } => format!("run {program}"),
        }
    }
}

/// The phases of a formula install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    /// Head-only source preparation.
    Prepare,
    /// Configure with evaluated options.
    Configure,
    /// Post-configure file edits.
    Patch,
    /// Compile.
    Compile,
    /// Install into the prefix.
    Install,
    /// Formula smoke test.
    Test,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Configure => "configure",
            Self::Patch => "patch",
            Self::Compile => "compile",
            Self::Install => "install",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// Record of one completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step.
    pub step: BuildStep,
    /// The command line that ran.
    pub command: String,
    /// Exit code of the subprocess, if there was one.
    pub exit_code: Option<i32>,
}

/// A non-fatal problem found after a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInstallWarning {
    /// What was being done.
    pub action: String,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for PostInstallWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.message)
    }
}

/// Outcome of a successful formula install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    /// Formula name.
    pub formula: String,
    /// Installed version.
    pub version: String,
    /// Install prefix.
    pub prefix: PathBuf,
    /// Steps that ran, in order.
    pub steps: Vec<StepRecord>,
    /// Non-fatal warnings.
    pub warnings: Vec<PostInstallWarning>,
    /// Rendered caveats.
    pub caveats: Option<String>,
}

impl InstallResult {
    /// Whether the install finished without warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
