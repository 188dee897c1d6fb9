//! Environment facts and the predicates formulas use to gate behavior.
//!
//! Conditions are always evaluated against an explicit [`EnvFacts`] value
//! and a resolved [`OptionSet`], never against ambient process state.

use crate::options::OptionSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::process::Command;

/// Facts about the machine and the run that conditions may depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvFacts {
    /// Operating system (`std::env::consts::OS` naming, e.g. "macos").
    pub os: String,
    /// Operating system release, e.g. "10.12" or "24.04".
    #[serde(default)]
    pub os_version: Option<String>,
    /// CPU architecture (e.g. "aarch64").
    pub arch: String,
    /// Names of packages already present on the system.
    #[serde(default)]
    pub present: BTreeSet<String>,
    /// Whether this is a from-source head build.
    #[serde(default)]
    pub head: bool,
}

impl EnvFacts {
    /// Create facts for an explicit platform.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            ..Self::default()
        }
    }

    /// Detect facts for the running machine.
    ///
    /// The OS release is read from `sw_vers` on macOS and `/etc/os-release`
    /// on Linux; it stays `None` when it cannot be determined.
    pub fn detect() -> Self {
        let os = std::env::consts::OS;
        let os_version = match os {
            "macos" => detect_macos_version(),
            "linux" => detect_linux_version(),
            _ => None,
        };
        log::debug!(
            "Detected platform {}/{} ({})",
            os,
            std::env::consts::ARCH,
            os_version.as_deref().unwrap_or("unknown release")
        );

        Self {
            os: os.to_string(),
            os_version,
            arch: std::env::consts::ARCH.to_string(),
            present: BTreeSet::new(),
            head: false,
        }
    }

    /// Set the OS release.
    pub fn with_os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = Some(version.into());
        self
    }

    /// Mark packages as present.
    pub fn with_present<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.present.extend(names.into_iter().map(Into::into));
        self
    }

    /// Mark the run as a head build.
    pub fn with_head(mut self, head: bool) -> Self {
        self.head = head;
        self
    }

    /// Check whether a package is present.
    pub fn is_present(&self, name: &str) -> bool {
        self.present.contains(name)
    }
}

fn detect_macos_version() -> Option<String> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

fn detect_linux_version() -> Option<String> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;
    parse_os_release_version(&content)
}

fn parse_os_release_version(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix("VERSION_ID=")
            .map(|v| v.trim_matches('"').to_string())
    })
}

/// A predicate over options, environment facts and the formula version.
///
/// In TOML, unit variants are plain strings (`when = "head"`) and the
/// others are single-key tables (`when = { option = "imap" }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Always true.
    Always,
    /// True for head builds.
    Head,
    /// True when the named boolean option is enabled.
    Option(String),
    /// True when the named option has exactly this value.
    OptionEquals {
        /// Option name.
        option: String,
        /// Expected value.
        value: String,
    },
    /// True on this operating system.
    Os(String),
    /// True on exactly this OS release.
    OsVersion(String),
    /// True when the OS release starts with this prefix.
    OsVersionPrefix(String),
    /// True on this CPU architecture.
    Arch(String),
    /// True when the named package is present.
    Present(String),
    /// True when the formula version starts with this prefix.
    VersionPrefix(String),
    /// Negation.
    Not(Box<Condition>),
    /// True when every inner condition is true.
    All(Vec<Condition>),
    /// True when at least one inner condition is true.
    Any(Vec<Condition>),
}

/// Everything a condition can look at.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Resolved options of the formula.
    pub options: &'a OptionSet,
    /// Injected environment facts.
    pub facts: &'a EnvFacts,
    /// The formula version.
    pub version: &'a str,
}

impl Condition {
    /// Evaluate the condition.
    pub fn eval(&self, scope: &Scope<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Head => scope.facts.head,
            Condition::Option(name) => scope.options.is_enabled(name),
            Condition::OptionEquals { option, value } => {
                scope.options.value(option).is_some_and(|v| v.matches(value))
            }
            Condition::Os(os) => scope.facts.os == *os,
            Condition::OsVersion(version) => scope.facts.os_version.as_deref() == Some(version.as_str()),
            Condition::OsVersionPrefix(prefix) => scope
                .facts
                .os_version
                .as_deref()
                .is_some_and(|v| v.starts_with(prefix.as_str())),
            Condition::Arch(arch) => scope.facts.arch == *arch,
            Condition::Present(name) => scope.facts.is_present(name),
            Condition::VersionPrefix(prefix) => scope.version.starts_with(prefix.as_str()),
            Condition::Not(inner) => !inner.eval(scope),
            Condition::All(inner) => inner.iter().all(|c| c.eval(scope)),
            Condition::Any(inner) => inner.iter().any(|c| c.eval(scope)),
        }
    }

    /// Collect the option names this condition refers to.
    pub fn referenced_options<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Option(name) => out.push(name),
            Condition::OptionEquals { option, .. } => out.push(option),
            Condition::Not(inner) => inner.referenced_options(out),
            Condition::All(inner) | Condition::Any(inner) => {
                for c in inner {
                    c.referenced_options(out);
                }
            }
            _ => {}
        }
    }
}

/// Evaluate an optional condition; a missing condition is true.
pub fn holds(when: Option<&Condition>, scope: &Scope<'_>) -> bool {
    when.is_none_or(|c| c.eval(scope))
}
