//! Error types for formula resolution and installation.
//!
//! Every fatal condition of an install run is one variant of [`Error`].
//! Errors are grouped into an [`ErrorCategory`] so the CLI can give the
//! user a short description and actionable advice. Non-fatal problems
//! found after a successful install are [`PostInstallWarning`]s instead
//! and never travel through this type.
//!
//! [`PostInstallWarning`]: crate::types::PostInstallWarning

use crate::types::BuildStep;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for formulakit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of install errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A formula or requested configuration is invalid; nothing ran.
    Precondition,
    /// The dependency graph cannot be resolved.
    Dependency,
    /// A conflicting formula is present or planned.
    Conflict,
    /// An external build subprocess failed.
    Build,
    /// Staged files could not be restored; the filesystem needs attention.
    Inconsistent,
    /// A filesystem operation failed.
    Filesystem,
    /// The run was cancelled by the caller.
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors of this category are raised before any subprocess runs.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Precondition | Self::Dependency | Self::Conflict)
    }

    /// Whether the filesystem may be left in a state that needs manual repair.
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(self, Self::Inconsistent)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Precondition => "Invalid formula or options",
            Self::Dependency => "Dependency resolution failed",
            Self::Conflict => "Conflicting formula",
            Self::Build => "Build step failed",
            Self::Inconsistent => "Rollback failed",
            Self::Filesystem => "Filesystem error",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Precondition => "Check the formula definition and the requested options",
            Self::Dependency => "Fix the dependency declarations of the formulas involved",
            Self::Conflict => "Uninstall the conflicting formula first",
            Self::Build => "Inspect the build output above; staged files were restored",
            Self::Inconsistent => {
                "Restore the listed '-backup' files by hand before retrying"
            }
            Self::Filesystem => "Check permissions and free space of the affected paths",
            Self::Cancelled => "Re-run the install when ready",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A staged path that could not be moved back during rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    /// The original location of the file.
    pub path: PathBuf,
    /// The backup that is still on disk.
    pub backup: PathBuf,
    /// Why the restore failed.
    pub message: String,
}

/// Errors that abort an install run.
#[derive(Debug, Error)]
pub enum Error {
    /// The formula has no version identity.
    #[error("{formula} has no version; refusing to install")]
    MissingVersion {
        /// Formula name.
        formula: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Formula names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A conflicting formula is already present or in the same plan.
    #[error("{formula} conflicts with {conflicting}: {reason}")]
    Conflict {
        /// Formula being installed.
        formula: String,
        /// The formula it conflicts with.
        conflicting: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A requested option is not declared by the formula.
    #[error("unknown option '{option}' for {formula}")]
    UnknownOption {
        /// Formula name.
        formula: String,
        /// Requested option name.
        option: String,
    },

    /// A requested option value does not fit the declaration.
    #[error("invalid value '{value}' for option '{option}' of {formula}: {message}")]
    InvalidOptionValue {
        /// Formula name.
        formula: String,
        /// Option name.
        option: String,
        /// Requested value.
        value: String,
        /// What was expected instead.
        message: String,
    },

    /// No formula with this name exists in the registry.
    #[error("formula not found: {name}")]
    NotFound {
        /// Requested formula name.
        name: String,
    },

    /// An external build subprocess exited unsuccessfully.
    #[error("{formula}: {step} step failed ({}): {command}", describe_exit(.exit_code))]
    BuildStepFailed {
        /// Formula name.
        formula: String,
        /// Which step failed.
        step: BuildStep,
        /// The command line that was run.
        command: String,
        /// Exit code; `None` if the process never started or was killed.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Restoring staged files after a failure did not complete.
    #[error("rollback failed for {} path(s) after: {cause}", .failures.len())]
    RollbackFailed {
        /// The failure that triggered the rollback.
        cause: Box<Error>,
        /// Paths that are still displaced.
        failures: Vec<RestoreFailure>,
    },

    /// A `{placeholder}` template could not be rendered.
    #[error("template '{template}': {message}")]
    Template {
        /// The template text.
        template: String,
        /// What went wrong.
        message: String,
    },

    /// A path could not be staged.
    #[error("cannot stage {path}: {message}")]
    Staging {
        /// The path being staged.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// IO error during a filesystem operation.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A formula definition could not be parsed or is inconsistent.
    #[error("invalid formula {name}: {message}")]
    InvalidFormula {
        /// Formula name or file.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// Source code for a formula could not be obtained.
    #[error("cannot fetch source of {formula}: {message}")]
    Source {
        /// Formula name.
        formula: String,
        /// What went wrong.
        message: String,
    },

    /// The caller cancelled the run before a step started.
    #[error("install of {formula} cancelled before the {step} step")]
    Cancelled {
        /// Formula name.
        formula: String,
        /// The step that did not start.
        step: BuildStep,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status".to_string(),
    }
}

impl Error {
    /// Build an IO error tagged with the path involved.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingVersion { .. }
            | Error::UnknownOption { .. }
            | Error::InvalidOptionValue { .. }
            | Error::Template { .. }
            | Error::InvalidFormula { .. } => ErrorCategory::Precondition,
            Error::CyclicDependency { .. } | Error::NotFound { .. } => ErrorCategory::Dependency,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::BuildStepFailed { .. } => ErrorCategory::Build,
            Error::RollbackFailed { .. } => ErrorCategory::Inconsistent,
            Error::Staging { .. } | Error::Io { .. } | Error::Source { .. } => {
                ErrorCategory::Filesystem
            }
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// The error that caused a rollback, or `self` for every other error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Last `lines` lines of output captured from a failed build step.
    ///
    /// Standard error is preferred; standard output is used when stderr is
    /// blank. Looks through a failed rollback to the step that caused it.
    pub fn output_tail(&self, lines: usize) -> Option<String> {
        let Error::BuildStepFailed { stdout, stderr, .. } = self.root_cause() else {
            return None;
        };
        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        let all: Vec<&str> = output.trim_end().lines().collect();
        if all.is_empty() {
            return None;
        }
        Some(all[all.len().saturating_sub(lines)..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_preflight() {
        assert!(ErrorCategory::Precondition.is_preflight());
        assert!(ErrorCategory::Conflict.is_preflight());
        assert!(!ErrorCategory::Build.is_preflight());
        assert!(!ErrorCategory::Inconsistent.is_preflight());
    }

    #[test]
    fn test_rollback_failed_is_distinct() {
        let cause = Error::BuildStepFailed {
            formula: "php74".into(),
            step: BuildStep::Configure,
            command: "./configure".into(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        let err = Error::RollbackFailed {
            cause: Box::new(cause),
            failures: vec![RestoreFailure {
                path: PathBuf::from("/tmp/pear.conf"),
                backup: PathBuf::from("/tmp/pear.conf-backup"),
                message: "permission denied".into(),
            }],
        };

        assert_eq!(err.category(), ErrorCategory::Inconsistent);
        assert!(err.category().needs_manual_intervention());
        assert_eq!(err.root_cause().category(), ErrorCategory::Build);
        assert!(err.to_string().starts_with("rollback failed for 1 path(s)"));
    }

    #[test]
    fn test_build_step_message() {
        let err = Error::BuildStepFailed {
            formula: "php74".into(),
            step: BuildStep::Compile,
            command: "make".into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "php74: compile step failed (no exit status): make"
        );
    }

    #[test]
    fn test_output_tail() {
        let failed = |stdout: &str, stderr: &str| Error::BuildStepFailed {
            formula: "php74".into(),
            step: BuildStep::Configure,
            command: "./configure".into(),
            exit_code: Some(1),
            stdout: stdout.into(),
            stderr: stderr.into(),
        };

        let err = failed("checking for gcc... gcc\n", "line 1\nline 2\nerror: libxml2 not found\n");
        assert_eq!(
            err.output_tail(2).as_deref(),
            Some("line 2\nerror: libxml2 not found")
        );

        let err = failed("checking for gcc... gcc\nno acceptable C compiler\n", "  \n");
        assert_eq!(err.output_tail(1).as_deref(), Some("no acceptable C compiler"));

        let wrapped = Error::RollbackFailed {
            cause: Box::new(err),
            failures: Vec::new(),
        };
        assert_eq!(wrapped.output_tail(5).as_deref(), Some("checking for gcc... gcc\nno acceptable C compiler"));

        assert!(failed("", "").output_tail(5).is_none());
        assert!(Error::NotFound { name: "gmp".into() }.output_tail(5).is_none());
    }

    #[test]
    fn test_cycle_message() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert_eq!(err.category(), ErrorCategory::Dependency);
    }
}
