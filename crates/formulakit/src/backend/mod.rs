//! Interfaces to the outside world: subprocesses and the filesystem.
//!
//! The engine only talks to the machine through [`ProcessRunner`] and
//! [`Filesystem`], enabling:
//! - Real execution via [`system::SystemRunner`] and [`system::LocalFs`]
//! - Recording fakes in tests

pub mod system;

use crate::types::{EnvMode, Invocation};
use std::io;
use std::path::Path;

/// Captured result of a subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// A successful, silent result.
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed result with an exit code.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One overlay entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Value.
    pub value: String,
    /// How it combines with the inherited value.
    pub mode: EnvMode,
    /// Separator for prepend/append.
    pub separator: String,
}

/// Immutable environment overrides passed to a subprocess.
///
/// Entries apply in order on top of the environment the subprocess
/// would otherwise inherit; the calling process is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: Vec<EnvVar>,
}

impl EnvOverlay {
    /// An empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy with one more entry that replaces any inherited value.
    pub fn set(&self, name: &str, value: &str) -> Self {
        self.with(EnvVar {
            name: name.to_string(),
            value: value.to_string(),
            mode: EnvMode::Set,
            separator: String::new(),
        })
    }

    /// A copy with one more entry.
    pub fn with(&self, var: EnvVar) -> Self {
        let mut vars = self.vars.clone();
        vars.push(var);
        Self { vars }
    }

    /// The entries in application order.
    pub fn vars(&self) -> &[EnvVar] {
        &self.vars
    }

    /// Whether the overlay has no entries.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Compute final values, reading inherited values through `inherited`.
    ///
    /// Later entries see the results of earlier ones. The output is sorted
    /// by first appearance of each name.
    pub fn resolve<F>(&self, inherited: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved: Vec<(String, String)> = Vec::new();

        for var in &self.vars {
            let current = resolved
                .iter()
                .find(|(name, _)| *name == var.name)
                .map(|(_, value)| value.clone())
                .or_else(|| inherited(&var.name))
                .filter(|v| !v.is_empty());

            let value = match (var.mode, current) {
                (EnvMode::Set, _) | (_, None) => var.value.clone(),
                (EnvMode::Prepend, Some(cur)) => format!("{}{}{}", var.value, var.separator, cur),
                (EnvMode::Append, Some(cur)) => format!("{}{}{}", cur, var.separator, var.value),
            };

            match resolved.iter_mut().find(|(name, _)| *name == var.name) {
                Some(entry) => entry.1 = value,
                None => resolved.push((var.name.clone(), value)),
            }
        }

        resolved
    }
}

/// Runs external build tools.
pub trait ProcessRunner: Send + Sync {
    /// Run a program to completion in `cwd` with an environment overlay.
    ///
    /// Returns `Err` only when the process could not be started.
    fn run(&self, invocation: &Invocation, cwd: &Path, env: &EnvOverlay)
    -> io::Result<ProcessOutput>;
}

/// Filesystem operations used by staging and post-install repair.
pub trait Filesystem: Send + Sync {
    /// Whether something (including a dangling symlink) exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Move `src` to `dst`.
    fn move_path(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Remove a file, symlink or directory tree.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Set permission bits on every entry of a tree.
    fn chmod_recursive(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create `link` pointing at `target`, replacing it when `overwrite` is set.
    fn symlink(&self, target: &Path, link: &Path, overwrite: bool) -> io::Result<()>;

    /// Copy a file.
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Read a text file.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Write a text file.
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Create a directory and its parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}
