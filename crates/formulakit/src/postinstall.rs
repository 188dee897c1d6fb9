//! Post-install repair actions.
//!
//! Actions are rendered before anything runs, so template mistakes are
//! caught pre-flight. Running them never fails the install: every problem
//! becomes a [`PostInstallWarning`].

use crate::backend::{EnvOverlay, Filesystem, ProcessRunner};
use crate::condition::{Scope, holds};
use crate::error::Result;
use crate::template::{self, Vars};
use crate::types::{Invocation, PostInstallAction, PostInstallWarning};
use std::path::{Path, PathBuf};

/// A post-install action with all templates rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// Create a symlink if its target exists.
    Symlink {
        /// Link target as written into the link.
        target: PathBuf,
        /// Link location.
        link: PathBuf,
        /// Replace an existing link.
        force: bool,
    },
    /// Copy a file unless the destination exists.
    DefaultConfig {
        /// Absolute source file.
        source: PathBuf,
        /// Destination.
        dest: PathBuf,
    },
    /// Recursive permission fix.
    Chmod {
        /// Tree root.
        path: PathBuf,
        /// Permission bits.
        mode: u32,
    },
    /// A program run from `cwd`.
    Run {
        /// What to run.
        invocation: Invocation,
        /// Working directory.
        cwd: PathBuf,
    },
}

impl ResolvedAction {
    /// Short label used in warnings and logs.
    pub fn label(&self) -> String {
        match self {
            Self::Symlink { link, .. } => format!("symlink {}", link.display()),
            Self::DefaultConfig { dest, .. } => format!("default config {}", dest.display()),
            Self::Chmod { path, mode } => format!("chmod {mode:o} {}", path.display()),
            Self::Run { invocation, .. } => format!("run {}", invocation.program),
        }
    }
}

/// Render the actions whose condition holds.
///
/// Relative `default_config` sources resolve against `source_dir`; `run`
/// actions execute in the install prefix.
pub fn resolve(
    actions: &[PostInstallAction],
    scope: &Scope<'_>,
    vars: &Vars,
    source_dir: &Path,
) -> Result<Vec<ResolvedAction>> {
    let prefix = PathBuf::from(vars.get("prefix").unwrap_or_default());
    let mut resolved = Vec::new();

    for action in actions {
        if !holds(action.condition(), scope) {
            log::trace!("Skipping post-install {}: condition is false", action.label());
            continue;
        }

        resolved.push(match action {
            PostInstallAction::Symlink {
                target,
                link,
                force,
                ..
            } => ResolvedAction::Symlink {
                target: template::render_path(target, vars)?,
                link: template::render_path(link, vars)?,
                force: *force,
            },
            PostInstallAction::DefaultConfig { source, dest, .. } => ResolvedAction::DefaultConfig {
                source: source_dir.join(template::render_path(source, vars)?),
                dest: template::render_path(dest, vars)?,
            },
            PostInstallAction::Chmod { path, mode, .. } => ResolvedAction::Chmod {
                path: template::render_path(path, vars)?,
                mode: *mode,
            },
            PostInstallAction::Run { program, args, .. } => ResolvedAction::Run {
                invocation: Invocation {
                    program: template::render(program, vars)?,
                    args: template::render_all(args, vars)?,
                },
                cwd: prefix.clone(),
            },
        });
    }

    Ok(resolved)
}

/// Runs resolved actions against the backends.
pub struct PostInstall<'a> {
    /// Filesystem backend.
    pub fs: &'a dyn Filesystem,
    /// Process backend.
    pub runner: &'a dyn ProcessRunner,
    /// Overlay for `run` actions.
    pub env: &'a EnvOverlay,
}

impl PostInstall<'_> {
    /// Run every action, collecting warnings instead of failing.
    pub fn run(&self, formula: &str, actions: &[ResolvedAction]) -> Vec<PostInstallWarning> {
        let mut warnings = Vec::new();
        for action in actions {
            if let Err(message) = self.apply(action) {
                let warning = PostInstallWarning {
                    action: action.label(),
                    message,
                };
                log::warn!("{}: {}", formula, warning);
                warnings.push(warning);
            }
        }
        warnings
    }

    fn apply(&self, action: &ResolvedAction) -> std::result::Result<(), String> {
        match action {
            ResolvedAction::Symlink {
                target,
                link,
                force,
            } => {
                let resolved = match link.parent() {
                    Some(parent) if target.is_relative() => parent.join(target),
                    _ => target.clone(),
                };
                if !self.fs.exists(&resolved) {
                    log::debug!(
                        "Skipping symlink {}: {} does not exist",
                        link.display(),
                        resolved.display()
                    );
                    return Ok(());
                }
                self.fs
                    .symlink(target, link, *force)
                    .map_err(|e| e.to_string())?;
                log::debug!("Linked {} -> {}", link.display(), target.display());
            }
            ResolvedAction::DefaultConfig { source, dest } => {
                if self.fs.exists(dest) {
                    log::info!("Keeping existing {}", dest.display());
                    return Ok(());
                }
                if !self.fs.exists(source) {
                    return Err(format!("{} does not exist", source.display()));
                }
                if let Some(parent) = dest.parent() {
                    self.fs.create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                self.fs.copy(source, dest).map_err(|e| e.to_string())?;
                log::debug!("Installed default config {}", dest.display());
            }
            ResolvedAction::Chmod { path, mode } => {
                self.fs
                    .chmod_recursive(path, *mode)
                    .map_err(|e| e.to_string())?;
            }
            ResolvedAction::Run { invocation, cwd } => {
                let output = self
                    .runner
                    .run(invocation, cwd, self.env)
                    .map_err(|e| format!("cannot start {}: {e}", invocation.program))?;
                if !output.success() {
                    let detail = output.stderr.trim();
                    return Err(match output.exit_code {
                        Some(code) if detail.is_empty() => format!("exited with status {code}"),
                        Some(code) => format!("exited with status {code}: {detail}"),
                        None => "terminated by signal".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProcessOutput;
    use crate::backend::system::LocalFs;
    use crate::condition::{Condition, EnvFacts};
    use crate::options::OptionSet;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    struct FailingRunner;

    impl ProcessRunner for FailingRunner {
        fn run(&self, _: &Invocation, _: &Path, _: &EnvOverlay) -> io::Result<ProcessOutput> {
            Ok(ProcessOutput::failed(1, "pear: channel update failed\n"))
        }
    }

    fn vars(root: &Path) -> Vars {
        let mut vars = Vars::new(root.join("opt"));
        vars.set_path("prefix", root);
        vars.set_path("etc", &root.join("etc"));
        vars.set_path("bin", &root.join("bin"));
        vars
    }

    fn run_all(actions: &[PostInstallAction], root: &Path, source: &Path) -> Vec<PostInstallWarning> {
        let options = OptionSet::default();
        let facts = EnvFacts::default();
        let scope = Scope {
            options: &options,
            facts: &facts,
            version: "7.4",
        };
        let resolved = resolve(actions, &scope, &vars(root), source).unwrap();
        let env = EnvOverlay::new();
        PostInstall {
            fs: &LocalFs::new(),
            runner: &FailingRunner,
            env: &env,
        }
        .run("php74", &resolved)
    }

    #[test]
    fn test_default_config_preserves_existing() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("php.ini-development"), "default").unwrap();
        fs::create_dir_all(tmp.path().join("etc")).unwrap();
        fs::write(tmp.path().join("etc").join("php.ini"), "mine").unwrap();

        let actions = vec![PostInstallAction::DefaultConfig {
            source: "php.ini-development".into(),
            dest: "{etc}/php.ini".into(),
            when: None,
        }];
        let warnings = run_all(&actions, tmp.path(), &source);

        assert!(warnings.is_empty());
        assert_eq!(
            fs::read_to_string(tmp.path().join("etc").join("php.ini")).unwrap(),
            "mine"
        );
    }

    #[test]
    fn test_default_config_installed_when_absent() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("php.ini-development"), "default").unwrap();

        let actions = vec![PostInstallAction::DefaultConfig {
            source: "php.ini-development".into(),
            dest: "{etc}/php/php.ini".into(),
            when: None,
        }];
        assert!(run_all(&actions, tmp.path(), &source).is_empty());
        assert_eq!(
            fs::read_to_string(tmp.path().join("etc").join("php").join("php.ini")).unwrap(),
            "default"
        );
    }

    #[test]
    fn test_symlink_skipped_without_target() {
        let tmp = TempDir::new().unwrap();
        let actions = vec![PostInstallAction::Symlink {
            target: "phar.phar".into(),
            link: "{bin}/phar".into(),
            force: false,
            when: None,
        }];
        assert!(run_all(&actions, tmp.path(), tmp.path()).is_empty());
        assert!(!tmp.path().join("bin").join("phar").is_symlink());
    }

    #[test]
    fn test_failures_become_warnings() {
        let tmp = TempDir::new().unwrap();
        let actions = vec![
            PostInstallAction::Chmod {
                path: "{prefix}/lib/php".into(),
                mode: 0o775,
                when: None,
            },
            PostInstallAction::Run {
                program: "{bin}/pear".into(),
                args: vec!["update-channels".into()],
                when: None,
            },
        ];
        let warnings = run_all(&actions, tmp.path(), tmp.path());

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].action.starts_with("chmod 775"));
        assert_eq!(
            warnings[1].message,
            "exited with status 1: pear: channel update failed"
        );
    }

    #[test]
    fn test_condition_filters_actions() {
        let options = OptionSet::default();
        let facts = EnvFacts::default();
        let scope = Scope {
            options: &options,
            facts: &facts,
            version: "7.4",
        };
        let actions = vec![PostInstallAction::Chmod {
            path: "{prefix}".into(),
            mode: 0o755,
            when: Some(Condition::Head),
        }];
        let resolved = resolve(&actions, &scope, &vars(Path::new("/fx")), Path::new("/src")).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolve_rejects_unknown_placeholder() {
        let options = OptionSet::default();
        let facts = EnvFacts::default();
        let scope = Scope {
            options: &options,
            facts: &facts,
            version: "7.4",
        };
        let actions = vec![PostInstallAction::Chmod {
            path: "{pear_dir}".into(),
            mode: 0o755,
            when: None,
        }];
        assert!(resolve(&actions, &scope, &vars(Path::new("/fx")), Path::new("/src")).is_err());
    }
}
