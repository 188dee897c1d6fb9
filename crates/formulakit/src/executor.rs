//! Build step executor - runs one formula's build in order with rollback
//!
//! Everything that can be checked without side effects (version, options,
//! templates, post-install actions) is resolved into a [`BuildScript`]
//! first. Only then are preserved paths staged and the steps run:
//! source patches, prepare (head builds only), configure, Makefile edits,
//! compile, install. Any failure after staging rolls the staged paths back.
//! A successful install links `<root>/opt/<name>` to the new prefix.

use crate::backend::{EnvOverlay, Filesystem, ProcessRunner};
use crate::condition::{EnvFacts, Scope, holds};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::graph::PlannedFormula;
use crate::options;
use crate::postinstall::{self, PostInstall, ResolvedAction};
use crate::staging;
use crate::template::{self, Layout, Vars};
use crate::types::{
    BuildStep, Formula, InstallResult, Invocation, Patch, PostInstallWarning, StepRecord,
};
use crate::SourceProvider;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether a formula's install may run next to other installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationHint {
    /// Can share the machine with installs touching other paths.
    Shared,
    /// Must run with no other install in flight.
    Exclusive {
        /// Why.
        reason: String,
    },
}

impl SerializationHint {
    /// Whether the install must run alone.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive { .. })
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Run a subprocess in the source directory.
    Run(Invocation),
    /// Apply a patch to the source directory with `patch`.
    ApplyPatch(Patch),
    /// Append to a `VAR = value` assignment of a generated file.
    EditMakeVar {
        /// File to edit.
        file: PathBuf,
        /// Variable name.
        var: String,
        /// Appended text.
        append: String,
    },
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(invocation) => write!(f, "{invocation}"),
            Self::ApplyPatch(patch) => write!(f, "patch -p{} < {}", patch.strip, patch.url),
            Self::EditMakeVar { file, var, append } => {
                write!(f, "edit {}: {} += {}", file.display(), var, append)
            }
        }
    }
}

/// One rendered step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    /// Phase.
    pub step: BuildStep,
    /// What runs.
    pub action: StepAction,
    /// Environment overlay for this step.
    pub env: EnvOverlay,
}

/// A fully rendered build of one formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
    /// Formula name.
    pub formula: String,
    /// Version being built.
    pub version: String,
    /// Install prefix.
    pub prefix: PathBuf,
    /// Steps in execution order.
    pub steps: Vec<ScriptStep>,
    /// Overlay shared by all steps.
    pub env: EnvOverlay,
    /// Paths staged around the build.
    pub preserve: Vec<PathBuf>,
    /// Repair actions run after a successful install.
    pub post_install: Vec<ResolvedAction>,
    /// Rendered caveats.
    pub caveats: Option<String>,
}

/// Runs build scripts against the process and filesystem backends.
pub struct Executor {
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn Filesystem>,
    layout: Layout,
}

impl Executor {
    /// Create an executor.
    pub fn new(runner: Arc<dyn ProcessRunner>, fs: Arc<dyn Filesystem>, layout: Layout) -> Self {
        Self { runner, fs, layout }
    }

    /// The install layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Scheduling hint for a formula.
    pub fn serialization_hint(formula: &Formula) -> SerializationHint {
        if formula.build.deparallelize_install {
            SerializationHint::Exclusive {
                reason: format!("{} does not support parallel install", formula.name),
            }
        } else {
            SerializationHint::Shared
        }
    }

    /// Paths an install of this formula writes to.
    pub fn footprint(&self, planned: &PlannedFormula) -> Result<BTreeSet<PathBuf>> {
        let formula = &planned.formula;
        let version = formula.version_str()?;
        let vars = self.layout.vars(formula, version)?;

        let mut paths = BTreeSet::new();
        paths.insert(self.layout.prefix(&formula.name, version));
        paths.insert(self.layout.opt(&formula.name));
        if let Some(config) = vars.get("config_path") {
            paths.insert(PathBuf::from(config));
        }
        for path in &formula.preserve {
            paths.insert(template::render_path(path, &vars)?);
        }
        Ok(paths)
    }

    /// Resolve everything about a build without side effects.
    pub fn script(
        &self,
        planned: &PlannedFormula,
        facts: &EnvFacts,
        source_dir: &Path,
    ) -> Result<BuildScript> {
        let formula = &planned.formula;
        let version = formula.version_str()?;
        let vars = self.layout.vars(formula, version)?;
        let args = options::evaluate(formula, &planned.options, facts, &vars)?;
        let scope = Scope {
            options: &planned.options,
            facts,
            version,
        };
        let spec = &formula.build;

        let mut steps = Vec::new();
        let mut push = |step: BuildStep, action: StepAction, env: &EnvOverlay| {
            steps.push(ScriptStep {
                step,
                action,
                env: env.clone(),
            });
        };

        for patch in &spec.patches {
            if holds(patch.when.as_ref(), &scope) {
                push(BuildStep::Patch, StepAction::ApplyPatch(patch.clone()), &args.env);
            }
        }

        if facts.head {
            for invocation in &spec.prepare {
                push(BuildStep::Prepare, StepAction::Run(render(invocation, &vars)?), &args.env);
            }
        }

        let configure = Invocation {
            program: template::render(&spec.configure.program, &vars)?,
            args: args.configure.clone(),
        };
        push(BuildStep::Configure, StepAction::Run(configure), &args.env);

        for edit in &spec.make_var_edits {
            let action = StepAction::EditMakeVar {
                file: source_dir.join(template::render_path(&edit.file, &vars)?),
                var: edit.var.clone(),
                append: template::render(&edit.append, &vars)?,
            };
            push(BuildStep::Patch, action, &args.env);
        }

        for invocation in &spec.compile {
            push(BuildStep::Compile, StepAction::Run(render(invocation, &vars)?), &args.env);
        }

        let install_env = if spec.deparallelize_install {
            args.env.set("MAKEFLAGS", "-j1")
        } else {
            args.env.clone()
        };
        for invocation in &spec.install {
            push(BuildStep::Install, StepAction::Run(render(invocation, &vars)?), &install_env);
        }

        let preserve = formula
            .preserve
            .iter()
            .map(|p| template::render_path(p, &vars))
            .collect::<Result<Vec<_>>>()?;
        let post_install = postinstall::resolve(&formula.post_install, &scope, &vars, source_dir)?;
        let caveats = formula
            .caveats
            .as_deref()
            .map(|c| template::render(c, &vars))
            .transpose()?;

        Ok(BuildScript {
            formula: formula.name.clone(),
            version: version.to_string(),
            prefix: self.layout.prefix(&formula.name, version),
            steps,
            env: args.env,
            preserve,
            post_install,
            caveats,
        })
    }

    /// Build and install one formula from `source_dir`.
    ///
    /// Patch files are obtained from `sources` when their step runs.
    pub fn execute(
        &self,
        planned: &PlannedFormula,
        facts: &EnvFacts,
        source_dir: &Path,
        sources: &dyn SourceProvider,
        ctx: &mut RunContext<'_>,
    ) -> Result<InstallResult> {
        let script = self.script(planned, facts, source_dir)?;
        log::info!("Installing {} {}", script.formula, script.version);
        ctx.progress.on_formula_start(&script.formula, &script.version);

        let tx = staging::stage(self.fs.as_ref(), &script.preserve)?;

        let steps = match self.run_steps(&planned.formula, &script, source_dir, sources, ctx) {
            Ok(steps) => steps,
            Err(e) => return Err(tx.rollback(e)),
        };

        let mut warnings = Vec::new();
        if let Err(e) = tx.commit() {
            warnings.push(PostInstallWarning {
                action: "remove staged backups".to_string(),
                message: e.to_string(),
            });
        }

        let opt = self.layout.opt(&script.formula);
        match self.fs.symlink(&script.prefix, &opt, true) {
            Ok(()) => log::debug!("Linked {} -> {}", opt.display(), script.prefix.display()),
            Err(e) => warnings.push(PostInstallWarning {
                action: format!("link {}", opt.display()),
                message: e.to_string(),
            }),
        }

        let post = PostInstall {
            fs: self.fs.as_ref(),
            runner: self.runner.as_ref(),
            env: &script.env,
        };
        warnings.extend(post.run(&script.formula, &script.post_install));
        for warning in &warnings {
            ctx.progress.on_warning(&script.formula, warning);
        }

        let result = InstallResult {
            formula: script.formula,
            version: script.version,
            prefix: script.prefix,
            steps,
            warnings,
            caveats: script.caveats,
        };
        ctx.progress.on_formula_complete(&result);
        Ok(result)
    }

    fn run_steps(
        &self,
        formula: &Formula,
        script: &BuildScript,
        source_dir: &Path,
        sources: &dyn SourceProvider,
        ctx: &mut RunContext<'_>,
    ) -> Result<Vec<StepRecord>> {
        let mut records = Vec::with_capacity(script.steps.len());

        for step in &script.steps {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    formula: script.formula.clone(),
                    step: step.step,
                });
            }

            let command = step.action.to_string();
            log::info!("{}: {}", script.formula, step.step);
            log::debug!("{}: {}", script.formula, command);
            ctx.progress.on_step_start(&script.formula, step.step, &command);

            let failed = |exit_code: Option<i32>, stdout: String, stderr: String| Error::BuildStepFailed {
                formula: script.formula.clone(),
                step: step.step,
                command: command.clone(),
                exit_code,
                stdout,
                stderr,
            };

            let exit_code = match &step.action {
                StepAction::Run(invocation) => {
                    let output = self
                        .runner
                        .run(invocation, source_dir, &step.env)
                        .map_err(|e| failed(None, String::new(), e.to_string()))?;
                    if !output.success() {
                        return Err(failed(output.exit_code, output.stdout, output.stderr));
                    }
                    output.exit_code
                }
                StepAction::ApplyPatch(patch) => {
                    let file = sources.patch_file(formula, patch)?;
                    let invocation = Invocation {
                        program: "patch".to_string(),
                        args: vec![
                            format!("-p{}", patch.strip),
                            "-i".to_string(),
                            file.display().to_string(),
                        ],
                    };
                    let output = self
                        .runner
                        .run(&invocation, source_dir, &step.env)
                        .map_err(|e| failed(None, String::new(), e.to_string()))?;
                    if !output.success() {
                        return Err(failed(output.exit_code, output.stdout, output.stderr));
                    }
                    output.exit_code
                }
                StepAction::EditMakeVar { file, var, append } => {
                    self.edit_make_var(file, var, append)
                        .map_err(|message| failed(None, String::new(), message))?;
                    None
                }
            };

            ctx.progress.on_step_complete(&script.formula, step.step);
            records.push(StepRecord {
                step: step.step,
                command,
                exit_code,
            });
        }

        Ok(records)
    }

    fn edit_make_var(&self, file: &Path, var: &str, append: &str) -> std::result::Result<(), String> {
        let content = self
            .fs
            .read_to_string(file)
            .map_err(|e| format!("cannot read {}: {e}", file.display()))?;

        let pattern = Regex::new(&format!(r"(?m)^([ \t]*{}[ \t]*=)(.*)$", regex::escape(var)))
            .map_err(|e| e.to_string())?;
        if !pattern.is_match(&content) {
            return Err(format!("{var} is not assigned in {}", file.display()));
        }

        let edited = pattern.replace_all(&content, |caps: &Captures<'_>| {
            let value = caps[2].trim_end();
            if value.trim().is_empty() {
                format!("{} {append}", &caps[1])
            } else {
                format!("{}{value} {append}", &caps[1])
            }
        });

        self.fs
            .write(file, &edited)
            .map_err(|e| format!("cannot write {}: {e}", file.display()))
    }

    /// Run the formula's smoke test against its installed prefix.
    ///
    /// Returns `None` when the formula declares no test.
    pub fn run_test(&self, formula: &Formula) -> Result<Option<StepRecord>> {
        let Some(test) = &formula.test else {
            return Ok(None);
        };
        let version = formula.version_str()?;
        let vars = self.layout.vars(formula, version)?;
        let invocation = render(test, &vars)?;
        let prefix = self.layout.prefix(&formula.name, version);
        let command = invocation.to_string();
        log::debug!("{}: {}", formula.name, command);

        let failed = |exit_code: Option<i32>, stdout: String, stderr: String| Error::BuildStepFailed {
            formula: formula.name.clone(),
            step: BuildStep::Test,
            command: command.clone(),
            exit_code,
            stdout,
            stderr,
        };
        let output = self
            .runner
            .run(&invocation, &prefix, &EnvOverlay::new())
            .map_err(|e| failed(None, String::new(), e.to_string()))?;
        if !output.success() {
            return Err(failed(output.exit_code, output.stdout, output.stderr));
        }

        Ok(Some(StepRecord {
            step: BuildStep::Test,
            command,
            exit_code: output.exit_code,
        }))
    }
}

fn render(invocation: &Invocation, vars: &Vars) -> Result<Invocation> {
    Ok(Invocation {
        program: template::render(&invocation.program, vars)?,
        args: template::render_all(&invocation.args, vars)?,
    })
}
