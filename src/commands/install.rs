use anyhow::Result;
use formulakit::context::{
    AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, ProgressCallback, RunContext,
};
use formulakit::scheduler::{self, JobSpec};
use formulakit::{
    BuildStep, Engine, FixedSource, InstallPlan, InstallResult, PostInstallWarning, SourceProvider,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use super::plan::{show_plan, show_scripts};
use super::Session;
use crate::cli::InstallArgs;
use crate::fetch::CacheSource;
use crate::progress::{LineProgress, SpinnerProgress};
use crate::ui;
use crate::Context;

/// What one plan produced: the formulas it installed, and how it ended
type Outcome = (Vec<InstallResult>, formulakit::Result<()>);

pub fn run(ctx: &Context, args: InstallArgs) -> Result<()> {
    let mut session = Session::open()?;
    let head = args.options.head;
    let requested = args.options.requested();
    let facts = session.facts(head);

    let mut plans = Vec::with_capacity(args.names.len());
    for name in &args.names {
        plans.push(session.engine.plan(name, &requested, &facts)?);
    }
    let specs = job_specs(&session.engine, &mut plans)?;

    if args.dry_run {
        let source_dir = args.source_dir.as_deref().unwrap_or(Path::new("."));
        for plan in &plans {
            show_plan(plan);
            show_scripts(&session.engine.preview(plan, source_dir)?);
        }
        return Ok(());
    }

    let total: usize = plans.iter().map(|p| p.pending().count()).sum();
    if !ctx.quiet {
        for plan in &plans {
            show_plan(plan);
        }
        println!();
    }

    let interactive = io::stdin().is_terminal();
    let mut confirm = confirmer(args.yes, interactive);
    if !confirm.confirm(&format!("Build and install {total} formula(s)?"))? {
        ui::info("Nothing installed.");
        if !interactive {
            ui::dim("stdin is not a terminal; pass --yes to install without a prompt");
        }
        return Ok(());
    }

    let sources: Box<dyn SourceProvider> = match &args.source_dir {
        Some(dir) => Box::new(FixedSource::new(dir)),
        None => Box::new(CacheSource::new(session.config.cache_path()?)),
    };

    let jobs = args.jobs.unwrap_or_else(|| session.config.jobs()).max(1);
    let cancel = CancelToken::new();
    let outcomes: Vec<Option<Outcome>> = if jobs == 1 || plans.len() == 1 {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in &plans {
            if cancel.is_cancelled() {
                outcomes.push(None);
                continue;
            }
            let outcome = install_one(
                &session.engine,
                plan,
                sources.as_ref(),
                &cancel,
                SpinnerProgress::new(ctx.quiet),
            );
            if outcome.1.is_err() {
                cancel.cancel();
            }
            outcomes.push(Some(outcome));
        }
        outcomes
    } else {
        let batches = scheduler::schedule(&specs);
        log::info!(
            "Running {} plan(s) in {} batch(es) on {} thread(s)",
            plans.len(),
            batches.len(),
            jobs
        );
        scheduler::run_batches(&plans, &batches, jobs, |plan| {
            if cancel.is_cancelled() {
                return None;
            }
            let outcome = install_one(
                &session.engine,
                plan,
                sources.as_ref(),
                &cancel,
                LineProgress::new(ctx.quiet),
            );
            if outcome.1.is_err() {
                cancel.cancel();
            }
            Some(outcome)
        })?
    };

    let mut installed = Vec::new();
    let mut first_error = None;
    for (plan, outcome) in plans.iter().zip(outcomes) {
        let Some((results, status)) = outcome else {
            ui::warn(&format!("Skipped {} after an earlier failure", plan.target));
            continue;
        };
        for result in results {
            let entry = plan.get(&result.formula);
            let head_build = entry.is_some_and(|e| plan.is_head_build(e));
            session.state.record(&result, entry, head_build);
            installed.push(result);
        }
        if let Err(e) = status {
            if first_error.is_some() {
                ui::fatal(&e);
            } else {
                first_error = Some(e);
            }
        }
    }
    if !installed.is_empty() {
        session.state.save()?;
    }

    summarize(&installed, ctx.quiet);
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// How the install prompt is answered: `--yes` accepts, a non-terminal stdin declines
fn confirmer(yes: bool, interactive: bool) -> Box<dyn ConfirmCallback> {
    if yes {
        Box::new(AutoConfirm)
    } else if interactive {
        Box::new(PromptConfirm)
    } else {
        Box::new(AutoDecline)
    }
}

fn install_one<P: ProgressCallback>(
    engine: &Engine,
    plan: &InstallPlan,
    sources: &dyn SourceProvider,
    cancel: &CancelToken,
    progress: P,
) -> Outcome {
    let mut collecting = Collecting::new(progress);
    let status = {
        let mut run_ctx = RunContext::new(cancel.clone(), &mut collecting);
        engine.install(plan, sources, &mut run_ctx).map(|_| ())
    };
    (collecting.results, status)
}

fn summarize(installed: &[InstallResult], quiet: bool) {
    for result in installed {
        if let Some(caveats) = &result.caveats {
            ui::section(&format!("{}: caveats", result.formula));
            for line in caveats.lines() {
                println!("  {line}");
            }
        }
    }

    let warnings: usize = installed.iter().map(|r| r.warnings.len()).sum();
    if warnings > 0 {
        println!();
        ui::warn(&format!(
            "{warnings} post-install warning(s); the installs themselves succeeded"
        ));
    }
    if !quiet && !installed.is_empty() {
        println!();
        ui::success(&format!("{} formula(s) installed", installed.len()));
    }
}

/// Turn plans into scheduler jobs.
///
/// A formula pending in more than one plan is installed by the first plan
/// only: later plans treat it as present and carry its paths in their
/// footprint, so they are scheduled after the plan that installs it.
/// Plans whose target is already installed by an earlier plan are dropped.
pub fn job_specs(engine: &Engine, plans: &mut Vec<InstallPlan>) -> formulakit::Result<Vec<JobSpec>> {
    let mut claimed: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
    let mut kept = Vec::with_capacity(plans.len());
    let mut specs = Vec::with_capacity(plans.len());

    for mut plan in plans.drain(..) {
        if claimed.contains_key(&plan.target) {
            log::info!("{} is already part of an earlier plan", plan.target);
            continue;
        }

        let mut shared = BTreeSet::new();
        for entry in &mut plan.entries {
            if entry.present {
                continue;
            }
            if let Some(paths) = claimed.get(entry.name()) {
                entry.present = true;
                plan.facts.present.insert(entry.name().to_string());
                shared.extend(paths.iter().cloned());
            }
        }

        for entry in plan.pending() {
            claimed.insert(entry.name().to_string(), engine.executor().footprint(entry)?);
        }

        let mut footprint = engine.footprint(&plan)?;
        footprint.extend(shared);
        specs.push(JobSpec {
            hint: engine.serialization_hint(&plan),
            footprint,
        });
        kept.push(plan);
    }

    *plans = kept;
    Ok(specs)
}

/// Forwards progress and keeps every finished install
struct Collecting<P> {
    inner: P,
    results: Vec<InstallResult>,
}

impl<P: ProgressCallback> Collecting<P> {
    fn new(inner: P) -> Self {
        Self {
            inner,
            results: Vec::new(),
        }
    }
}

impl<P: ProgressCallback> ProgressCallback for Collecting<P> {
    fn on_formula_start(&mut self, formula: &str, version: &str) {
        self.inner.on_formula_start(formula, version);
    }

    fn on_step_start(&mut self, formula: &str, step: BuildStep, command: &str) {
        self.inner.on_step_start(formula, step, command);
    }

    fn on_step_complete(&mut self, formula: &str, step: BuildStep) {
        self.inner.on_step_complete(formula, step);
    }

    fn on_warning(&mut self, formula: &str, warning: &PostInstallWarning) {
        self.inner.on_warning(formula, warning);
    }

    fn on_formula_complete(&mut self, result: &InstallResult) {
        self.inner.on_formula_complete(result);
        self.results.push(result.clone());
    }
}

/// Asks on the terminal
struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(io::Error::other)
    }
}

// ============================================================================
// Tests
// ============================================================================
