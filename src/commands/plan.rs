use anyhow::Result;
use colored::Colorize;
use formulakit::backend::EnvVar;
use formulakit::types::EnvMode;
use formulakit::{BuildScript, InstallPlan, SerializationHint};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::Session;
use crate::cli::PlanArgs;
use crate::ui;
use crate::Context;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open()?;
    let facts = session.facts(args.options.head);
    let plan = session
        .engine
        .plan(&args.name, &args.options.requested(), &facts)?;
    let scripts = session.engine.preview(&plan, Path::new("."))?;
    let hint = session.engine.serialization_hint(&plan);

    if args.json {
        let view = PlanView::new(&plan, &scripts, &hint);
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    show_plan(&plan);
    if let SerializationHint::Exclusive { reason } = &hint {
        println!();
        ui::info(&format!("Runs alone: {reason}"));
    }
    if !ctx.quiet {
        show_scripts(&scripts);
    }
    Ok(())
}

/// Print the entries of a plan in install order
pub fn show_plan(plan: &InstallPlan) {
    let title = match plan.target_entry() {
        Some(target) if plan.is_head_build(target) => format!("{} (HEAD)", plan.target),
        Some(target) => format!(
            "{} {}",
            plan.target,
            target.formula.version.as_deref().unwrap_or("?")
        ),
        None => plan.target.clone(),
    };
    ui::header(&format!("Install plan for {title}"));
    for (i, entry) in plan.entries.iter().enumerate() {
        let version = if plan.is_head_build(entry) {
            "HEAD"
        } else {
            entry.formula.version.as_deref().unwrap_or("?")
        };
        let mut line = format!("{} {}", entry.name().bold(), version);
        if entry.build_only {
            line.push_str(&format!(" {}", "(build)".dimmed()));
        }
        let installed = entry.present && entry.name() != plan.target;
        if installed {
            line.push_str(&format!(" {}", "already installed".green()));
        }
        ui::step(i + 1, plan.len(), &line);

        let options: Vec<String> = entry
            .options
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if !options.is_empty() && !installed {
            ui::dim(&options.join(" "));
        }
    }
}

/// Print rendered steps and environment of build scripts
pub fn show_scripts(scripts: &[BuildScript]) {
    for script in scripts {
        ui::section(&format!("{} {}", script.formula, script.version));
        ui::kv("prefix", &script.prefix.display().to_string());
        for var in script.env.vars() {
            ui::kv("env", &describe_env(var));
        }
        for step in &script.steps {
            println!("  {} {}", format!("{:>9}", step.step.to_string()).blue(), step.action);
            for var in step.env.vars().iter().skip(script.env.vars().len()) {
                ui::dim(&format!("          {}", describe_env(var)));
            }
        }
        if !script.preserve.is_empty() {
            let preserved: Vec<String> = script
                .preserve
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            ui::kv("staged", &preserved.join(", "));
        }
        for action in &script.post_install {
            ui::kv("post-install", &action.label());
        }
    }
}

/// Render an overlay entry as it will apply to the inherited environment
pub fn describe_env(var: &EnvVar) -> String {
    match var.mode {
        EnvMode::Set => format!("{}={}", var.name, var.value),
        EnvMode::Prepend => format!("{}={}{}${}", var.name, var.value, var.separator, var.name),
        EnvMode::Append => format!("{}=${}{}{}", var.name, var.name, var.separator, var.value),
    }
}

// ============================================================================
// JSON Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub target: String,
    pub exclusive: Option<String>,
    pub entries: Vec<EntryView>,
    pub scripts: Vec<ScriptView>,
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub name: String,
    pub version: Option<String>,
    pub build_only: bool,
    pub present: bool,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ScriptView {
    pub formula: String,
    pub version: String,
    pub prefix: String,
    pub env: Vec<String>,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Serialize)]
pub struct StepView {
    pub step: String,
    pub command: String,
    pub env: Vec<String>,
}

impl PlanView {
    pub fn new(plan: &InstallPlan, scripts: &[BuildScript], hint: &SerializationHint) -> Self {
        let entries = plan
            .entries
            .iter()
            .map(|entry| EntryView {
                name: entry.name().to_string(),
                version: entry.formula.version.clone(),
                build_only: entry.build_only,
                present: entry.present,
                options: entry
                    .options
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect();

        let scripts = scripts
            .iter()
            .map(|script| ScriptView {
                formula: script.formula.clone(),
                version: script.version.clone(),
                prefix: script.prefix.display().to_string(),
                env: script.env.vars().iter().map(describe_env).collect(),
                steps: script
                    .steps
                    .iter()
                    .map(|step| StepView {
                        step: step.step.to_string(),
                        command: step.action.to_string(),
                        env: step.env.vars().iter().map(describe_env).collect(),
                    })
                    .collect(),
            })
            .collect();

        let exclusive = match hint {
            SerializationHint::Exclusive { reason } => Some(reason.clone()),
            SerializationHint::Shared => None,
        };

        Self {
            target: plan.target.clone(),
            exclusive,
            entries,
            scripts,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
