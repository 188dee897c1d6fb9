use anyhow::Result;
use colored::Colorize;
use formulakit::template;
use formulakit::types::OptionDecl;
use formulakit::{Catalog, Formula};
use serde::Serialize;

use super::Session;
use crate::state::Receipt;
use crate::ui;
use crate::Context;

#[derive(Serialize)]
struct InfoView<'a> {
    #[serde(flatten)]
    formula: &'a Formula,
    installed: Option<&'a Receipt>,
}

pub fn run(_ctx: &Context, name: &str, json: bool) -> Result<()> {
    let session = Session::open()?;
    let formula = session.formulas.lookup(name)?;
    let receipt = session.state.get(name);

    if json {
        let view = InfoView {
            formula: formula.as_ref(),
            installed: receipt,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let version = formula.version.as_deref().unwrap_or("(no version)");
    ui::header(&format!("{} {}", formula.name, version));
    if !formula.desc.is_empty() {
        println!("{}", formula.desc);
    }
    if let Some(homepage) = &formula.homepage {
        ui::kv("homepage", homepage);
    }
    if let Some(url) = &formula.url {
        ui::kv("source", url);
    }
    if let Some(head) = &formula.head {
        ui::kv("head", head);
    }

    match receipt {
        Some(r) => ui::kv(
            "installed",
            &format!(
                "{} ({})",
                r.version,
                r.installed_at.format("%Y-%m-%d %H:%M UTC")
            ),
        ),
        None => ui::kv("installed", &"no".dimmed().to_string()),
    }

    show_dependencies(&formula);
    show_options(&formula);

    if !formula.conflicts.is_empty() || formula.family.is_some() {
        ui::section("Conflicts");
        for conflict in &formula.conflicts {
            ui::kv(&conflict.name, &conflict.reason);
        }
        if let Some(family) = &formula.family {
            ui::kv(&format!("/{}/", family.pattern), &family.reason);
        }
    }

    if let (Some(caveats), Some(version)) = (&formula.caveats, formula.version.as_deref()) {
        let vars = session.engine.executor().layout().vars(&formula, version)?;
        ui::section("Caveats");
        for line in template::render(caveats, &vars)?.lines() {
            println!("  {line}");
        }
    }

    Ok(())
}

fn show_dependencies(formula: &Formula) {
    if formula.dependencies.is_empty() {
        return;
    }
    ui::section("Dependencies");
    for dep in &formula.dependencies {
        let mut tags = Vec::new();
        if dep.build {
            tags.push("build");
        }
        if dep.optional {
            tags.push("optional");
        }
        if dep.when.is_some() {
            tags.push("conditional");
        }
        if tags.is_empty() {
            println!("  {}", dep.name);
        } else {
            println!("  {} {}", dep.name, format!("({})", tags.join(", ")).dimmed());
        }
    }
}

fn show_options(formula: &Formula) {
    let options = formula.effective_options();
    if options.is_empty() {
        return;
    }
    ui::section("Options");
    for option in &options {
        println!("  {}", option_usage(option).bold());
        if !option.description.is_empty() {
            ui::dim(&option.description);
        }
    }
}

/// How to set an option on the command line
fn option_usage(option: &OptionDecl) -> String {
    if option.is_choice() {
        format!(
            "--option {}=<{}> (default {})",
            option.name,
            option.choices.join("|"),
            option.default
        )
    } else if option.default.is_enabled() {
        format!("--without {}", option.name)
    } else {
        format!("--with {}", option.name)
    }
}
