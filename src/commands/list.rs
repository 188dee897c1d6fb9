use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::ui;
use crate::Context;

pub fn run(ctx: &Context, installed_only: bool) -> Result<()> {
    let session = Session::open()?;

    if installed_only {
        if session.state.formulas.is_empty() {
            if !ctx.quiet {
                ui::info("No formulas installed.");
            }
            return Ok(());
        }
        ui::header("Installed");
        for (name, receipt) in &session.state.formulas {
            let mut line = format!("{} {}", name.bold(), receipt.version);
            if receipt.head {
                line.push_str(&format!(" {}", "HEAD".yellow()));
            }
            if receipt.build_only {
                line.push_str(&format!(" {}", "(build)".dimmed()));
            }
            println!("  {line}");
            ui::dim(&format!(
                "installed {}",
                receipt.installed_at.format("%Y-%m-%d %H:%M UTC")
            ));
            if ctx.verbose > 0 {
                let options: Vec<String> = receipt
                    .options
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                ui::dim(&format!("options {}", ui::list_or_dash(&options)));
                ui::dim(&format!("prefix {}", receipt.prefix));
            }
        }
        return Ok(());
    }

    if session.formulas.is_empty() {
        ui::warn("No formulas found.");
        for dir in session.config.formula_paths()? {
            ui::dim(&format!("searched {}", dir.display()));
        }
        return Ok(());
    }

    ui::header(&format!("Formulas ({})", session.formulas.len()));
    for formula in session.formulas.iter() {
        let marker = if session.state.get(&formula.name).is_some() {
            "✓".green().to_string()
        } else {
            " ".to_string()
        };
        let version = formula.version.as_deref().unwrap_or("-");
        println!(
            "{} {:<20} {:<12} {}",
            marker,
            formula.name,
            version,
            formula.desc.dimmed()
        );
    }
    Ok(())
}
