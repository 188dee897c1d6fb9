use anyhow::{bail, Result};

use crate::cli::ConfigCommand;
use crate::config::Config;
use crate::paths;
use crate::ui;
use crate::Context;

pub fn run(_ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(),
        ConfigCommand::Path => path(),
        ConfigCommand::Validate => validate(),
    }
}

fn show() -> Result<()> {
    let file = paths::config_file()?;
    let config = Config::load_from(&file)?;

    ui::header("Configuration");
    let source = if file.exists() {
        file.display().to_string()
    } else {
        format!("{} (not found, using defaults)", file.display())
    };
    ui::kv("file", &source);
    ui::kv("prefix", &config.prefix_path().display().to_string());
    ui::kv("cache", &config.cache_path()?.display().to_string());
    ui::kv("jobs", &config.jobs().to_string());
    for dir in config.formula_paths()? {
        ui::kv("formulas", &dir.display().to_string());
    }
    ui::kv("state", &paths::state_file()?.display().to_string());

    if let Some(version) = &config.facts.os_version {
        ui::kv("os_version", version);
    }
    if let Some(arch) = &config.facts.arch {
        ui::kv("arch", arch);
    }
    Ok(())
}

fn path() -> Result<()> {
    println!("{}", paths::config_file()?.display());
    Ok(())
}

fn validate() -> Result<()> {
    ui::header("Validating Configuration");

    let config = match Config::load() {
        Ok(config) => {
            ui::success("config.toml");
            config
        }
        Err(e) => {
            ui::error(&format!("config.toml: {e:#}"));
            bail!("configuration is invalid");
        }
    };

    let mut all_valid = true;
    for dir in config.formula_paths()? {
        if !dir.is_dir() {
            ui::warn(&format!("{} does not exist", dir.display()));
            continue;
        }
        let mut registry = formulakit::Registry::new();
        match registry.load_dir(&dir) {
            Ok(count) => ui::success(&format!("{} ({count} formulas)", dir.display())),
            Err(e) => {
                ui::error(&format!("{}: {e}", dir.display()));
                all_valid = false;
            }
        }
    }

    println!();
    if !all_valid {
        bail!("some formulas are invalid");
    }
    ui::success("All configuration files are valid!");
    Ok(())
}
