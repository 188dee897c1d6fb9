//! Terminal progress reporting for installs.
//!
//! [`SpinnerProgress`] drives an indicatif spinner for a single install;
//! [`LineProgress`] prints plain lines and is safe to use from several
//! installs running at once.

use formulakit::context::ProgressCallback;
use formulakit::{BuildStep, InstallResult, PostInstallWarning};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Single-install spinner
pub struct SpinnerProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl SpinnerProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, msg: String) {
        match &self.bar {
            Some(bar) => bar.println(msg),
            None => println!("{msg}"),
        }
    }
}

impl ProgressCallback for SpinnerProgress {
    fn on_formula_start(&mut self, formula: &str, version: &str) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_prefix(format!("{formula} {version}"));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn on_step_start(&mut self, _formula: &str, step: BuildStep, command: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{step}: {command}"));
        }
    }

    fn on_step_complete(&mut self, _formula: &str, step: BuildStep) {
        if !self.quiet {
            self.println(format!("  ✓ {step}"));
        }
    }

    fn on_warning(&mut self, formula: &str, warning: &PostInstallWarning) {
        let msg = format!("{formula}: {warning}");
        match &self.bar {
            Some(bar) => bar.suspend(|| ui::warn(&msg)),
            None => ui::warn(&msg),
        }
    }

    fn on_formula_complete(&mut self, result: &InstallResult) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        if !self.quiet {
            ui::success(&format!("Installed {} {}", result.formula, result.version));
        }
    }
}

impl Drop for SpinnerProgress {
    fn drop(&mut self) {
        // A failed install never reaches on_formula_complete
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

/// Line-per-event reporting for concurrent installs
pub struct LineProgress {
    quiet: bool,
}

impl LineProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressCallback for LineProgress {
    fn on_formula_start(&mut self, formula: &str, version: &str) {
        if !self.quiet {
            ui::info(&format!("Building {formula} {version}"));
        }
    }

    fn on_step_start(&mut self, formula: &str, step: BuildStep, command: &str) {
        log::info!("{formula}: {step}: {command}");
    }

    fn on_step_complete(&mut self, formula: &str, step: BuildStep) {
        if !self.quiet {
            ui::dim(&format!("{formula}: {step} done"));
        }
    }

    fn on_warning(&mut self, formula: &str, warning: &PostInstallWarning) {
        ui::warn(&format!("{formula}: {warning}"));
    }

    fn on_formula_complete(&mut self, result: &InstallResult) {
        if !self.quiet {
            ui::success(&format!("Installed {} {}", result.formula, result.version));
        }
    }
}
