pub mod config;
pub mod info;
pub mod install;
pub mod list;
pub mod plan;
pub mod test;

use anyhow::{Context as _, Result};
use formulakit::{Engine, EnvFacts, Layout, RegistrySnapshot};
use std::sync::Arc;

use crate::config::Config;
use crate::state::InstalledState;

/// Everything a command needs: config, formulas, receipts and the engine
pub struct Session {
    pub config: Config,
    pub formulas: RegistrySnapshot,
    pub state: InstalledState,
    pub engine: Engine,
}

impl Session {
    pub fn open() -> Result<Self> {
        let config = Config::load()?;
        let formulas = config.load_registry()?.snapshot();
        let state = InstalledState::load()?;
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let layout = Layout::new(config.prefix_path(), home);
        log::debug!(
            "{} formula(s), {} installed, prefix {}",
            formulas.len(),
            state.formulas.len(),
            config.prefix_path().display()
        );

        let engine = Engine::system(Arc::new(formulas.clone()), layout);
        Ok(Self {
            config,
            formulas,
            state,
            engine,
        })
    }

    /// Detected facts with config overrides and installed receipts applied
    pub fn facts(&self, head: bool) -> EnvFacts {
        self.config
            .apply_facts(EnvFacts::detect())
            .with_present(self.state.present())
            .with_head(head)
    }
}
