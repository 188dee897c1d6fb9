//! User configuration (`config.toml`)
//!
//! ```toml
//! prefix = "~/.formulary"
//! formula_dirs = ["~/dotfiles/formulas"]
//! cache_dir = "~/.cache/formulary"
//! jobs = 2
//!
//! [facts]
//! os_version = "10.12"
//! ```

use anyhow::{Context, Result};
use formulakit::{EnvFacts, Registry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// Default install root
pub const DEFAULT_PREFIX: &str = "~/.formulary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Install root; formulas land in `<prefix>/Cellar/<name>/<version>`
    pub prefix: String,

    /// Directories holding `*.toml` formulas, searched in order
    pub formula_dirs: Vec<String>,

    /// Download and build cache
    pub cache_dir: Option<String>,

    /// Concurrent independent installs
    pub jobs: usize,

    /// Overrides for detected environment facts
    pub facts: FactOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            formula_dirs: Vec::new(),
            cache_dir: None,
            jobs: 1,
            facts: FactOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactOverrides {
    pub os_version: Option<String>,
    pub arch: Option<String>,
}

impl Config {
    /// Load the config file, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    /// Load a specific config file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Expanded install root
    pub fn prefix_path(&self) -> PathBuf {
        paths::expand(&self.prefix)
    }

    /// Expanded formula directories; the config dir's `formulas/` when none are set
    pub fn formula_paths(&self) -> Result<Vec<PathBuf>> {
        if self.formula_dirs.is_empty() {
            return Ok(vec![paths::formulas_dir()?]);
        }
        Ok(self.formula_dirs.iter().map(|d| paths::expand(d)).collect())
    }

    /// Expanded cache directory
    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::cache_dir(),
        }
    }

    /// Concurrent installs, never zero
    pub fn jobs(&self) -> usize {
        self.jobs.max(1)
    }

    /// Apply the `[facts]` overrides to detected facts
    pub fn apply_facts(&self, mut facts: EnvFacts) -> EnvFacts {
        if let Some(version) = &self.facts.os_version {
            facts.os_version = Some(version.clone());
        }
        if let Some(arch) = &self.facts.arch {
            facts.arch = arch.clone();
        }
        facts
    }

    /// Load every formula directory into a registry.
    ///
    /// Later directories override formulas of the same name.
    pub fn load_registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        for dir in self.formula_paths()? {
            let count = registry
                .load_dir(&dir)
                .with_context(|| format!("Failed to load formulas from {}", dir.display()))?;
            log::debug!("{} formula(s) in {}", count, dir.display());
        }
        Ok(registry)
    }
}

// ============================================================================
// Tests
// ============================================================================
