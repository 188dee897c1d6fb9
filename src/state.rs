use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use formulakit::graph::PlannedFormula;
use formulakit::InstallResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::paths;

// ============================================================================
// State Structures
// ============================================================================

/// Install receipts; the names in here are what counts as "present"
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InstalledState {
    /// Receipt per formula name
    #[serde(default)]
    pub formulas: BTreeMap<String, Receipt>,

    /// Last time the state was updated
    pub last_updated: Option<DateTime<Utc>>,
}

/// What was installed, how, and when
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Receipt {
    pub version: String,

    pub prefix: String,

    /// Option values the formula was built with
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub head: bool,

    /// Only installed to build something else
    #[serde(default)]
    pub build_only: bool,

    pub installed_at: DateTime<Utc>,
}

// ============================================================================
// InstalledState Implementation
// ============================================================================

impl InstalledState {
    /// Load receipts from the state dir
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::state_file()?)
    }

    /// Load receipts from a file, or empty state if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: InstalledState = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Save receipts to the state dir
    pub fn save(&self) -> Result<()> {
        self.save_to(&paths::state_file()?)
    }

    /// Save receipts to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(&self).context("Failed to serialize state to TOML")?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Names of installed formulas
    pub fn present(&self) -> BTreeSet<String> {
        self.formulas.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&Receipt> {
        self.formulas.get(name)
    }

    /// Record a successful install, replacing any earlier receipt
    pub fn record(&mut self, result: &InstallResult, planned: Option<&PlannedFormula>, head: bool) {
        let (options, build_only) = match planned {
            Some(entry) => (
                entry
                    .options
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                entry.build_only,
            ),
            None => (BTreeMap::new(), false),
        };

        let now = Utc::now();
        self.formulas.insert(
            result.formula.clone(),
            Receipt {
                version: result.version.clone(),
                prefix: result.prefix.display().to_string(),
                options,
                head,
                build_only,
                installed_at: now,
            },
        );
        self.last_updated = Some(now);
    }
}

// ============================================================================
// Tests
// ============================================================================
