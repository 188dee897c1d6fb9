//! Formula registry and read-only snapshots.
//!
//! A [`Registry`] is filled once at startup (from code or `*.toml` files).
//! Each install run then works against a [`RegistrySnapshot`], which never
//! sees formulas registered after it was taken.

use crate::error::{Error, Result};
use crate::types::Formula;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Read-only formula lookup used by plan computation.
pub trait Catalog: Send + Sync {
    /// Find a formula by exact name.
    fn lookup(&self, name: &str) -> Result<Arc<Formula>>;

    /// All formulas whose name matches `pattern`, sorted by name.
    fn all_matching(&self, pattern: &Regex) -> Vec<Arc<Formula>>;
}

/// Mutable catalog of known formulas.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    formulas: BTreeMap<String, Arc<Formula>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a formula. A formula with the same name is replaced.
    pub fn register(&mut self, formula: Formula) -> Result<()> {
        formula.validate()?;
        if self.formulas.contains_key(&formula.name) {
            log::debug!("Replacing formula {}", formula.name);
        }
        self.formulas.insert(formula.name.clone(), Arc::new(formula));
        Ok(())
    }

    /// Load one formula file and register it. Returns the formula name.
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let formula = parse_formula(&content, &path.display().to_string())?;
        let name = formula.name.clone();
        self.register(formula)?;
        log::trace!("Loaded formula {} from {}", name, path.display());
        Ok(name)
    }

    /// Load every `*.toml` file of a directory, in file name order.
    ///
    /// A missing directory loads nothing. Returns the number of formulas loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            log::debug!("Formula directory {} does not exist", dir.display());
            return Ok(0);
        }

        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(|e| Error::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        for file in &files {
            self.load_file(file)?;
        }
        log::debug!("Loaded {} formula(s) from {}", files.len(), dir.display());
        Ok(files.len())
    }

    /// Number of registered formulas.
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// Take a read-only snapshot for one run.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            formulas: Arc::new(self.formulas.clone()),
        }
    }
}

/// Parse a formula definition from TOML text; `origin` names it in errors.
pub fn parse_formula(content: &str, origin: &str) -> Result<Formula> {
    toml::from_str(content).map_err(|e| Error::InvalidFormula {
        name: origin.to_string(),
        message: e.to_string(),
    })
}

/// Immutable view of a registry, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    formulas: Arc<BTreeMap<String, Arc<Formula>>>,
}

impl RegistrySnapshot {
    /// All formulas, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Formula>> {
        self.formulas.values()
    }

    /// Number of formulas.
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}

impl Catalog for RegistrySnapshot {
    fn lookup(&self, name: &str) -> Result<Arc<Formula>> {
        self.formulas
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    fn all_matching(&self, pattern: &Regex) -> Vec<Arc<Formula>> {
        self.formulas
            .values()
            .filter(|f| pattern.is_match(&f.name))
            .cloned()
            .collect()
    }
}
