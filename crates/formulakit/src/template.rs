//! `{placeholder}` rendering for arguments, paths and caveats.
//!
//! Supported placeholders come from [`Layout::vars`]; `{opt:<name>}`
//! expands to the opt prefix of another formula. `{{` and `}}` produce
//! literal braces. Unknown placeholders are errors.

use crate::error::{Error, Result};
use crate::types::Formula;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Filesystem layout of an installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Install root (holds `Cellar/`, `opt/`, `etc/`, `var/`, `bin/`).
    pub root: PathBuf,
    /// The user's home directory.
    pub home: PathBuf,
}

impl Layout {
    /// Create a layout.
    pub fn new(root: impl AsRef<Path>, home: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            home: home.as_ref().to_path_buf(),
        }
    }

    /// Versioned install prefix of a formula.
    pub fn prefix(&self, name: &str, version: &str) -> PathBuf {
        self.root.join("Cellar").join(name).join(version)
    }

    /// Stable opt prefix of a formula.
    pub fn opt(&self, name: &str) -> PathBuf {
        self.root.join("opt").join(name)
    }

    /// Shared configuration root.
    pub fn etc(&self) -> PathBuf {
        self.root.join("etc")
    }

    /// Shared state root.
    pub fn var(&self) -> PathBuf {
        self.root.join("var")
    }

    /// Placeholder values for one formula version.
    pub fn vars(&self, formula: &Formula, version: &str) -> Result<Vars> {
        let prefix = self.prefix(&formula.name, version);
        let mut vars = Vars::new(self.root.join("opt"));
        vars.set("name", &formula.name);
        vars.set("version", version);
        vars.set_path("root", &self.root);
        vars.set_path("home", &self.home);
        vars.set_path("bin", &prefix.join("bin"));
        vars.set_path("sbin", &prefix.join("sbin"));
        vars.set_path("lib", &prefix.join("lib"));
        vars.set_path("include", &prefix.join("include"));
        vars.set_path("share", &prefix.join("share"));
        vars.set_path("man", &prefix.join("share").join("man"));
        vars.set_path("etc", &self.etc());
        vars.set_path("var", &self.var());
        vars.set_path("opt_prefix", &self.opt(&formula.name));
        vars.set_path("prefix", &prefix);

        let config_path = render(&formula.config_path, &vars)?;
        vars.set("config_path", config_path);
        Ok(vars)
    }
}

/// Placeholder values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars {
    values: BTreeMap<String, String>,
    opt_root: PathBuf,
}

impl Vars {
    /// Create an empty set; `{opt:<name>}` resolves under `opt_root`.
    pub fn new(opt_root: impl AsRef<Path>) -> Self {
        Self {
            values: BTreeMap::new(),
            opt_root: opt_root.as_ref().to_path_buf(),
        }
    }

    /// Set a value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Set a path value.
    pub fn set_path(&mut self, key: &str, path: &Path) {
        self.set(key, path.to_string_lossy());
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A copy with one extra value.
    pub fn with(&self, key: &str, value: impl Into<String>) -> Self {
        let mut vars = self.clone();
        vars.set(key, value);
        vars
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(name) = key.strip_prefix("opt:") {
            if name.is_empty() {
                return None;
            }
            return Some(self.opt_root.join(name).to_string_lossy().to_string());
        }
        self.values.get(key).cloned()
    }
}

/// Render a template.
pub fn render(template: &str, vars: &Vars) -> Result<String> {
    let error = |message: String| Error::Template {
        template: template.to_string(),
        message,
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(error("unclosed '{'".into()));
                }
                let value = vars
                    .lookup(key.trim())
                    .ok_or_else(|| error(format!("unknown placeholder '{{{key}}}'")))?;
                out.push_str(&value);
            }
            '}' => return Err(error("unmatched '}'".into())),
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Render every template in a list.
pub fn render_all(templates: &[String], vars: &Vars) -> Result<Vec<String>> {
    templates.iter().map(|t| render(t, vars)).collect()
}

/// Render a path template.
pub fn render_path(template: &str, vars: &Vars) -> Result<PathBuf> {
    render(template, vars).map(PathBuf::from)
}
