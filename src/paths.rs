//! Centralized path resolution for formulary
//!
//! # Environment Variables
//!
//! - `FORMULARY_CONFIG_DIR` - Override config directory
//! - `FORMULARY_STATE_DIR` - Override state directory (install receipts)
//! - `FORMULARY_CACHE_DIR` - Override download/build cache directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `FORMULARY_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/formulary` (if set)
//! 3. `~/.config/formulary`
//!
//! For state_dir():
//! 1. `FORMULARY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/formulary` (if set)
//! 3. `~/.local/state/formulary`
//!
//! For cache_dir():
//! 1. `FORMULARY_CACHE_DIR` environment variable
//! 2. Platform cache directory (`~/.cache/formulary`, `~/Library/Caches/formulary`)

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "FORMULARY_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "FORMULARY_STATE_DIR";

/// Environment variable for cache directory override
pub const ENV_CACHE_DIR: &str = "FORMULARY_CACHE_DIR";

const APP: &str = "formulary";

/// Get the formulary config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the formulary state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Get the default cache directory (downloads and unpacked sources)
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
        let path = expand(&dir);
        log::debug!("Using cache dir from {}: {}", ENV_CACHE_DIR, path.display());
        return Ok(path);
    }

    let base = dirs::cache_dir().context("Could not determine cache directory")?;
    Ok(base.join(APP))
}

/// Path of the main config file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Default directory searched for `*.toml` formulas
pub fn formulas_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("formulas"))
}

/// Path of the install receipts file
pub fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.toml"))
}

/// Expand ~ and environment variables in a path string.
///
/// All modules should use this instead of calling shellexpand directly.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Run `f` with `key` temporarily set.
    ///
    /// Each env var is only touched by one test, so tests running on other
    /// threads never observe the temporary value.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: no other test reads or writes this variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/formulary/config", || {
            assert_eq!(
                config_dir().unwrap(),
                PathBuf::from("/custom/formulary/config")
            );
            assert_eq!(
                config_file().unwrap(),
                PathBuf::from("/custom/formulary/config/config.toml")
            );
            assert_eq!(
                formulas_dir().unwrap(),
                PathBuf::from("/custom/formulary/config/formulas")
            );
        });
    }

    #[test]
    fn test_state_dir_env_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_STATE_DIR, "~/formulary-state-test", || {
            assert_eq!(state_dir().unwrap(), home.join("formulary-state-test"));
            assert_eq!(
                state_file().unwrap(),
                home.join("formulary-state-test").join("state.toml")
            );
        });
    }

    #[test]
    fn test_cache_dir_env_override() {
        with_env_var(ENV_CACHE_DIR, "/var/cache/fx", || {
            assert_eq!(cache_dir().unwrap(), PathBuf::from("/var/cache/fx"));
        });
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/formulas"), home.join("formulas"));
        assert_eq!(expand("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_expand_unknown_variable_is_kept() {
        assert_eq!(
            expand("$FORMULARY_SURELY_UNSET_VAR/x"),
            PathBuf::from("$FORMULARY_SURELY_UNSET_VAR/x")
        );
    }
}
