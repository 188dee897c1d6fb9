//! Real backends using `std::process::Command` and `std::fs`.

use crate::backend::{EnvOverlay, Filesystem, ProcessOutput, ProcessRunner};
use crate::types::Invocation;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use walkdir::WalkDir;

/// Runs subprocesses and captures their output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        cwd: &Path,
        env: &EnvOverlay,
    ) -> io::Result<ProcessOutput> {
        let vars = env.resolve(|name| std::env::var(name).ok());
        log::debug!("Running `{}` in {}", invocation, cwd.display());

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(cwd)
            .envs(vars)
            .output()?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    /// Create a filesystem handle.
    pub fn new() -> Self {
        Self
    }
}

impl Filesystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists() || path.is_symlink()
    }

    fn move_path(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn chmod_recursive(&self, path: &Path, mode: u32) -> io::Result<()> {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }

        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.path_is_symlink() {
                continue;
            }
            set_mode(entry.path(), mode)?;
        }
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path, overwrite: bool) -> io::Result<()> {
        if link.exists() || link.is_symlink() {
            if !overwrite {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", link.display()),
                ));
            }
            self.remove(link)?;
        }
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        create_symlink(target, link)
    }

    fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::copy(src, dst).map(|_| ())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let resolved = link.parent().map_or(target.to_path_buf(), |p| p.join(target));
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks not supported on this platform",
    ))
}
