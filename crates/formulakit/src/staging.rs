//! Transactional file staging.
//!
//! [`stage`] moves every existing path aside to `<path>-backup` and returns
//! a [`Transaction`]. The transaction must end with exactly one of
//! [`Transaction::commit`] (drop the backups) or [`Transaction::rollback`]
//! (put everything back, newest first).

use crate::backend::Filesystem;
use crate::error::{Error, RestoreFailure, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix appended to staged paths.
pub const BACKUP_SUFFIX: &str = "-backup";

/// A path managed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Original location.
    pub path: PathBuf,
    /// Where the original content was moved; `None` if nothing existed.
    pub backup: Option<PathBuf>,
}

/// `<path>-backup`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Move existing paths aside.
///
/// Paths that do not exist are still tracked, so a rollback removes
/// whatever the install created there. If staging fails halfway, the
/// paths already moved are restored before the error is returned.
pub fn stage<'a>(fs: &'a dyn Filesystem, paths: &[PathBuf]) -> Result<Transaction<'a>> {
    let mut tx = Transaction {
        fs,
        staged: Vec::new(),
        finished: false,
    };

    for path in paths {
        if tx.staged.iter().any(|s| s.path == *path) {
            continue;
        }

        if !fs.exists(path) {
            log::trace!("Tracking absent path {}", path.display());
            tx.staged.push(StagedFile {
                path: path.clone(),
                backup: None,
            });
            continue;
        }

        let backup = backup_path(path);
        if fs.exists(&backup) {
            let err = Error::Staging {
                path: path.clone(),
                message: format!("stale backup {} already exists", backup.display()),
            };
            return Err(tx.rollback(err));
        }

        if let Err(e) = fs.move_path(path, &backup) {
            return Err(tx.rollback(Error::io(path, e)));
        }
        log::debug!("Staged {} -> {}", path.display(), backup.display());
        tx.staged.push(StagedFile {
            path: path.clone(),
            backup: Some(backup),
        });
    }

    Ok(tx)
}

/// Bookkeeping of one staging operation.
#[must_use = "a transaction must be committed or rolled back"]
pub struct Transaction<'a> {
    fs: &'a dyn Filesystem,
    staged: Vec<StagedFile>,
    finished: bool,
}

impl Transaction<'_> {
    /// Paths managed by this transaction, in staging order.
    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    /// Number of paths that were actually moved aside.
    pub fn backup_count(&self) -> usize {
        self.staged.iter().filter(|s| s.backup.is_some()).count()
    }

    /// Delete all backups.
    ///
    /// Every backup is attempted; the first failure is returned.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let mut first_error = None;

        for staged in &self.staged {
            let Some(backup) = &staged.backup else {
                continue;
            };
            match self.fs.remove(backup) {
                Ok(()) => log::debug!("Removed backup {}", backup.display()),
                Err(e) => {
                    log::warn!("Could not remove backup {}: {}", backup.display(), e);
                    first_error.get_or_insert(Error::io(backup, e));
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Restore every staged path in reverse order and hand back `cause`.
    ///
    /// If any path cannot be restored the result is
    /// [`Error::RollbackFailed`] wrapping `cause`.
    pub fn rollback(mut self, cause: Error) -> Error {
        self.finished = true;
        if !self.staged.is_empty() {
            log::warn!(
                "Rolling back {} staged path(s) after: {}",
                self.staged.len(),
                cause
            );
        }

        let mut failures = Vec::new();
        for staged in self.staged.iter().rev() {
            if let Err(failure) = restore(self.fs, staged) {
                log::error!("{}: {}", failure.path.display(), failure.message);
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            cause
        } else {
            Error::RollbackFailed {
                cause: Box::new(cause),
                failures,
            }
        }
    }
}

fn restore(fs: &dyn Filesystem, staged: &StagedFile) -> std::result::Result<(), RestoreFailure> {
    let failure = |message: String| RestoreFailure {
        path: staged.path.clone(),
        backup: staged.backup.clone().unwrap_or_default(),
        message,
    };

    if fs.exists(&staged.path) {
        fs.remove(&staged.path)
            .map_err(|e| failure(format!("cannot remove new content: {e}")))?;
    }

    if let Some(backup) = &staged.backup {
        fs.move_path(backup, &staged.path)
            .map_err(|e| failure(format!("cannot move backup back: {e}")))?;
        log::debug!("Restored {}", staged.path.display());
    }
    Ok(())
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.backup_count() > 0 {
            log::warn!(
                "Staging transaction dropped unfinished; {} backup(s) left in place",
                self.backup_count()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::system::LocalFs;
    use crate::types::BuildStep;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn build_failure() -> Error {
        Error::BuildStepFailed {
            formula: "php74".into(),
            step: BuildStep::Configure,
            command: "./configure".into(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Local filesystem that refuses to move backups back.
    struct StuckBackups(LocalFs);

    impl Filesystem for StuckBackups {
        fn exists(&self, path: &Path) -> bool {
            self.0.exists(path)
        }
        fn move_path(&self, src: &Path, dst: &Path) -> io::Result<()> {
            if src.to_string_lossy().ends_with(BACKUP_SUFFIX) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.0.move_path(src, dst)
        }
        fn remove(&self, path: &Path) -> io::Result<()> {
            self.0.remove(path)
        }
        fn chmod_recursive(&self, path: &Path, mode: u32) -> io::Result<()> {
            self.0.chmod_recursive(path, mode)
        }
        fn symlink(&self, target: &Path, link: &Path, overwrite: bool) -> io::Result<()> {
            self.0.symlink(target, link, overwrite)
        }
        fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
            self.0.copy(src, dst)
        }
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.0.read_to_string(path)
        }
        fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
            self.0.write(path, contents)
        }
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            self.0.create_dir_all(path)
        }
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/etc/pear.conf")),
            PathBuf::from("/etc/pear.conf-backup")
        );
    }

    #[test]
    fn test_stage_then_rollback_restores() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("pear.conf");
        fs::write(&conf, "user settings").unwrap();
        let local = LocalFs::new();

        let tx = stage(&local, std::slice::from_ref(&conf)).unwrap();
        assert!(!conf.exists());
        assert!(backup_path(&conf).exists());

        fs::write(&conf, "installer output").unwrap();
        let err = tx.rollback(build_failure());

        assert!(matches!(err, Error::BuildStepFailed { .. }));
        assert_eq!(fs::read_to_string(&conf).unwrap(), "user settings");
        assert!(!backup_path(&conf).exists());
    }

    #[test]
    fn test_rollback_of_absent_path_removes_new_content() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("pear.conf");
        let local = LocalFs::new();

        let tx = stage(&local, std::slice::from_ref(&conf)).unwrap();
        assert_eq!(tx.backup_count(), 0);

        fs::write(&conf, "installer output").unwrap();
        let _ = tx.rollback(build_failure());
        assert!(!conf.exists());
    }

    #[test]
    fn test_stage_then_commit() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("pear.conf");
        fs::write(&conf, "user settings").unwrap();
        let local = LocalFs::new();

        let tx = stage(&local, std::slice::from_ref(&conf)).unwrap();
        fs::write(&conf, "new settings").unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read_to_string(&conf).unwrap(), "new settings");
        assert!(!backup_path(&conf).exists());
    }

    #[test]
    fn test_stage_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("etc").join("php");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("php.ini"), "memory_limit = 1G").unwrap();
        let local = LocalFs::new();

        let tx = stage(&local, std::slice::from_ref(&dir)).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("php.ini"), "memory_limit = 128M").unwrap();
        let _ = tx.rollback(build_failure());

        assert_eq!(
            fs::read_to_string(dir.join("php.ini")).unwrap(),
            "memory_limit = 1G"
        );
    }

    #[test]
    fn test_stale_backup_restores_earlier_paths() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("pear.conf");
        let second = tmp.path().join("php.ini");
        fs::write(&first, "one").unwrap();
        fs::write(&second, "two").unwrap();
        fs::write(backup_path(&second), "stale").unwrap();
        let local = LocalFs::new();

        let err = stage(&local, &[first.clone(), second.clone()]).err().unwrap();

        assert!(matches!(err, Error::Staging { ref path, .. } if *path == second));
        assert_eq!(fs::read_to_string(&first).unwrap(), "one");
        assert!(!backup_path(&first).exists());
        assert_eq!(fs::read_to_string(backup_path(&second)).unwrap(), "stale");
    }

    #[test]
    fn test_rollback_failure_is_distinct() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("pear.conf");
        fs::write(&conf, "user settings").unwrap();
        let stuck = StuckBackups(LocalFs::new());

        let tx = stage(&stuck, std::slice::from_ref(&conf)).unwrap();
        let err = tx.rollback(build_failure());

        match err {
            Error::RollbackFailed { cause, failures } => {
                assert!(matches!(*cause, Error::BuildStepFailed { .. }));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, conf);
                assert_eq!(failures[0].backup, backup_path(&conf));
            }
            other => panic!("expected rollback failure, got {other}"),
        }
        assert!(backup_path(&conf).exists());
    }

    #[test]
    fn test_rollback_reverse_order() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf.d");
        let inner = dir.join("ext.ini");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&inner, "extension=gmp").unwrap();
        let local = LocalFs::new();

        // Inner file staged first; the directory is moved after it.
        let tx = stage(&local, &[inner.clone(), dir.clone()]).unwrap();
        assert_eq!(tx.backup_count(), 2);
        let _ = tx.rollback(build_failure());

        assert_eq!(fs::read_to_string(&inner).unwrap(), "extension=gmp");
        assert!(!backup_path(&dir).exists());
        assert!(!backup_path(&inner).exists());
    }
}
