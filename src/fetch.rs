//! Source fetching: download, checksum, unpack.
//!
//! Tarballs are cached under `<cache>/downloads` and unpacked fresh into
//! `<cache>/build/<name>-<version>` for every install. Head builds clone
//! the formula's `head` repository into `<cache>/build/<name>-HEAD`.
//! Remote patches are cached next to the tarballs.

use formulakit::{Formula, Patch, SourceProvider};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Maximum download size (1 GB)
const MAX_DOWNLOAD_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no source url")]
    NoUrl,

    #[error("no head repository")]
    NoHead,

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("unsupported archive type: {0}")]
    UnsupportedArchive(String),

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Fetches sources into a cache directory.
pub struct CacheSource {
    cache_dir: PathBuf,
    agent: ureq::Agent,
}

impl CacheSource {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    fn build_dir(&self, formula: &Formula, label: &str) -> PathBuf {
        self.cache_dir
            .join("build")
            .join(format!("{}-{}", formula.name, label))
    }

    fn fetch_release(&self, formula: &Formula) -> Result<PathBuf, FetchError> {
        let url = formula.url.as_deref().ok_or(FetchError::NoUrl)?;
        let version = formula.version.as_deref().unwrap_or("unversioned");
        let file_name = archive_name(url).ok_or_else(|| FetchError::UnsupportedArchive(url.to_string()))?;

        let archive = self
            .downloads_dir()
            .join(format!("{}-{}-{}", formula.name, version, file_name));
        if archive.exists() {
            log::debug!("Using cached {}", archive.display());
        } else {
            let bytes = self.download(url)?;
            fs::create_dir_all(self.downloads_dir())?;
            fs::write(&archive, &bytes)?;
            log::info!("Downloaded {} ({} bytes)", url, bytes.len());
        }

        let data = fs::read(&archive)?;
        if let Some(expected) = &formula.sha256 {
            if let Err(e) = verify_sha256(&data, expected) {
                // A corrupt cache entry must not be reused
                let _ = fs::remove_file(&archive);
                return Err(e);
            }
        } else {
            log::warn!("{} declares no sha256; skipping verification", formula.name);
        }

        let dest = self.build_dir(formula, version);
        unpack_targz(&data, &dest)
    }

    fn fetch_patch(&self, formula: &Formula, patch: &Patch) -> Result<PathBuf, FetchError> {
        let version = formula.version.as_deref().unwrap_or("unversioned");
        let file_name = patch
            .url
            .rsplit('/')
            .next()
            .and_then(|name| name.split(['?', '#']).next())
            .filter(|name| !name.is_empty())
            .unwrap_or("patch.diff");

        let path = self
            .downloads_dir()
            .join(format!("{}-{}-{}", formula.name, version, file_name));
        if path.exists() {
            log::debug!("Using cached {}", path.display());
        } else {
            let bytes = self.download(&patch.url)?;
            fs::create_dir_all(self.downloads_dir())?;
            fs::write(&path, &bytes)?;
            log::info!("Downloaded patch {}", patch.url);
        }

        match &patch.sha256 {
            Some(expected) => {
                if let Err(e) = verify_sha256(&fs::read(&path)?, expected) {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            }
            None => log::warn!("Patch {} declares no sha256; skipping verification", patch.url),
        }
        Ok(path)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let failed = |message: String| FetchError::Download {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", "formulary")
            .call()
            .map_err(|e| failed(e.to_string()))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .map_err(|e| failed(e.to_string()))
    }

    fn fetch_head(&self, formula: &Formula) -> Result<PathBuf, FetchError> {
        let repo = formula.head.as_deref().ok_or(FetchError::NoHead)?;
        let dest = self.build_dir(formula, "HEAD");
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        log::info!("Cloning {}", repo);
        let output = Command::new("git")
            .args(["clone", "--depth", "1", repo])
            .arg(&dest)
            .output()?;
        if !output.status.success() {
            return Err(FetchError::Clone(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(dest)
    }
}

impl SourceProvider for CacheSource {
    fn source_dir(&self, formula: &Formula, head: bool) -> formulakit::Result<PathBuf> {
        let fetched = if head {
            self.fetch_head(formula)
        } else {
            self.fetch_release(formula)
        };
        fetched.map_err(|e| formulakit::Error::Source {
            formula: formula.name.clone(),
            message: e.to_string(),
        })
    }

    fn patch_file(&self, formula: &Formula, patch: &Patch) -> formulakit::Result<PathBuf> {
        if !(patch.url.starts_with("https://") || patch.url.starts_with("http://")) {
            return formulakit::local_patch(formula, patch);
        }
        self.fetch_patch(formula, patch)
            .map_err(|e| formulakit::Error::Source {
                formula: formula.name.clone(),
                message: e.to_string(),
            })
    }
}

/// File name of a supported archive URL
fn archive_name(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?.split(['?', '#']).next()?;
    (name.ends_with(".tar.gz") || name.ends_with(".tgz")).then_some(name)
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compare `data` against an expected hex digest (case-insensitive)
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<(), FetchError> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(FetchError::Checksum {
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}

/// Unpack a `.tar.gz` into `dest`, replacing anything there.
///
/// Returns the single top-level directory of the archive if it has one
/// (the usual `name-version/` layout), otherwise `dest` itself.
pub fn unpack_targz(data: &[u8], dest: &Path) -> Result<PathBuf, FetchError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut archive = Archive::new(GzDecoder::new(data));
    archive.unpack(dest)?;
    log::debug!("Unpacked into {}", dest.display());

    let mut top: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    if top.len() == 1 && top[0].is_dir() {
        return Ok(top.remove(0));
    }
    Ok(dest.to_path_buf())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn targz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_sha256() {
        assert!(verify_sha256(
            b"abc",
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        )
        .is_ok());

        match verify_sha256(b"abd", "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad") {
            Err(FetchError::Checksum { actual, .. }) => assert_ne!(actual, "ba78"),
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name("https://www.php.net/distributions/php-7.4.33.tar.gz"),
            Some("php-7.4.33.tar.gz")
        );
        assert_eq!(archive_name("https://x.org/gmp-6.3.0.tgz?mirror=1"), Some("gmp-6.3.0.tgz"));
        assert_eq!(archive_name("https://x.org/gmp-6.3.0.tar.xz"), None);
    }

    #[test]
    fn test_unpack_single_top_dir() {
        let tmp = TempDir::new().unwrap();
        let data = targz(&[
            ("php-7.4.33/configure", "#!/bin/sh"),
            ("php-7.4.33/php.ini-development", "memory_limit = 128M"),
        ]);

        let dest = tmp.path().join("build");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale"), "old").unwrap();

        let root = unpack_targz(&data, &dest).unwrap();
        assert_eq!(root, dest.join("php-7.4.33"));
        assert!(root.join("php.ini-development").exists());
        assert!(!dest.join("stale").exists());
    }

    #[test]
    fn test_unpack_flat_archive() {
        let tmp = TempDir::new().unwrap();
        let data = targz(&[("configure", "#!/bin/sh"), ("Makefile.in", "all:")]);

        let root = unpack_targz(&data, &tmp.path().join("flat")).unwrap();
        assert_eq!(root, tmp.path().join("flat"));
    }

    #[test]
    fn test_missing_url_is_source_error() {
        let tmp = TempDir::new().unwrap();
        let source = CacheSource::new(tmp.path());
        let formula = Formula::new("gmp").with_version("6.3.0");

        match source.source_dir(&formula, false) {
            Err(formulakit::Error::Source { formula, message }) => {
                assert_eq!(formula, "gmp");
                assert_eq!(message, "no source url");
            }
            other => panic!("expected source error, got {other:?}"),
        }
    }

    const DIFF_URL: &str = "https://gist.example.org/raw/Makefile.global.diff?x=1";

    #[test]
    fn test_cached_patch_is_verified() {
        let tmp = TempDir::new().unwrap();
        let source = CacheSource::new(tmp.path());
        let formula = Formula::new("php74").with_version("7.4.33");
        let cached = tmp.path().join("downloads/php74-7.4.33-Makefile.global.diff");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, "--- a/Makefile.global\n").unwrap();

        let mut patch = Patch::new(DIFF_URL);
        patch.sha256 = Some(sha256_hex(b"--- a/Makefile.global\n"));
        assert_eq!(source.patch_file(&formula, &patch).unwrap(), cached);

        patch.sha256 = Some(sha256_hex(b"something else"));
        assert!(matches!(
            source.patch_file(&formula, &patch),
            Err(formulakit::Error::Source { .. })
        ));
        assert!(!cached.exists());
    }

    #[test]
    fn test_local_patch_is_not_downloaded() {
        let tmp = TempDir::new().unwrap();
        let source = CacheSource::new(tmp.path());
        let formula = Formula::new("php74").with_version("7.4.33");

        let path = source
            .patch_file(&formula, &Patch::new("file:///srv/patches/zts.diff"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/patches/zts.diff"));
        assert!(!tmp.path().join("downloads").exists());
    }
}
