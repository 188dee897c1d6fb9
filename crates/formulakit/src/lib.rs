//! # formulakit
//!
//! Formula resolution and build orchestration engine.
//!
//! This crate provides functionality for:
//! - Loading declarative formulas into a [`Registry`]
//! - Resolving dependencies and conflicts into an [`InstallPlan`]
//! - Rendering configure arguments from options and environment facts
//! - Running configure/compile/install with transactional file staging
//! - Non-fatal post-install repair actions
//!
//! ## Example
//!
//! ```no_run
//! use formulakit::{Engine, EnvFacts, FixedSource, Layout, Registry, RequestedOptions};
//! use formulakit::context::{CancelToken, NoProgress, RunContext};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let mut registry = Registry::new();
//! registry.load_dir(Path::new("formulas")).expect("Failed to load formulas");
//!
//! let engine = Engine::system(
//!     Arc::new(registry.snapshot()),
//!     Layout::new("/opt/formulary", "/home/me"),
//! );
//!
//! let facts = EnvFacts::detect();
//! let plan = engine
//!     .plan("php74", &RequestedOptions::new().with("gmp"), &facts)
//!     .expect("Planning failed");
//!
//! let mut progress = NoProgress;
//! let mut ctx = RunContext::new(CancelToken::new(), &mut progress);
//! let sources = FixedSource::new("/tmp/php-7.4.33");
//! for result in engine.install(&plan, &sources, &mut ctx).expect("Install failed") {
//!     println!("Installed {} {}", result.formula, result.version);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod condition;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod options;
pub mod postinstall;
pub mod registry;
pub mod scheduler;
pub mod staging;
pub mod template;
pub mod types;

pub use condition::{Condition, EnvFacts};
pub use error::{Error, ErrorCategory, RestoreFailure, Result};
pub use executor::{BuildScript, Executor, SerializationHint};
pub use graph::{GraphBuilder, InstallPlan, PlannedFormula};
pub use options::{OptionSet, RequestedOptions};
pub use registry::{Catalog, Registry, RegistrySnapshot};
pub use template::Layout;
pub use types::{
    BuildStep, Formula, InstallResult, OptionValue, Patch, PostInstallWarning, StepRecord,
};

use backend::system::{LocalFs, SystemRunner};
use backend::{Filesystem, ProcessRunner};
use context::RunContext;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supplies the unpacked source tree of a formula.
pub trait SourceProvider: Send + Sync {
    /// Directory holding the formula's sources, ready for configure.
    fn source_dir(&self, formula: &Formula, head: bool) -> Result<PathBuf>;

    /// Local file holding one of the formula's patches.
    ///
    /// The default only accepts local paths; see [`local_patch`].
    fn patch_file(&self, formula: &Formula, patch: &Patch) -> Result<PathBuf> {
        local_patch(formula, patch)
    }
}

/// Resolve a patch given as a plain path or a `file://` URL.
///
/// Relative paths are applied from the source directory.
pub fn local_patch(formula: &Formula, patch: &Patch) -> Result<PathBuf> {
    let path = patch.url.strip_prefix("file://").unwrap_or(&patch.url);
    if path.contains("://") {
        return Err(Error::Source {
            formula: formula.name.clone(),
            message: format!("no way to fetch remote patch {}", patch.url),
        });
    }
    Ok(PathBuf::from(path))
}

/// Uses one directory for every formula.
#[derive(Debug, Clone)]
pub struct FixedSource {
    dir: PathBuf,
}

impl FixedSource {
    /// Create a provider for `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl SourceProvider for FixedSource {
    fn source_dir(&self, _formula: &Formula, _head: bool) -> Result<PathBuf> {
        Ok(self.dir.clone())
    }
}

/// High-level entry point tying the registry, planner and executor together.
pub struct Engine {
    catalog: Arc<dyn Catalog>,
    executor: Executor,
}

impl Engine {
    /// Create an engine with explicit backends (useful for testing).
    pub fn new(
        catalog: Arc<dyn Catalog>,
        runner: Arc<dyn ProcessRunner>,
        fs: Arc<dyn Filesystem>,
        layout: Layout,
    ) -> Self {
        Self {
            catalog,
            executor: Executor::new(runner, fs, layout),
        }
    }

    /// Create an engine running real subprocesses on the local filesystem.
    pub fn system(catalog: Arc<dyn Catalog>, layout: Layout) -> Self {
        Self::new(
            catalog,
            Arc::new(SystemRunner::new()),
            Arc::new(LocalFs::new()),
            layout,
        )
    }

    /// The catalog plans are computed against.
    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// The build step executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Compute the install plan of a formula.
    pub fn plan(
        &self,
        target: &str,
        requested: &RequestedOptions,
        facts: &EnvFacts,
    ) -> Result<InstallPlan> {
        GraphBuilder::new(self.catalog.as_ref()).plan(target, requested, facts)
    }

    /// Scheduling hint of a whole plan.
    pub fn serialization_hint(&self, plan: &InstallPlan) -> SerializationHint {
        plan.pending()
            .map(|entry| Executor::serialization_hint(&entry.formula))
            .find(SerializationHint::is_exclusive)
            .unwrap_or(SerializationHint::Shared)
    }

    /// Every path the pending entries of a plan write to.
    pub fn footprint(&self, plan: &InstallPlan) -> Result<BTreeSet<PathBuf>> {
        let mut paths = BTreeSet::new();
        for entry in plan.pending() {
            paths.extend(self.executor.footprint(entry)?);
        }
        Ok(paths)
    }

    /// Render the build scripts of all pending entries without running anything.
    pub fn preview(&self, plan: &InstallPlan, source_dir: &Path) -> Result<Vec<BuildScript>> {
        plan.pending()
            .map(|entry| self.executor.script(entry, &plan.entry_facts(entry), source_dir))
            .collect()
    }

    // =========================================================================
    // Installation
    // =========================================================================

    /// Install the pending entries of a plan in order.
    ///
    /// Every entry is checked pre-flight (version, templates) before any
    /// source is fetched or subprocess started. Installation stops at the
    /// first fatal error; entries installed before it stay installed.
    /// Only the target of a head plan is fetched and built as a head build.
    pub fn install(
        &self,
        plan: &InstallPlan,
        sources: &dyn SourceProvider,
        ctx: &mut RunContext<'_>,
    ) -> Result<Vec<InstallResult>> {
        for entry in plan.pending() {
            self.executor
                .script(entry, &plan.entry_facts(entry), Path::new("."))?;
        }

        let mut results: Vec<InstallResult> = Vec::new();
        for entry in plan.pending() {
            let facts = plan
                .entry_facts(entry)
                .with_present(results.iter().map(|r| r.formula.clone()));
            let source_dir = sources.source_dir(&entry.formula, facts.head)?;
            let result = self
                .executor
                .execute(entry, &facts, &source_dir, sources, ctx)?;
            results.push(result);
        }
        Ok(results)
    }

    /// Run the smoke test of an installed formula.
    pub fn test(&self, name: &str) -> Result<Option<StepRecord>> {
        let formula = self.catalog.lookup(name)?;
        self.executor.run_test(&formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProcessOutput;
    use crate::backend::EnvOverlay;
    use crate::context::{CancelToken, NoProgress};
    use crate::condition::Condition;
    use crate::types::{Dependency, Invocation};
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ProcessRunner for Recorder {
        fn run(&self, invocation: &Invocation, _cwd: &Path, _env: &EnvOverlay) -> io::Result<ProcessOutput> {
            self.calls.lock().unwrap().push(invocation.to_string());
            Ok(ProcessOutput::ok())
        }
    }

    fn engine(tmp: &TempDir, formulas: Vec<Formula>, recorder: Arc<Recorder>) -> Engine {
        let mut registry = Registry::new();
        for formula in formulas {
            registry.register(formula).unwrap();
        }
        Engine::new(
            Arc::new(registry.snapshot()),
            recorder,
            Arc::new(LocalFs::new()),
            Layout::new(tmp.path().join("root"), tmp.path().join("home")),
        )
    }

    #[test]
    fn test_install_skips_present_dependencies() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            &tmp,
            vec![
                Formula::new("php74")
                    .with_version("7.4")
                    .with_dependency(Dependency::runtime("curl"))
                    .with_dependency(Dependency::runtime("gmp")),
                Formula::new("curl").with_version("8.5"),
                Formula::new("gmp").with_version("6.3"),
            ],
            recorder.clone(),
        );

        let facts = EnvFacts::default().with_present(["curl"]);
        let plan = engine.plan("php74", &RequestedOptions::new(), &facts).unwrap();
        let mut progress = NoProgress;
        let mut ctx = RunContext::new(CancelToken::new(), &mut progress);
        let results = engine
            .install(&plan, &FixedSource::new(tmp.path()), &mut ctx)
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.formula.as_str()).collect();
        assert_eq!(names, vec!["gmp", "php74"]);
        assert_eq!(recorder.calls.lock().unwrap().len(), 6);
    }

    #[test]
    fn test_missing_version_of_dependency_is_preflight() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            &tmp,
            vec![
                Formula::new("php74")
                    .with_version("7.4")
                    .with_dependency(Dependency::runtime("gmp")),
                Formula::new("gmp"),
            ],
            recorder.clone(),
        );

        let plan = engine
            .plan("php74", &RequestedOptions::new(), &EnvFacts::default())
            .unwrap();
        let mut progress = NoProgress;
        let mut ctx = RunContext::new(CancelToken::new(), &mut progress);
        let err = engine
            .install(&plan, &FixedSource::new(tmp.path()), &mut ctx)
            .unwrap_err();

        assert!(matches!(err, Error::MissingVersion { ref formula } if formula == "gmp"));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_plan_hint_and_footprint() {
        let tmp = TempDir::new().unwrap();
        let mut php = Formula::new("php74")
            .with_version("7.4")
            .with_dependency(Dependency::runtime("gmp"));
        php.build.deparallelize_install = true;
        let engine = engine(
            &tmp,
            vec![php, Formula::new("gmp").with_version("6.3")],
            Arc::new(Recorder::default()),
        );

        let plan = engine
            .plan("php74", &RequestedOptions::new(), &EnvFacts::default())
            .unwrap();
        assert!(engine.serialization_hint(&plan).is_exclusive());

        let footprint = engine.footprint(&plan).unwrap();
        assert!(footprint.contains(&tmp.path().join("root/Cellar/gmp/6.3")));
        assert!(footprint.contains(&tmp.path().join("root/Cellar/php74/7.4")));
    }

    #[test]
    fn test_preview_runs_nothing() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            &tmp,
            vec![Formula::new("gmp").with_version("6.3")],
            recorder.clone(),
        );
        let plan = engine
            .plan("gmp", &RequestedOptions::new(), &EnvFacts::default())
            .unwrap();

        let scripts = engine.preview(&plan, tmp.path()).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].steps.len(), 3);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    /// Hands out one directory; refuses head sources of formulas without a repository.
    struct ReleaseOnly {
        dir: PathBuf,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl SourceProvider for ReleaseOnly {
        fn source_dir(&self, formula: &Formula, head: bool) -> Result<PathBuf> {
            self.calls.lock().unwrap().push((formula.name.clone(), head));
            if head && formula.head.is_none() {
                return Err(Error::Source {
                    formula: formula.name.clone(),
                    message: "no head repository".into(),
                });
            }
            Ok(self.dir.clone())
        }
    }

    #[test]
    fn test_head_build_only_for_target() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut php = Formula::new("php74")
            .with_version("7.4")
            .with_dependency(Dependency::build("bison").when(Condition::Head));
        php.head = Some("https://github.com/php/php-src.git".into());
        php.build.prepare = vec![Invocation::new("./buildconf", &["--force"])];
        let mut bison = Formula::new("bison").with_version("3.8");
        bison.build.prepare = vec![Invocation::new("./bootstrap", &[])];
        let engine = engine(&tmp, vec![php, bison], recorder.clone());

        let facts = EnvFacts::default().with_head(true);
        let plan = engine.plan("php74", &RequestedOptions::new(), &facts).unwrap();
        let sources = ReleaseOnly {
            dir: tmp.path().to_path_buf(),
            calls: Mutex::new(Vec::new()),
        };
        let mut progress = NoProgress;
        let mut ctx = RunContext::new(CancelToken::new(), &mut progress);
        let results = engine.install(&plan, &sources, &mut ctx).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(
            *sources.calls.lock().unwrap(),
            vec![("bison".to_string(), false), ("php74".to_string(), true)]
        );
        let calls = recorder.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c == "./bootstrap"));
        assert!(calls.iter().any(|c| c == "./buildconf --force"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dependency_opt_prefix_resolves() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut php = Formula::new("php74")
            .with_version("7.4")
            .with_dependency(Dependency::runtime("gmp"));
        php.build.configure = Invocation::new("./configure", &["--with-gmp={opt:gmp}"]);
        let engine = engine(
            &tmp,
            vec![php, Formula::new("gmp").with_version("6.3")],
            recorder.clone(),
        );

        // Stands in for what `make install` of gmp leaves behind.
        let keg = tmp.path().join("root/Cellar/gmp/6.3");
        std::fs::create_dir_all(keg.join("include")).unwrap();
        std::fs::write(keg.join("include/gmp.h"), "").unwrap();

        let plan = engine
            .plan("php74", &RequestedOptions::new(), &EnvFacts::default())
            .unwrap();
        let mut progress = NoProgress;
        let mut ctx = RunContext::new(CancelToken::new(), &mut progress);
        engine
            .install(&plan, &FixedSource::new(tmp.path()), &mut ctx)
            .unwrap();

        let opt = tmp.path().join("root/opt/gmp");
        assert!(recorder
            .calls
            .lock()
            .unwrap()
            .contains(&format!("./configure --with-gmp={}", opt.display())));
        assert!(opt.join("include/gmp.h").exists());
        assert_eq!(std::fs::read_link(&opt).unwrap(), keg);
    }

    #[test]
    fn test_local_patch() {
        let formula = Formula::new("php74");
        assert_eq!(
            local_patch(&formula, &Patch::new("file:///tmp/zts.diff")).unwrap(),
            PathBuf::from("/tmp/zts.diff")
        );
        assert_eq!(
            local_patch(&formula, &Patch::new("patches/zts.diff")).unwrap(),
            PathBuf::from("patches/zts.diff")
        );
        assert!(matches!(
            local_patch(&formula, &Patch::new("https://example.org/zts.diff")),
            Err(Error::Source { .. })
        ));
    }
}
