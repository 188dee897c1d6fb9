//! Run context and provider traits
//!
//! These traits let the engine report progress and ask for confirmation
//! without depending on a particular terminal UI.

use crate::types::{BuildStep, InstallResult, PostInstallWarning};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for install runs
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called when a formula install starts
    fn on_formula_start(&mut self, formula: &str, version: &str);

    /// Called before a build step subprocess starts
    fn on_step_start(&mut self, formula: &str, step: BuildStep, command: &str);

    /// Called after a build step subprocess succeeded
    fn on_step_complete(&mut self, formula: &str, step: BuildStep);

    /// Called for each non-fatal post-install problem
    fn on_warning(&mut self, formula: &str, warning: &PostInstallWarning);

    /// Called when a formula install finished successfully
    fn on_formula_complete(&mut self, result: &InstallResult);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action; `true` if confirmed.
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_formula_start(&mut self, _formula: &str, _version: &str) {}
    fn on_step_start(&mut self, _formula: &str, _step: BuildStep, _command: &str) {}
    fn on_step_complete(&mut self, _formula: &str, _step: BuildStep) {}
    fn on_warning(&mut self, _formula: &str, _warning: &PostInstallWarning) {}
    fn on_formula_complete(&mut self, _result: &InstallResult) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}

/// Shared cancellation flag.
///
/// Checked before every subprocess step; a running subprocess is not
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context passed to one install run
pub struct RunContext<'a> {
    /// Cancellation flag
    pub cancel: CancelToken,
    /// Progress reporting
    pub progress: &'a mut dyn ProgressCallback,
}

impl<'a> RunContext<'a> {
    /// Create a context
    pub fn new(cancel: CancelToken, progress: &'a mut dyn ProgressCallback) -> Self {
        Self { cancel, progress }
    }
}
