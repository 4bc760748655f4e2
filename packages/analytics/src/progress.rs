//! Progress reporting for long-running model stages.
//!
//! Cross-validation reports one unit of work per fold. The trait keeps the
//! analytics crate free of any terminal rendering; the CLI plugs in
//! `indicatif` bars.

/// Receives progress updates from a model stage.
///
/// Folds run on a thread pool, so implementations must be `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update. Used by tests and non-interactive callers.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}
