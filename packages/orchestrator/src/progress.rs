//! Progress reporting hooks for a run.
//!
//! The orchestrator reports two levels: dates (one step per crawl date) and
//! the current date's artifacts. Rendering is up to the caller;
//! `crawl_runner_cli_utils` provides `indicatif` bars.

use std::sync::Arc;

/// Receiver of progress updates. Must be shareable across tasks.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total units of work and resets the position to 0.
    fn set_total(&self, total: u64);

    /// Sets the absolute position.
    fn set_position(&self, pos: u64);

    /// Advances by `delta` units.
    fn inc(&self, delta: u64);

    /// Replaces the status message.
    fn set_message(&self, msg: String);

    /// Marks the work finished.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// The two bars a run drives.
#[derive(Clone)]
pub struct RunProgress {
    /// One step per crawl date.
    pub dates: Arc<dyn ProgressCallback>,
    /// Non-empty artifacts of the date being processed.
    pub artifacts: Arc<dyn ProgressCallback>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            dates: null_progress(),
            artifacts: null_progress(),
        }
    }
}
