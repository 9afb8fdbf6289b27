#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Progress tracking for running crawl array jobs.
//!
//! The monitor combines three sources that routinely disagree: the
//! scheduler's live queue, its accounting store, and the artifacts on disk.
//! Processed counts always come from artifacts; the scheduler only
//! contributes job status and task counts, and a discrepancy note when it
//! claims more than the artifacts show.
//!
//! * [`estimator`] keeps a bounded sample history and derives rates, ETA,
//!   and trend.
//! * [`report`] renders a snapshot as detailed text, one compact line, or
//!   JSON.
//! * [`state_file`] persists the latest snapshot as `KEY=value` lines.
//! * [`history`] appends and reads back the sample log.
//! * [`monitor`] is the polling loop tying it together.

pub mod estimator;
pub mod history;
pub mod monitor;
pub mod report;
pub mod state_file;

use std::path::PathBuf;

pub use crawl_runner_progress_models as models;

/// Errors from progress persistence.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Reading or writing a progress file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The monitoring loop was cancelled.
    #[error("monitoring interrupted")]
    Interrupted,
}
