#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Submits one array job per crawl date and waits for each to resolve
//! before moving on.
//!
//! [`config`] layers the run settings, [`runner::Orchestrator`] drives the
//! per-date state machine, and [`progress`] exposes the hooks a CLI uses to
//! draw progress bars.

pub mod config;
pub mod progress;
pub mod runner;

use std::path::PathBuf;

use crawl_runner_scheduler::SchedulerError;

use crate::config::ConfigError;

/// Errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Settings, date list, or template were unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The scheduler rejected or never acknowledged a submission. Later
    /// dates are not attempted.
    #[error("submitting {job_name} failed: {source}")]
    Submission {
        /// Job that failed to submit.
        job_name: String,
        /// Scheduler error.
        source: SchedulerError,
    },

    /// A dry-run script could not be written.
    #[error("failed to write job script {path}: {source}")]
    Script {
        /// Script path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The poll loop was cancelled while waiting for a job.
    #[error("interrupted while waiting for {job_name}")]
    Interrupted {
        /// Job being waited on.
        job_name: String,
    },
}
