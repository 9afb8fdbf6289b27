#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Typed boundary over the cluster batch scheduler.
//!
//! The rest of the workspace talks to the scheduler only through the
//! [`SchedulerAdapter`] trait: submit an array job, read the live queue, and
//! read the historical accounting store. [`slurm::SlurmAdapter`] implements
//! it on top of `sbatch`, `squeue`, and `sacct`; [`fake::FakeScheduler`]
//! implements it in memory for tests.
//!
//! The live and historical views are returned raw. Combining them into one
//! per-task state is done by [`views::merge_views`], so callers can see
//! when the two disagree.

pub mod fake;
pub mod parse;
pub mod poll;
pub mod retry;
pub mod script;
pub mod slurm;
pub mod views;

use async_trait::async_trait;
use crawl_runner_scheduler_models::{ArrayJobRequest, ArrayTaskRecord, JobId};

pub use crawl_runner_scheduler_models as models;

/// Errors reported by a [`SchedulerAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler command could not be run or failed without usable
    /// output. Usually transient: the controller is busy or restarting.
    #[error("scheduler unavailable ({command}): {message}")]
    Unavailable {
        /// Command that failed (e.g. `"squeue"`).
        command: String,
        /// What went wrong.
        message: String,
    },

    /// The command succeeded but its output did not have the expected shape.
    #[error("unexpected {command} output: {message}")]
    Parse {
        /// Command whose output was rejected.
        command: String,
        /// What did not parse.
        message: String,
    },

    /// The scheduler rejected the job.
    #[error("job submission failed: {message}")]
    SubmissionFailed {
        /// Scheduler's reason, as reported.
        message: String,
    },
}

impl SchedulerError {
    /// Whether retrying the same call might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Operations the orchestrator and monitor need from a batch scheduler.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    /// Submits an array job and returns its identifier.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::SubmissionFailed`] if the scheduler rejects the job
    /// * [`SchedulerError::Unavailable`] if the scheduler could not be reached
    /// * [`SchedulerError::Parse`] if the job id in the reply is unreadable
    async fn submit_array(&self, request: &ArrayJobRequest) -> Result<JobId, SchedulerError>;

    /// Lists tasks in the live queue, for one job or (with `None`) for all
    /// of the current user's jobs. Tasks that already left the queue are
    /// absent.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::Unavailable`] if the queue could not be read
    /// * [`SchedulerError::Parse`] if the output has an unexpected shape
    async fn query_live(&self, job: Option<JobId>) -> Result<Vec<ArrayTaskRecord>, SchedulerError>;

    /// Lists a job's tasks from the accounting store. Rows for very old or
    /// very new jobs may be missing.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::Unavailable`] if accounting could not be read
    /// * [`SchedulerError::Parse`] if the output has an unexpected shape
    async fn query_history(&self, job: JobId) -> Result<Vec<ArrayTaskRecord>, SchedulerError>;

    /// Renders the job script [`Self::submit_array`] would submit, without
    /// side effects.
    fn render_dry_run(&self, request: &ArrayJobRequest) -> String {
        script::render_script(request)
    }
}
