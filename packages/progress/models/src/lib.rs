#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Progress sample and snapshot types.
//!
//! A [`ProgressSnapshot`] is the single value produced per monitor cycle.
//! Renderers and the state file writer take it by reference; nothing reads
//! a snapshot back from disk as working state.

use chrono::NaiveDateTime;
use crawl_runner_scheduler_models::{JobId, TaskCounts};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One observation of processed work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Local wall-clock time of the observation.
    pub timestamp: NaiveDateTime,
    /// Seconds since the monitor started.
    pub elapsed_secs: f64,
    /// Processed segments (artifact count), unclamped.
    pub processed: u64,
    /// Declared total segments.
    pub total: u64,
}

/// `processed` clamped to `total`, with the excess kept separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Declared total.
    pub total: u64,
    /// Processed count, never above `total`.
    pub processed: u64,
    /// `total - processed`.
    pub remaining: u64,
    /// Amount by which the raw count exceeded `total`.
    pub overflow: u64,
    /// `processed * 100 / total`, or 0 when `total` is 0.
    pub percentage: f64,
}

impl Completion {
    /// Clamps `raw_processed` against `total`.
    #[must_use]
    pub fn new(raw_processed: u64, total: u64) -> Self {
        let processed = raw_processed.min(total);
        Self {
            total,
            processed,
            remaining: total - processed,
            overflow: raw_processed - processed,
            percentage: percentage(processed, total),
        }
    }
}

/// `processed * 100 / total`; 0 when `total` is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    processed as f64 * 100.0 / total as f64
}

/// Direction of the recent processing rate relative to the overall rate.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Trend {
    /// Recent rate more than 10% above overall.
    Accelerating,
    /// Recent rate within 10% of overall.
    Steady,
    /// Recent rate more than 10% below overall.
    Decelerating,
    /// Not enough data for either rate.
    #[default]
    Unknown,
}

/// Status of the tracked array job, summarized from its tasks.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Every known task is still waiting.
    Pending,
    /// At least one task is running, or the array is part-way through.
    Running,
    /// Every task completed successfully.
    Completed,
    /// Every task is terminal and at least one failed or timed out.
    Failed,
    /// Every task is terminal, none failed, at least one was cancelled.
    Cancelled,
    /// No job, no tasks, or the scheduler could not be read.
    #[default]
    Unknown,
}

impl JobStatus {
    /// Summarizes merged task counts.
    #[must_use]
    pub const fn from_counts(counts: &TaskCounts) -> Self {
        if counts.total() == 0 {
            return Self::Unknown;
        }
        if counts.running > 0 {
            return Self::Running;
        }
        if counts.pending > 0 {
            return if counts.terminal() > 0 {
                Self::Running
            } else {
                Self::Pending
            };
        }
        if counts.failed > 0 || counts.timed_out > 0 {
            Self::Failed
        } else if counts.cancelled > 0 {
            Self::Cancelled
        } else {
            Self::Completed
        }
    }

    /// Whether the job has stopped changing.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress of the crawl date currently being worked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateProgress {
    /// Date identifier.
    pub date: String,
    /// Clamped counts for the date.
    pub completion: Completion,
    /// Estimated seconds until the date finishes.
    pub eta_secs: Option<f64>,
}

/// What the scheduler says about the tracked job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Tracked job, if one was found.
    pub job_id: Option<JobId>,
    /// Summary status.
    pub status: JobStatus,
    /// Merged per-state task counts, if the scheduler could be read.
    pub tasks: Option<TaskCounts>,
    /// Segments covered by tasks the scheduler reports completed.
    pub scheduler_completed_segments: Option<u64>,
    /// Set when the scheduler and the artifact count disagree.
    pub discrepancy: Option<String>,
}

/// Everything known about progress at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Local wall-clock time of the snapshot.
    pub timestamp: NaiveDateTime,
    /// Clamped overall counts.
    pub overall: Completion,
    /// Current crawl date, if any date is unfinished.
    pub current_date: Option<DateProgress>,
    /// Scheduler view of the tracked job.
    pub job: JobInfo,
    /// Seconds since the monitor started.
    pub elapsed_secs: f64,
    /// Estimated seconds until all work is processed.
    pub eta_secs: Option<f64>,
    /// Processed segments per hour since the monitor started.
    pub overall_rate_per_hour: Option<f64>,
    /// Processed segments per hour over the recent window.
    pub recent_rate_per_hour: Option<f64>,
    /// Recent vs overall rate.
    pub trend: Trend,
}
