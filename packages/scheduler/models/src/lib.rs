#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scheduler job, task, and array submission types.
//!
//! These types describe what the batch scheduler reports about array jobs
//! and what we ask it to run. They carry no scheduler-specific parsing;
//! that lives in `crawl_runner_scheduler`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Identifier assigned by the scheduler to a submitted (array) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a valid [`JobId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidJobIdError {
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for InvalidJobIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid job id {:?}: expected a positive integer", self.input)
    }
}

impl std::error::Error for InvalidJobIdError {}

impl FromStr for JobId {
    type Err = InvalidJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| InvalidJobIdError {
                input: s.to_string(),
            })
    }
}

/// State of a single array task as reported by the scheduler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for resources (or held/requeued).
    Pending,
    /// Running on a node.
    Running,
    /// Exited with status 0.
    Completed,
    /// Exited non-zero, or lost to a node/resource failure.
    Failed,
    /// Cancelled by an operator or the scheduler.
    Cancelled,
    /// Killed for exceeding its time limit.
    TimedOut,
}

impl TaskState {
    /// All task states, in lifecycle order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
            Self::TimedOut,
        ]
    }

    /// Whether the task will never change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// One array task as seen by one scheduler view (live queue or accounting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayTaskRecord {
    /// Parent array job.
    pub job_id: JobId,
    /// Array task index. Non-array jobs report index 0.
    pub task_index: u32,
    /// Reported state.
    pub state: TaskState,
    /// Node (or node list) the task ran on, if assigned.
    pub node: Option<String>,
    /// Wall-clock time the task has run for, if reported.
    pub elapsed: Option<Duration>,
    /// Name the job was submitted under, if reported.
    pub job_name: Option<String>,
}

/// Number of array tasks in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Tasks waiting to run.
    pub pending: u32,
    /// Tasks currently running.
    pub running: u32,
    /// Tasks that exited successfully.
    pub completed: u32,
    /// Tasks that failed.
    pub failed: u32,
    /// Tasks that were cancelled.
    pub cancelled: u32,
    /// Tasks killed at their time limit.
    pub timed_out: u32,
}

impl TaskCounts {
    /// Adds one task in `state`.
    pub const fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::TimedOut => self.timed_out += 1,
        }
    }

    /// Total number of tasks counted.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.pending + self.running + self.completed + self.failed + self.cancelled + self.timed_out
    }

    /// Number of tasks in a terminal state.
    #[must_use]
    pub const fn terminal(&self) -> u32 {
        self.completed + self.failed + self.cancelled + self.timed_out
    }

    /// Number of terminal tasks that did not complete successfully.
    #[must_use]
    pub const fn unsuccessful(&self) -> u32 {
        self.failed + self.cancelled + self.timed_out
    }
}

impl FromIterator<TaskState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for state in iter {
            counts.add(state);
        }
        counts
    }
}

/// Resources requested for every task of an array job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResources {
    /// Scheduler partition (queue).
    pub partition: Option<String>,
    /// Per-task wall-clock limit.
    pub time_limit: Option<Duration>,
    /// Per-task memory request in scheduler syntax (e.g. `"100m"`, `"4G"`).
    pub mem: Option<String>,
    /// CPUs per task.
    pub cpus_per_task: Option<u32>,
}

/// Shape of an array: how many tasks and how many may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    /// Number of array tasks (indices `0..size`).
    pub size: u32,
    /// Maximum number of tasks the scheduler may run concurrently.
    pub throttle: u32,
}

/// Everything needed to submit (or render) one array job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayJobRequest {
    /// Job name shown in the queue.
    pub job_name: String,
    /// Array shape.
    pub array: ArraySpec,
    /// Per-task resources.
    pub resources: JobResources,
    /// Shell command body each task runs.
    pub command: String,
}
