#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crawl date and per-date array unit types.
//!
//! A crawl date is one dataset snapshot with a known number of segments.
//! Each date is processed by exactly one scheduler array job, whose tasks
//! each take a contiguous run of `segments_per_task` segments.

use std::fmt;
use std::ops::Range;

use crawl_runner_scheduler_models::{ArraySpec, JobId};
use serde::{Deserialize, Serialize};

/// One entry of the crawl date list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrawlDate {
    /// Date identifier as used in artifact names (e.g. `"202104"`).
    pub id: String,
    /// Number of segments published for this date.
    pub total_segments: u64,
}

impl CrawlDate {
    /// Creates a crawl date entry.
    #[must_use]
    pub fn new(id: impl Into<String>, total_segments: u64) -> Self {
        Self {
            id: id.into(),
            total_segments,
        }
    }
}

/// Error returned when a [`CrawlDateUnit`] cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidUnitError {
    /// Segments-per-task must be at least 1.
    ZeroSegmentsPerTask,
    /// Throttle must be at least 1.
    ZeroThrottle,
    /// The array would have more tasks than the scheduler can index.
    ArrayTooLarge {
        /// Computed number of tasks.
        tasks: u64,
    },
}

impl fmt::Display for InvalidUnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSegmentsPerTask => write!(f, "segments per task must be at least 1"),
            Self::ZeroThrottle => write!(f, "throttle must be at least 1"),
            Self::ArrayTooLarge { tasks } => {
                write!(f, "array of {tasks} tasks exceeds the maximum task index")
            }
        }
    }
}

impl std::error::Error for InvalidUnitError {}

/// Default job name prefix; [`CrawlDateUnit::job_name`] appends the date.
pub const DEFAULT_JOB_PREFIX: &str = "crawl_job";

/// Number of array tasks needed to cover `total_segments`.
///
/// `ceil(total / segments_per_task)`, but never less than 1: a date with
/// fewer segments than one task's share still gets one task. Returns `None`
/// when `segments_per_task` is 0.
#[must_use]
pub const fn array_size(total_segments: u64, segments_per_task: u64) -> Option<u64> {
    if segments_per_task == 0 {
        return None;
    }
    let size = total_segments.div_ceil(segments_per_task);
    Some(if size == 0 { 1 } else { size })
}

/// One crawl date prepared for submission as an array job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlDateUnit {
    date: String,
    total_segments: u64,
    segments_per_task: u64,
    array_size: u32,
    throttle: u32,
    job_id: Option<JobId>,
}

impl CrawlDateUnit {
    /// Builds the unit for `date`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUnitError`] if `segments_per_task` or `throttle` is
    /// zero, or the array would not fit the scheduler's task index.
    pub fn new(
        date: &CrawlDate,
        segments_per_task: u64,
        throttle: u32,
    ) -> Result<Self, InvalidUnitError> {
        if throttle == 0 {
            return Err(InvalidUnitError::ZeroThrottle);
        }
        let tasks = array_size(date.total_segments, segments_per_task)
            .ok_or(InvalidUnitError::ZeroSegmentsPerTask)?;
        let array_size =
            u32::try_from(tasks).map_err(|_| InvalidUnitError::ArrayTooLarge { tasks })?;

        Ok(Self {
            date: date.id.clone(),
            total_segments: date.total_segments,
            segments_per_task,
            array_size,
            throttle,
            job_id: None,
        })
    }

    /// Records the scheduler job id. The unit is not changed afterwards.
    #[must_use]
    pub fn with_job_id(self, job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..self
        }
    }

    /// Date identifier.
    #[must_use]
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Declared number of segments for the date.
    #[must_use]
    pub const fn total_segments(&self) -> u64 {
        self.total_segments
    }

    /// Segments handled by each task (the last task may get fewer).
    #[must_use]
    pub const fn segments_per_task(&self) -> u64 {
        self.segments_per_task
    }

    /// Number of array tasks. Always at least 1.
    #[must_use]
    pub const fn array_size(&self) -> u32 {
        self.array_size
    }

    /// Maximum concurrently running tasks.
    #[must_use]
    pub const fn throttle(&self) -> u32 {
        self.throttle
    }

    /// Scheduler job id, once submitted.
    #[must_use]
    pub const fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    /// Array shape for submission.
    #[must_use]
    pub const fn array_spec(&self) -> ArraySpec {
        ArraySpec {
            size: self.array_size,
            throttle: self.throttle,
        }
    }

    /// Scheduler job name: `<prefix>_<date>`.
    #[must_use]
    pub fn job_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.date)
    }

    /// Segments task `index` covers, clipped to the declared total. Empty
    /// for indices past the end (and for every task of an empty date).
    #[must_use]
    pub fn task_segments(&self, index: u32) -> Range<u64> {
        let start = u64::from(index)
            .saturating_mul(self.segments_per_task)
            .min(self.total_segments);
        let end = start
            .saturating_add(self.segments_per_task)
            .min(self.total_segments);
        start..end
    }

    /// Task index responsible for `segment`, if it is within the date.
    #[must_use]
    pub fn task_for_segment(&self, segment: u64) -> Option<u32> {
        if segment >= self.total_segments {
            return None;
        }
        u32::try_from(segment / self.segments_per_task).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_size_is_ceiling_and_at_least_one() {
        assert_eq!(array_size(79_840, 25), Some(3_194));
        assert_eq!(array_size(100, 100), Some(1));
        assert_eq!(array_size(101, 100), Some(2));
        assert_eq!(array_size(7, 100), Some(1));
        assert_eq!(array_size(0, 100), Some(1));
        assert_eq!(array_size(10, 0), None);
    }

    #[test]
    fn array_size_brackets_total() {
        for total in 1..=300_u64 {
            for spt in 1..=40_u64 {
                let size = array_size(total, spt).unwrap();
                assert!(size >= 1);
                assert!((size - 1) * spt < total, "total={total} spt={spt}");
                assert!(total <= size * spt, "total={total} spt={spt}");
            }
        }
    }

    #[test]
    fn last_task_of_202104_covers_fifteen_segments() {
        let unit = CrawlDateUnit::new(&CrawlDate::new("202104", 79_840), 25, 10).unwrap();
        assert_eq!(unit.array_size(), 3_194);
        assert_eq!(unit.task_segments(0), 0..25);
        assert_eq!(unit.task_segments(3_193), 79_825..79_840);
        assert_eq!(unit.task_segments(3_193).count(), 15);
        assert!(unit.task_segments(3_194).is_empty());
        assert_eq!(unit.task_for_segment(79_839), Some(3_193));
        assert_eq!(unit.task_for_segment(79_840), None);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let date = CrawlDate::new("202110", 64_000);
        assert_eq!(
            CrawlDateUnit::new(&date, 0, 10),
            Err(InvalidUnitError::ZeroSegmentsPerTask)
        );
        assert_eq!(
            CrawlDateUnit::new(&date, 100, 0),
            Err(InvalidUnitError::ZeroThrottle)
        );
        let huge = CrawlDate::new("x", u64::MAX);
        assert!(matches!(
            CrawlDateUnit::new(&huge, 1, 1),
            Err(InvalidUnitError::ArrayTooLarge { .. })
        ));
    }

    #[test]
    fn job_id_is_recorded_without_touching_shape() {
        let unit = CrawlDateUnit::new(&CrawlDate::new("202117", 64_000), 100, 10).unwrap();
        assert_eq!(unit.job_id(), None);
        let submitted = unit.clone().with_job_id(JobId(42));
        assert_eq!(submitted.job_id(), Some(JobId(42)));
        assert_eq!(submitted.array_spec(), unit.array_spec());
        assert_eq!(submitted.job_name("crawl_job"), "crawl_job_202117");
    }
}
