//! In-memory scheduler for tests.
//!
//! [`FakeScheduler`] hands out sequential job ids starting at
//! [`FIRST_JOB_ID`] and answers queries from scripted responses. Each
//! scripted response is consumed by one call; the last response for a job
//! keeps being returned once the script runs out, so "finished" states stay
//! finished. Unscripted queries return no rows.
//!
//! Every call is appended to a call log so tests can assert ordering (for
//! example, that a second job was submitted only after the first resolved).

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use crawl_runner_scheduler_models::{ArrayJobRequest, ArrayTaskRecord, JobId, TaskState};

use crate::poll::Sleeper;
use crate::{SchedulerAdapter, SchedulerError};

/// Job id assigned to the first submission.
pub const FIRST_JOB_ID: u64 = 1000;

type Scripted = Result<Vec<ArrayTaskRecord>, SchedulerError>;

/// One call made against a [`FakeScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    /// `submit_array` with the given job name.
    Submit(String),
    /// `query_live` for the given job (or all jobs).
    Live(Option<JobId>),
    /// `query_history` for the given job.
    History(JobId),
}

#[derive(Default)]
struct FakeState {
    next_job_id: u64,
    submissions: Vec<ArrayJobRequest>,
    submit_failures: VecDeque<SchedulerError>,
    live: BTreeMap<Option<JobId>, VecDeque<Scripted>>,
    history: BTreeMap<JobId, VecDeque<Scripted>>,
    calls: Vec<FakeCall>,
}

/// Scripted [`SchedulerAdapter`].
#[derive(Default)]
pub struct FakeScheduler {
    state: Mutex<FakeState>,
}

/// Builds one record per index in `indices`, all in `state`.
#[must_use]
pub fn records(job: JobId, state: TaskState, indices: Range<u32>) -> Vec<ArrayTaskRecord> {
    indices
        .map(|task_index| ArrayTaskRecord {
            job_id: job,
            task_index,
            state,
            node: None,
            elapsed: None,
            job_name: None,
        })
        .collect()
}

/// Tags every record with the job name the scheduler would report.
#[must_use]
pub fn named(mut records: Vec<ArrayTaskRecord>, job_name: &str) -> Vec<ArrayTaskRecord> {
    for record in &mut records {
        record.job_name = Some(job_name.to_string());
    }
    records
}

/// Pops the next scripted response, repeating the last one forever.
fn next_response(queue: Option<&mut VecDeque<Scripted>>) -> Scripted {
    let Some(queue) = queue else {
        return Ok(Vec::new());
    };
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    } else {
        queue.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl FakeScheduler {
    /// Creates a fake with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_job_id: FIRST_JOB_ID,
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_next_submit(&self, error: SchedulerError) {
        self.lock().submit_failures.push_back(error);
    }

    /// Appends live-queue responses for `job` (`None` = all-jobs query).
    pub fn script_live(&self, job: Option<JobId>, responses: impl IntoIterator<Item = Scripted>) {
        self.lock()
            .live
            .entry(job)
            .or_default()
            .extend(responses);
    }

    /// Appends accounting responses for `job`.
    pub fn script_history(&self, job: JobId, responses: impl IntoIterator<Item = Scripted>) {
        self.lock()
            .history
            .entry(job)
            .or_default()
            .extend(responses);
    }

    /// Requests passed to successful submissions, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<ArrayJobRequest> {
        self.lock().submissions.clone()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl SchedulerAdapter for FakeScheduler {
    async fn submit_array(&self, request: &ArrayJobRequest) -> Result<JobId, SchedulerError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::Submit(request.job_name.clone()));

        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        let id = JobId(state.next_job_id);
        state.next_job_id += 1;
        state.submissions.push(request.clone());
        drop(state);
        Ok(id)
    }

    async fn query_live(&self, job: Option<JobId>) -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::Live(job));
        next_response(state.live.get_mut(&job))
    }

    async fn query_history(&self, job: JobId) -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::History(job));
        next_response(state.history.get_mut(&job))
    }
}

/// A [`Sleeper`] that returns immediately and records what it was asked to
/// wait for. Optionally reports cancellation after a number of waits.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
    cancel_after: Option<usize>,
}

impl RecordingSleeper {
    /// A sleeper that is never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sleeper that reports cancellation on wait number `waits + 1`.
    #[must_use]
    pub fn cancelled_after(waits: usize) -> Self {
        Self {
            waits: Mutex::new(Vec::new()),
            cancel_after: Some(waits),
        }
    }

    /// Durations requested so far.
    #[must_use]
    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) -> bool {
        let mut waits = self
            .waits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.cancel_after.is_some_and(|n| waits.len() >= n) {
            return false;
        }
        waits.push(duration);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_runner_scheduler_models::{ArraySpec, JobResources};

    fn request(name: &str) -> ArrayJobRequest {
        ArrayJobRequest {
            job_name: name.to_string(),
            array: ArraySpec { size: 2, throttle: 1 },
            resources: JobResources::default(),
            command: "true".to_string(),
        }
    }

    #[tokio::test]
    async fn assigns_sequential_job_ids() {
        let fake = FakeScheduler::new();
        assert_eq!(fake.submit_array(&request("a")).await.unwrap(), JobId(1000));
        assert_eq!(fake.submit_array(&request("b")).await.unwrap(), JobId(1001));
        assert_eq!(fake.submissions().len(), 2);
    }

    #[tokio::test]
    async fn last_scripted_response_repeats() {
        let fake = FakeScheduler::new();
        let job = JobId(1000);
        fake.script_history(
            job,
            [
                Ok(records(job, TaskState::Running, 0..2)),
                Ok(records(job, TaskState::Completed, 0..2)),
            ],
        );

        let first = fake.query_history(job).await.unwrap();
        assert_eq!(first[0].state, TaskState::Running);
        for _ in 0..3 {
            let later = fake.query_history(job).await.unwrap();
            assert_eq!(later[0].state, TaskState::Completed);
        }
        assert!(fake.query_live(Some(job)).await.unwrap().is_empty());
        assert_eq!(fake.calls().len(), 5);
    }

    #[tokio::test]
    async fn injected_submit_failure_is_returned_once() {
        let fake = FakeScheduler::new();
        fake.fail_next_submit(SchedulerError::SubmissionFailed {
            message: "Invalid partition".to_string(),
        });
        assert!(fake.submit_array(&request("a")).await.is_err());
        assert!(fake.submit_array(&request("a")).await.is_ok());
    }

    #[tokio::test]
    async fn recording_sleeper_cancels_after_limit() {
        let sleeper = RecordingSleeper::cancelled_after(2);
        assert!(sleeper.sleep(Duration::from_secs(1)).await);
        assert!(sleeper.sleep(Duration::from_secs(2)).await);
        assert!(!sleeper.sleep(Duration::from_secs(3)).await);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }
}
