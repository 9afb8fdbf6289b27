//! The monitoring loop.
//!
//! Each cycle:
//!
//! 1. walks the output directory once and counts artifacts per date;
//! 2. picks the current date (the first one with fewer artifacts than
//!    declared segments);
//! 3. resolves the tracked job and reads both scheduler views for it;
//! 4. records a sample, builds a snapshot, and persists it to the state
//!    file and the history log.
//!
//! The monitor never submits or cancels anything and never gates the
//! orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use crawl_runner_crawl::artifacts::{ArtifactCounter, ArtifactIndex};
use crawl_runner_crawl::models::{CrawlDate, CrawlDateUnit, DEFAULT_JOB_PREFIX};
use crawl_runner_progress_models::{JobInfo, JobStatus, ProgressSnapshot};
use crawl_runner_scheduler::models::{JobId, TaskState};
use crawl_runner_scheduler::poll::{Sleeper, TokioSleeper};
use crawl_runner_scheduler::retry::{self, RetryPolicy};
use crawl_runner_scheduler::views;
use crawl_runner_scheduler::SchedulerAdapter;

use crate::estimator::{DateObservation, Observation, ProgressEstimator};
use crate::history::{self, HISTORY_FILE_NAME};
use crate::state_file::{STATE_FILE_NAME, StateFileWriter};
use crate::ProgressError;

/// Default pause between monitor cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Which scheduler job the monitor reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSelector {
    /// Always this job.
    Explicit(JobId),
    /// The newest job of the current user in the live queue whose name
    /// starts with [`MonitorConfig::job_prefix`]. The last job seen keeps
    /// being tracked after it leaves the queue.
    Latest,
}

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Dates and their declared segment counts.
    pub dates: Vec<CrawlDate>,
    /// Directory the worker writes artifacts to.
    pub output_dir: PathBuf,
    /// Segments per array task, used to translate completed task indices
    /// into segments.
    pub segments_per_task: u64,
    /// Pause between cycles.
    pub interval: Duration,
    /// Job to track.
    pub selector: JobSelector,
    /// Name prefix of crawl jobs; [`JobSelector::Latest`] ignores jobs
    /// without it.
    pub job_prefix: String,
    /// Where to write `progress.state`, if anywhere.
    pub state_file: Option<PathBuf>,
    /// Where to append history lines, if anywhere.
    pub history_file: Option<PathBuf>,
    /// Stop once every date is fully processed (or an explicitly selected
    /// job has finished).
    pub exit_when_complete: bool,
    /// Retry policy for scheduler queries.
    pub retry: RetryPolicy,
}

impl MonitorConfig {
    /// Settings with defaults and no persisted files.
    #[must_use]
    pub fn new(dates: Vec<CrawlDate>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            dates,
            output_dir: output_dir.into(),
            segments_per_task: 100,
            interval: DEFAULT_INTERVAL,
            selector: JobSelector::Latest,
            job_prefix: DEFAULT_JOB_PREFIX.to_string(),
            state_file: None,
            history_file: None,
            exit_when_complete: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Persists the state file and history log under `working_dir`.
    #[must_use]
    pub fn persist_in(mut self, working_dir: &Path) -> Self {
        self.state_file = Some(working_dir.join(STATE_FILE_NAME));
        self.history_file = Some(working_dir.join(HISTORY_FILE_NAME));
        self
    }
}

/// Polls scheduler and artifacts and produces snapshots.
pub struct Monitor {
    scheduler: Arc<dyn SchedulerAdapter>,
    retry_sleeper: Arc<dyn Sleeper>,
    counter: ArtifactCounter,
    config: MonitorConfig,
    estimator: ProgressEstimator,
    state_writer: Option<StateFileWriter>,
    started: Option<NaiveDateTime>,
    tracked: Option<JobId>,
}

impl Monitor {
    /// Creates a monitor. Nothing is polled until [`Self::poll_once`] or
    /// [`Self::run`].
    #[must_use]
    pub fn new(scheduler: Arc<dyn SchedulerAdapter>, config: MonitorConfig) -> Self {
        let tracked = match config.selector {
            JobSelector::Explicit(id) => Some(id),
            JobSelector::Latest => None,
        };
        Self {
            scheduler,
            retry_sleeper: Arc::new(TokioSleeper),
            counter: ArtifactCounter::new(&config.output_dir),
            state_writer: config.state_file.clone().map(StateFileWriter::new),
            estimator: ProgressEstimator::default(),
            config,
            started: None,
            tracked,
        }
    }

    /// Waits out scheduler retry backoff on `sleeper` instead of the
    /// Ctrl-C aware default.
    #[must_use]
    pub fn with_retry_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry_sleeper = sleeper;
        self
    }

    /// Samples recorded so far.
    #[must_use]
    pub const fn estimator(&self) -> &ProgressEstimator {
        &self.estimator
    }

    /// Job currently tracked, if any.
    #[must_use]
    pub const fn tracked_job(&self) -> Option<JobId> {
        self.tracked
    }

    async fn resolve_job(&mut self) -> Option<JobId> {
        if self.config.selector != JobSelector::Latest {
            return self.tracked;
        }
        let live = retry::with_fixed_backoff(
            &self.config.retry,
            self.retry_sleeper.as_ref(),
            "squeue",
            || self.scheduler.query_live(None),
        )
        .await;
        match live {
            Ok(records) => {
                let prefix = self.config.job_prefix.as_str();
                let newest = records
                    .iter()
                    .filter(|r| r.job_name.as_deref().is_some_and(|n| n.starts_with(prefix)))
                    .map(|r| r.job_id)
                    .max();
                if let Some(newest) = newest
                    && self.tracked != Some(newest)
                {
                    log::info!("Tracking job {newest}");
                    self.tracked = Some(newest);
                }
            }
            Err(e) => log::warn!("Could not list live jobs: {e}"),
        }
        self.tracked
    }

    async fn job_info(&self, job: JobId, current: Option<(&CrawlDate, u64)>) -> JobInfo {
        let Some(merged) = views::poll_merged(
            self.scheduler.as_ref(),
            self.retry_sleeper.as_ref(),
            &self.config.retry,
            job,
        )
        .await
        else {
            log::warn!("Job {job} status unknown this cycle");
            return JobInfo {
                job_id: Some(job),
                ..JobInfo::default()
            };
        };
        let counts = merged.counts();

        let mut info = JobInfo {
            job_id: Some(job),
            status: JobStatus::from_counts(&counts),
            tasks: Some(counts),
            scheduler_completed_segments: None,
            discrepancy: None,
        };

        if let Some((date, artifacts)) = current
            && let Ok(unit) = CrawlDateUnit::new(date, self.config.segments_per_task, 1)
        {
            let claimed: u64 = merged
                .indices_in(TaskState::Completed)
                .into_iter()
                .map(|i| {
                    let range = unit.task_segments(i);
                    range.end - range.start
                })
                .sum();
            info.scheduler_completed_segments = Some(claimed);
            if claimed > artifacts {
                let note = format!(
                    "scheduler reports {claimed} segments of {} completed but only {artifacts} non-empty artifacts exist",
                    date.id
                );
                log::warn!("{note}");
                info.discrepancy = Some(note);
            }
        }

        info
    }

    fn current_date<'a>(&'a self, index: &ArtifactIndex) -> Option<(&'a CrawlDate, u64)> {
        self.config
            .dates
            .iter()
            .map(|d| (d, index.count_within(&d.id, d.total_segments)))
            .find(|(d, count)| *count < d.total_segments)
    }

    /// Gathers one cycle's raw observations.
    pub async fn observe(&mut self, now: NaiveDateTime) -> Observation {
        let started = *self.started.get_or_insert(now);
        #[allow(clippy::cast_precision_loss)]
        let elapsed_secs = ((now - started).num_milliseconds() as f64 / 1000.0).max(0.0);

        let index = self.counter.scan_or_empty();
        let total = self.config.dates.iter().map(|d| d.total_segments).sum();
        let processed = self
            .config
            .dates
            .iter()
            .map(|d| index.count_within(&d.id, d.total_segments))
            .sum();

        let job = self.resolve_job().await;
        let current = self.current_date(&index);
        let job = match job {
            Some(id) => self.job_info(id, current).await,
            None => JobInfo::default(),
        };

        Observation {
            timestamp: now,
            elapsed_secs,
            total,
            processed,
            current_date: current.map(|(d, count)| DateObservation {
                date: d.id.clone(),
                total: d.total_segments,
                processed: count,
            }),
            job,
        }
    }

    /// Runs one cycle at `now`: observe, record, snapshot, persist.
    ///
    /// Persistence failures are logged; they never stop monitoring.
    pub async fn poll_once(&mut self, now: NaiveDateTime) -> ProgressSnapshot {
        let observation = self.observe(now).await;
        self.estimator.record(observation.sample());
        let snapshot = self.estimator.snapshot(&observation);

        if let Some(writer) = &mut self.state_writer
            && let Err(e) = writer.write(&snapshot)
        {
            log::warn!("Could not update state file: {e}");
        }
        if let Some(path) = &self.config.history_file
            && let Err(e) = history::append(path, &snapshot)
        {
            log::warn!("Could not append to history log: {e}");
        }

        snapshot
    }

    fn is_complete(&self, snapshot: &ProgressSnapshot) -> bool {
        let all_processed = snapshot.overall.total > 0 && snapshot.overall.remaining == 0;
        let explicit_job_done = matches!(self.config.selector, JobSelector::Explicit(_))
            && snapshot.job.status.is_finished();
        all_processed || explicit_job_done
    }

    /// Polls until complete (with `exit_when_complete`) or interrupted,
    /// handing each snapshot to `emit`. Returns the final snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Interrupted`] when `sleeper` reports
    /// cancellation.
    pub async fn run<F>(
        &mut self,
        sleeper: &dyn Sleeper,
        mut clock: impl FnMut() -> NaiveDateTime,
        mut emit: F,
    ) -> Result<ProgressSnapshot, ProgressError>
    where
        F: FnMut(&ProgressSnapshot),
    {
        log::info!(
            "Monitoring {} crawl date(s) under {} every {:?}",
            self.config.dates.len(),
            self.config.output_dir.display(),
            self.config.interval
        );

        loop {
            let snapshot = self.poll_once(clock()).await;
            emit(&snapshot);

            if self.config.exit_when_complete && self.is_complete(&snapshot) {
                log::info!("Processing complete, monitor exiting");
                return Ok(snapshot);
            }
            if !sleeper.sleep(self.config.interval).await {
                return Err(ProgressError::Interrupted);
            }
        }
    }
}
