//! The submit-and-wait loop.
//!
//! Dates are processed strictly one after another. For each date:
//!
//! ```text
//! Queued -> Submitted -> Polling -> Resolved(Success | PartialFailure)
//!    \
//!     `-> DryRun   (scripts only, nothing submitted)
//! ```
//!
//! A date is resolved once every task index of its array is terminal in at
//! least one scheduler view. Resolution always advances to the next date;
//! failed tasks are reported for a human to re-run, never resubmitted.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crawl_runner_crawl::artifacts::{ArtifactCounter, ArtifactIndex};
use crawl_runner_crawl::models::{CrawlDate, CrawlDateUnit};
use crawl_runner_crawl::template;
use crawl_runner_scheduler::models::{ArrayJobRequest, JobId, TaskState};
use crawl_runner_scheduler::poll::Sleeper;
use crawl_runner_scheduler::views::{self, MergedView};
use crawl_runner_scheduler::SchedulerAdapter;

use crate::config::{ConfigError, RunConfig};
use crate::progress::RunProgress;
use crate::OrchestratorError;

/// Where a failed date's work stands, for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Tasks that ended in a state other than `Completed`.
    pub failed_tasks: Vec<(u32, TaskState)>,
    /// Non-empty artifacts found for the date's declared segments.
    pub artifacts: u64,
    /// Declared segments for the date.
    pub total_segments: u64,
}

/// How a resolved date ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every task completed and every segment has an artifact.
    Success,
    /// Some tasks failed or some artifacts are missing.
    PartialFailure(FailureReport),
}

/// Lifecycle state of one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    /// Not yet submitted.
    Queued,
    /// Accepted by the scheduler.
    Submitted(JobId),
    /// Waiting for the array to resolve.
    Polling(JobId),
    /// Every task is terminal.
    Resolved {
        /// Scheduler job.
        job_id: JobId,
        /// Result.
        outcome: Outcome,
    },
    /// Script rendered to `script`; never submitted.
    DryRun {
        /// Written script path.
        script: PathBuf,
    },
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Submitted(id) => write!(f, "submitted as job {id}"),
            Self::Polling(id) => write!(f, "waiting for job {id}"),
            Self::Resolved {
                job_id,
                outcome: Outcome::Success,
            } => write!(f, "job {job_id} succeeded"),
            Self::Resolved {
                job_id,
                outcome: Outcome::PartialFailure(report),
            } => write!(
                f,
                "job {job_id} partially failed ({} failed task(s), {}/{} artifacts)",
                report.failed_tasks.len(),
                report.artifacts,
                report.total_segments
            ),
            Self::DryRun { script } => write!(f, "dry run, script at {}", script.display()),
        }
    }
}

/// Final state of one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSummary {
    /// The unit as submitted.
    pub unit: CrawlDateUnit,
    /// Where it ended up.
    pub state: UnitState,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// One entry per date, in processing order.
    pub units: Vec<UnitSummary>,
}

impl RunSummary {
    /// Whether every date resolved successfully (or was rendered in a dry
    /// run).
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.units.iter().all(|u| {
            matches!(
                u.state,
                UnitState::DryRun { .. }
                    | UnitState::Resolved {
                        outcome: Outcome::Success,
                        ..
                    }
            )
        })
    }

    /// Job ids in submission order.
    #[must_use]
    pub fn job_ids(&self) -> Vec<JobId> {
        self.units.iter().filter_map(|u| u.unit.job_id()).collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for u in &self.units {
            writeln!(f, "{}: {}", u.unit.date(), u.state)?;
        }
        Ok(())
    }
}

/// Builds the units for `dates`, validating every one before anything is
/// submitted.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if a date's array cannot be built.
pub fn plan(dates: &[CrawlDate], config: &RunConfig) -> Result<Vec<CrawlDateUnit>, ConfigError> {
    dates
        .iter()
        .map(|date| {
            CrawlDateUnit::new(date, config.segments_per_task, config.throttle).map_err(|e| {
                ConfigError::Invalid {
                    field: "segments_per_task",
                    reason: format!("date {}: {e}", date.id),
                }
            })
        })
        .collect()
}

/// The submission request for `unit`.
#[must_use]
pub fn request_for(unit: &CrawlDateUnit, template: &str, config: &RunConfig) -> ArrayJobRequest {
    ArrayJobRequest {
        job_name: unit.job_name(&config.job_prefix),
        array: unit.array_spec(),
        resources: config.resources.clone(),
        command: template::instantiate(template, unit),
    }
}

/// Drives dates through the scheduler one at a time.
pub struct Orchestrator {
    scheduler: Arc<dyn SchedulerAdapter>,
    sleeper: Arc<dyn Sleeper>,
    config: RunConfig,
    counter: ArtifactCounter,
    progress: RunProgress,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        scheduler: Arc<dyn SchedulerAdapter>,
        sleeper: Arc<dyn Sleeper>,
        config: RunConfig,
    ) -> Self {
        Self {
            scheduler,
            sleeper,
            counter: ArtifactCounter::new(config.output_dir.clone()),
            config,
            progress: RunProgress::default(),
        }
    }

    /// Reports progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Processes every date in order.
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Config`] if a date's array cannot be built
    /// * [`OrchestratorError::Script`] if a dry-run script cannot be written
    /// * [`OrchestratorError::Submission`] if the scheduler rejects a job;
    ///   later dates are not attempted
    /// * [`OrchestratorError::Interrupted`] if the poll timer is cancelled
    pub async fn run(
        &self,
        dates: &[CrawlDate],
        template: &str,
    ) -> Result<RunSummary, OrchestratorError> {
        let units = plan(dates, &self.config)?;
        let mut summary = RunSummary::default();
        let count = units.len();

        self.progress.dates.set_total(count as u64);

        for (i, unit) in units.into_iter().enumerate() {
            log::info!(
                "[{}/{count}] Crawl date {}: {} segments, {} task(s) of {} segments, throttle {}",
                i + 1,
                unit.date(),
                unit.total_segments(),
                unit.array_size(),
                unit.segments_per_task(),
                unit.throttle()
            );
            self.progress
                .dates
                .set_message(format!("crawl date {}", unit.date()));

            let request = request_for(&unit, template, &self.config);
            let (unit, state) = if self.config.dry_run {
                let script = self.write_script(&request)?;
                (unit, UnitState::DryRun { script })
            } else {
                self.submit_and_wait(unit, &request).await?
            };

            log::info!("Crawl date {}: {state}", unit.date());
            summary.units.push(UnitSummary { unit, state });
            self.progress.dates.inc(1);
        }

        let msg = if summary.all_succeeded() {
            "all crawl dates done".to_string()
        } else {
            "finished with failures".to_string()
        };
        self.progress.dates.finish(msg);
        Ok(summary)
    }

    fn write_script(&self, request: &ArrayJobRequest) -> Result<PathBuf, OrchestratorError> {
        let dir = &self.config.scripts_dir;
        let path = dir.join(format!("{}.sh", request.job_name));
        let io_err = |source| OrchestratorError::Script {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        std::fs::write(&path, self.scheduler.render_dry_run(request)).map_err(io_err)?;
        log::info!("[dry run] Wrote job script {}", path.display());
        Ok(path)
    }

    async fn submit_and_wait(
        &self,
        unit: CrawlDateUnit,
        request: &ArrayJobRequest,
    ) -> Result<(CrawlDateUnit, UnitState), OrchestratorError> {
        let job_id = self
            .scheduler
            .submit_array(request)
            .await
            .map_err(|source| {
                log::error!("Submitting {} failed: {source}", request.job_name);
                OrchestratorError::Submission {
                    job_name: request.job_name.clone(),
                    source,
                }
            })?;
        let unit = unit.with_job_id(job_id);
        log::info!(
            "Crawl date {}: {}",
            unit.date(),
            UnitState::Submitted(job_id)
        );

        let outcome = self.wait_for(&unit, job_id).await?;
        Ok((unit, UnitState::Resolved { job_id, outcome }))
    }

    async fn wait_for(
        &self,
        unit: &CrawlDateUnit,
        job_id: JobId,
    ) -> Result<Outcome, OrchestratorError> {
        let size = unit.array_size();
        self.progress.artifacts.set_total(unit.total_segments());
        self.progress
            .artifacts
            .set_message(format!("{} artifacts", unit.date()));
        log::info!("Crawl date {}: {}", unit.date(), UnitState::Polling(job_id));

        loop {
            let polled = views::poll_merged(
                self.scheduler.as_ref(),
                self.sleeper.as_ref(),
                &self.config.retry,
                job_id,
            )
            .await;
            if let Some(view) = polled {
                let index = self.counter.scan_or_empty();
                let artifacts = index.count_within(unit.date(), unit.total_segments());
                self.progress.artifacts.set_position(artifacts);

                if view.is_resolved(size) {
                    self.progress
                        .artifacts
                        .finish(format!("{} resolved", unit.date()));
                    return Ok(resolve(unit, &view, &index));
                }

                let counts = view.counts();
                log::info!(
                    "Job {job_id} ({}): {}/{size} tasks finished, {} running, {} pending; {artifacts}/{} artifacts",
                    unit.date(),
                    counts.terminal(),
                    counts.running,
                    size.saturating_sub(counts.terminal() + counts.running),
                    unit.total_segments()
                );
            }

            if !self.sleeper.sleep(self.config.check_interval).await {
                return Err(OrchestratorError::Interrupted {
                    job_name: unit.job_name(&self.config.job_prefix),
                });
            }
        }
    }
}

/// Decides a resolved date's outcome from the merged view and one artifact
/// scan. Only artifacts inside the declared segment range count.
fn resolve(unit: &CrawlDateUnit, view: &MergedView, index: &ArtifactIndex) -> Outcome {
    let artifacts = index.count_within(unit.date(), unit.total_segments());
    let failed_tasks: Vec<(u32, TaskState)> = view
        .records()
        .filter(|r| r.task_index < unit.array_size() && r.state != TaskState::Completed)
        .map(|r| (r.task_index, r.state))
        .collect();

    if failed_tasks.is_empty() && artifacts >= unit.total_segments() {
        return Outcome::Success;
    }

    for (task, state) in &failed_tasks {
        let segments = unit.task_segments(*task);
        log::warn!(
            "Crawl date {}: task {task} ended {state}, segments {}..{} need a re-run",
            unit.date(),
            segments.start,
            segments.end
        );
    }
    if artifacts < unit.total_segments() {
        let missing = index.missing_segments(unit);
        log::warn!(
            "Crawl date {}: {} of {} segments have no artifact (first missing: {:?})",
            unit.date(),
            missing.len(),
            unit.total_segments(),
            missing.iter().take(10).collect::<Vec<_>>()
        );
    }

    Outcome::PartialFailure(FailureReport {
        failed_tasks,
        artifacts,
        total_segments: unit.total_segments(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::RunSettings;
    use crawl_runner_crawl::artifacts::ArtifactPattern;
    use crawl_runner_scheduler::SchedulerError;
    use crawl_runner_scheduler::models::ArrayTaskRecord;
    use crawl_runner_scheduler::fake::{FakeCall, FakeScheduler, RecordingSleeper, records};
    use crawl_runner_scheduler::retry::RetryPolicy;

    const TEMPLATE: &str =
        "worker --date $date --task $SLURM_ARRAY_TASK_ID --per-task $segments_per_task\n";

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "crawl_runner_orchestrator_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("output")).unwrap();
        dir
    }

    fn config(dir: &Path, dry_run: bool) -> RunConfig {
        let mut config = RunConfig::resolve(RunSettings {
            template_file: Some(dir.join("job.sh")),
            segments_per_task: Some(25),
            throttle: Some(2),
            output_dir: Some(dir.join("output")),
            scripts_dir: Some(dir.join("scripts")),
            dry_run: Some(dry_run),
            ..RunSettings::default()
        })
        .unwrap();
        config.retry = RetryPolicy::once();
        config
    }

    fn write_artifacts(dir: &Path, date: &str, segments: std::ops::Range<u64>) {
        let pattern = ArtifactPattern::default();
        for seg in segments {
            std::fs::write(dir.join("output").join(pattern.file_name(date, seg)), b"x").unwrap();
        }
    }

    fn dates() -> Vec<CrawlDate> {
        vec![CrawlDate::new("202104", 100), CrawlDate::new("202110", 50)]
    }

    #[tokio::test]
    async fn second_date_waits_for_first_to_resolve() {
        let dir = scratch("ordering");
        write_artifacts(&dir, "202104", 0..100);
        write_artifacts(&dir, "202110", 0..50);

        let fake = Arc::new(FakeScheduler::new());
        let first = JobId(1000);
        let second = JobId(1001);
        // Two polls with index 3 still running, then everything finished.
        fake.script_live(
            Some(first),
            [
                Ok(records(first, TaskState::Running, 0..4)),
                Ok(records(first, TaskState::Running, 3..4)),
                Ok(Vec::new()),
            ],
        );
        fake.script_history(
            first,
            [
                Ok(Vec::new()),
                Ok(records(first, TaskState::Completed, 0..3)),
                Ok(records(first, TaskState::Completed, 0..4)),
            ],
        );
        fake.script_history(second, [Ok(records(second, TaskState::Completed, 0..2))]);

        let sleeper = Arc::new(RecordingSleeper::new());
        let orchestrator = Orchestrator::new(fake.clone(), sleeper.clone(), config(&dir, false));
        let summary = orchestrator.run(&dates(), TEMPLATE).await.unwrap();

        let calls = fake.calls();
        let second_submit = calls
            .iter()
            .position(|c| *c == FakeCall::Submit("crawl_job_202110".to_string()))
            .unwrap();
        let first_polls = calls[..second_submit]
            .iter()
            .filter(|c| **c == FakeCall::History(first))
            .count();
        assert_eq!(first_polls, 3);
        assert!(calls[..second_submit]
            .iter()
            .all(|c| !matches!(c, FakeCall::History(j) | FakeCall::Live(Some(j)) if *j == second)));

        assert_eq!(sleeper.waits(), vec![Duration::from_secs(60); 2]);
        assert!(summary.all_succeeded());
        assert_eq!(summary.job_ids(), vec![first, second]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn submission_carries_array_shape_and_command() {
        let dir = scratch("request");
        let fake = Arc::new(FakeScheduler::new());
        fake.script_history(JobId(1000), [Ok(records(JobId(1000), TaskState::Completed, 0..4))]);
        fake.script_history(JobId(1001), [Ok(records(JobId(1001), TaskState::Completed, 0..2))]);

        let orchestrator = Orchestrator::new(
            fake.clone(),
            Arc::new(RecordingSleeper::new()),
            config(&dir, false),
        );
        orchestrator.run(&dates(), TEMPLATE).await.unwrap();

        let submitted = fake.submissions();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].array.size, 4);
        assert_eq!(submitted[0].array.throttle, 2);
        assert_eq!(
            submitted[0].command,
            "worker --date 202104 --task $SLURM_ARRAY_TASK_ID --per-task 25\n"
        );
        assert_eq!(submitted[1].job_name, "crawl_job_202110");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn failed_tasks_resolve_as_partial_failure_and_run_continues() {
        let dir = scratch("partial");
        write_artifacts(&dir, "202104", 0..75);
        write_artifacts(&dir, "202110", 0..50);

        let fake = Arc::new(FakeScheduler::new());
        let first = JobId(1000);
        let mut history = records(first, TaskState::Completed, 0..3);
        history.extend(records(first, TaskState::TimedOut, 3..4));
        fake.script_history(first, [Ok(history)]);
        fake.script_history(JobId(1001), [Ok(records(JobId(1001), TaskState::Completed, 0..2))]);

        let orchestrator = Orchestrator::new(
            fake.clone(),
            Arc::new(RecordingSleeper::new()),
            config(&dir, false),
        );
        let summary = orchestrator.run(&dates(), TEMPLATE).await.unwrap();

        assert!(!summary.all_succeeded());
        assert_eq!(
            summary.units[0].state,
            UnitState::Resolved {
                job_id: first,
                outcome: Outcome::PartialFailure(FailureReport {
                    failed_tasks: vec![(3, TaskState::TimedOut)],
                    artifacts: 75,
                    total_segments: 100,
                }),
            }
        );
        assert_eq!(
            summary.units[1].state,
            UnitState::Resolved {
                job_id: JobId(1001),
                outcome: Outcome::Success,
            }
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn completed_tasks_without_artifacts_are_not_success() {
        let dir = scratch("no_artifacts");
        let fake = Arc::new(FakeScheduler::new());
        fake.script_history(JobId(1000), [Ok(records(JobId(1000), TaskState::Completed, 0..4))]);

        let orchestrator = Orchestrator::new(
            fake,
            Arc::new(RecordingSleeper::new()),
            config(&dir, false),
        );
        let summary = orchestrator
            .run(&[CrawlDate::new("202104", 100)], TEMPLATE)
            .await
            .unwrap();
        assert!(matches!(
            summary.units[0].state,
            UnitState::Resolved {
                outcome: Outcome::PartialFailure(FailureReport { artifacts: 0, .. }),
                ..
            }
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn artifacts_outside_declared_segments_do_not_count() {
        let dir = scratch("out_of_range");
        write_artifacts(&dir, "202104", 100..200);
        write_artifacts(&dir, "202104", 0..60);
        let fake = Arc::new(FakeScheduler::new());
        fake.script_history(JobId(1000), [Ok(records(JobId(1000), TaskState::Completed, 0..4))]);

        let orchestrator = Orchestrator::new(
            fake,
            Arc::new(RecordingSleeper::new()),
            config(&dir, false),
        );
        let summary = orchestrator
            .run(&[CrawlDate::new("202104", 100)], TEMPLATE)
            .await
            .unwrap();

        assert!(!summary.all_succeeded());
        assert_eq!(
            summary.units[0].state,
            UnitState::Resolved {
                job_id: JobId(1000),
                outcome: Outcome::PartialFailure(FailureReport {
                    failed_tasks: Vec::new(),
                    artifacts: 60,
                    total_segments: 100,
                }),
            }
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn dry_run_writes_scripts_and_never_submits() {
        let dir = scratch("dry_run");
        let fake = Arc::new(FakeScheduler::new());
        let orchestrator = Orchestrator::new(
            fake.clone(),
            Arc::new(RecordingSleeper::new()),
            config(&dir, true),
        );

        let first = orchestrator.run(&dates(), TEMPLATE).await.unwrap();
        let script = dir.join("scripts").join("crawl_job_202104.sh");
        let text = std::fs::read_to_string(&script).unwrap();
        assert!(text.contains("#SBATCH --array=0-3%2"));
        assert!(text.contains("worker --date 202104"));

        let second = orchestrator.run(&dates(), TEMPLATE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&script).unwrap(), text);
        assert!(fake.calls().is_empty());
        assert!(first.all_succeeded());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn submission_failure_aborts_run() {
        let dir = scratch("submit_fail");
        let fake = Arc::new(FakeScheduler::new());
        fake.script_history(JobId(1000), [Ok(records(JobId(1000), TaskState::Completed, 0..4))]);
        let orchestrator = Orchestrator::new(
            fake.clone(),
            Arc::new(RecordingSleeper::new()),
            config(&dir, false),
        );

        fake.fail_next_submit(SchedulerError::SubmissionFailed {
            message: "Invalid partition name specified".to_string(),
        });
        let err = orchestrator.run(&dates(), TEMPLATE).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Submission { .. }));
        assert_eq!(fake.calls().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn cycle_with_both_views_down_is_skipped() {
        let dir = scratch("views_down");
        write_artifacts(&dir, "202104", 0..100);
        let fake = Arc::new(FakeScheduler::new());
        let job = JobId(1000);
        let down = |command: &str| -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
            Err(SchedulerError::Unavailable {
                command: command.to_string(),
                message: "Socket timed out on send/recv operation".to_string(),
            })
        };
        fake.script_live(Some(job), [down("squeue"), Ok(Vec::new())]);
        fake.script_history(
            job,
            [down("sacct"), Ok(records(job, TaskState::Completed, 0..4))],
        );

        let sleeper = Arc::new(RecordingSleeper::new());
        let orchestrator = Orchestrator::new(fake, sleeper.clone(), config(&dir, false));
        let summary = orchestrator
            .run(&[CrawlDate::new("202104", 100)], TEMPLATE)
            .await
            .unwrap();
        assert!(summary.all_succeeded());
        assert_eq!(sleeper.waits().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn interrupted_poll_aborts_run() {
        let dir = scratch("interrupt");
        let fake = Arc::new(FakeScheduler::new());
        let job = JobId(1000);
        fake.script_live(Some(job), [Ok(records(job, TaskState::Running, 0..4))]);

        let orchestrator = Orchestrator::new(
            fake,
            Arc::new(RecordingSleeper::cancelled_after(0)),
            config(&dir, false),
        );
        let err = orchestrator.run(&dates(), TEMPLATE).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Interrupted { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn plan_rejects_nothing_for_valid_dates() {
        let dir = std::env::temp_dir();
        let units = plan(&dates(), &config(&dir, true)).unwrap();
        assert_eq!(units.iter().map(CrawlDateUnit::array_size).collect::<Vec<_>>(), vec![4, 2]);
    }
}
