//! Reconciliation of the live queue with the accounting store.
//!
//! A task can leave the live queue before accounting records it, and
//! accounting can lag behind a task that is still listed as running. For
//! each task index the merged view picks one record:
//!
//! 1. a terminal accounting record (the durable one),
//! 2. otherwise a terminal live record,
//! 3. otherwise the live record (current non-terminal state),
//! 4. otherwise whatever accounting reported.
//!
//! An array of `n` tasks is resolved once every index in `0..n` has a
//! terminal state in the merged view.
//!
//! [`poll_merged`] is the one place both views are read for a job: the run
//! loop and the monitor both go through it.

use std::collections::BTreeMap;

use crawl_runner_scheduler_models::{ArrayTaskRecord, JobId, TaskCounts, TaskState};

use crate::SchedulerAdapter;
use crate::poll::Sleeper;
use crate::retry::{self, RetryPolicy};

/// One record per task index, combined from both scheduler views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedView {
    tasks: BTreeMap<u32, ArrayTaskRecord>,
}

/// Collapses duplicate rows for one index (requeued tasks appear more than
/// once in accounting), preferring the last terminal row.
fn latest_by_index(records: &[ArrayTaskRecord]) -> BTreeMap<u32, &ArrayTaskRecord> {
    let mut by_index: BTreeMap<u32, &ArrayTaskRecord> = BTreeMap::new();
    for record in records {
        match by_index.get(&record.task_index) {
            Some(existing) if existing.state.is_terminal() && !record.state.is_terminal() => {}
            _ => {
                by_index.insert(record.task_index, record);
            }
        }
    }
    by_index
}

/// Merges live-queue and accounting records for one job.
#[must_use]
pub fn merge_views(live: &[ArrayTaskRecord], history: &[ArrayTaskRecord]) -> MergedView {
    let live = latest_by_index(live);
    let history = latest_by_index(history);

    let mut tasks = BTreeMap::new();
    let indices = live.keys().chain(history.keys()).copied();

    for index in indices {
        if tasks.contains_key(&index) {
            continue;
        }
        let l = live.get(&index).copied();
        let h = history.get(&index).copied();

        let chosen = match (l, h) {
            (_, Some(h)) if h.state.is_terminal() => h,
            (Some(l), _) if l.state.is_terminal() => l,
            (Some(l), _) => l,
            (None, Some(h)) => h,
            (None, None) => continue,
        };
        tasks.insert(index, chosen.clone());
    }

    MergedView { tasks }
}

/// Keeps only the records that belong to `job`.
#[must_use]
pub fn records_for_job(records: &[ArrayTaskRecord], job: JobId) -> Vec<ArrayTaskRecord> {
    records.iter().filter(|r| r.job_id == job).cloned().collect()
}

/// Reads both views for `job`, each with retries, and merges them.
///
/// A view that stays unreadable is logged and treated as empty, so the
/// other view still counts. Returns `None` only when neither view could be
/// read, in which case the caller should skip this cycle.
pub async fn poll_merged(
    scheduler: &dyn SchedulerAdapter,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
    job: JobId,
) -> Option<MergedView> {
    let live = retry::with_fixed_backoff(policy, sleeper, "squeue", || {
        scheduler.query_live(Some(job))
    })
    .await;
    let history = retry::with_fixed_backoff(policy, sleeper, "sacct", || {
        scheduler.query_history(job)
    })
    .await;

    match (live, history) {
        (Err(live_err), Err(history_err)) => {
            log::warn!(
                "Skipping status check for job {job}: live queue: {live_err}; accounting: {history_err}"
            );
            None
        }
        (live, history) => {
            if let Err(e) = &live {
                log::warn!("Live queue unavailable for job {job}: {e}");
            }
            if let Err(e) = &history {
                log::warn!("Accounting unavailable for job {job}: {e}");
            }
            let live = live.unwrap_or_default();
            let history = history.unwrap_or_default();
            Some(merge_views(
                &records_for_job(&live, job),
                &records_for_job(&history, job),
            ))
        }
    }
}

impl MergedView {
    /// Merged state of one task, if either view reported it.
    #[must_use]
    pub fn state(&self, index: u32) -> Option<TaskState> {
        self.tasks.get(&index).map(|r| r.state)
    }

    /// All merged records, ordered by task index.
    pub fn records(&self) -> impl Iterator<Item = &ArrayTaskRecord> {
        self.tasks.values()
    }

    /// Whether neither view reported any task.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task counts by merged state.
    #[must_use]
    pub fn counts(&self) -> TaskCounts {
        self.tasks.values().map(|r| r.state).collect()
    }

    /// Indices in `0..array_size` that are not yet terminal (including
    /// indices neither view has reported).
    #[must_use]
    pub fn unresolved(&self, array_size: u32) -> Vec<u32> {
        (0..array_size)
            .filter(|i| !self.state(*i).is_some_and(TaskState::is_terminal))
            .collect()
    }

    /// Whether every index in `0..array_size` is terminal.
    #[must_use]
    pub fn is_resolved(&self, array_size: u32) -> bool {
        (0..array_size).all(|i| self.state(i).is_some_and(TaskState::is_terminal))
    }

    /// Indices whose merged state is `state`.
    #[must_use]
    pub fn indices_in(&self, state: TaskState) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.task_index)
            .collect()
    }
}
