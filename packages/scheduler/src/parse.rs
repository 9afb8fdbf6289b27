//! Parsers for Slurm command output.
//!
//! `squeue` and `sacct` are both invoked with `|`-separated, header-less
//! output of five fields: job id, state, node list, elapsed time, job name.
//! The name is last so a `|` inside it cannot shift the other columns; rows
//! with only the first four fields are accepted without a name. Job ids
//! come in three shapes:
//!
//! * `12345` for a non-array job (reported as task index 0)
//! * `12345_7` for one array task
//! * `12345_[8-99%10]` for a collapsed range of pending array tasks, which
//!   is expanded into one record per index, up to [`MAX_ARRAY_TASKS`]

use std::time::Duration;

use crawl_runner_scheduler_models::{ArrayTaskRecord, JobId, TaskState};

use crate::SchedulerError;

/// Minimum number of `|`-separated fields in each row of task output.
const TASK_FIELDS: usize = 4;

/// Most task indices one job id field may expand to. Slurm's own
/// `MaxArraySize` ceiling is 4000001, so anything larger is not a real
/// array and is rejected before allocating.
pub const MAX_ARRAY_TASKS: usize = 4_000_001;

/// Maps a Slurm job state name onto a [`TaskState`].
///
/// Accepts both `squeue %T` and `sacct State` spellings, including
/// decorated forms such as `CANCELLED by 1234`. Returns `None` for state
/// names this crate does not know.
#[must_use]
pub fn parse_slurm_state(raw: &str) -> Option<TaskState> {
    let name = raw.split_whitespace().next()?.trim_end_matches('+');

    let state = match name {
        "PENDING" | "REQUEUED" | "REQUEUE_FED" | "REQUEUE_HOLD" | "SUSPENDED" | "STOPPED"
        | "RESV_DEL_HOLD" | "SPECIAL_EXIT" => TaskState::Pending,
        "RUNNING" | "CONFIGURING" | "COMPLETING" | "RESIZING" | "SIGNALING" | "STAGE_OUT" => {
            TaskState::Running
        }
        "COMPLETED" => TaskState::Completed,
        "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" | "PREEMPTED"
        | "REVOKED" => TaskState::Failed,
        "CANCELLED" => TaskState::Cancelled,
        "TIMEOUT" => TaskState::TimedOut,
        _ => return None,
    };

    Some(state)
}

/// Parses a Slurm elapsed/time value (`M:SS`, `H:MM:SS`, or `D-HH:MM:SS`).
///
/// Returns `None` for empty, `INVALID`, `UNLIMITED`, or malformed values.
#[must_use]
pub fn parse_elapsed(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (days, clock) = match raw.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, raw),
    };

    let parts = clock
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    Some(Duration::from_secs(
        days * 86_400 + hours * 3_600 + minutes * 60 + seconds,
    ))
}

/// Parses a Slurm job id field into the parent job and the task indices it
/// covers.
///
/// # Errors
///
/// Returns a description of the problem if the field is not one of the
/// recognized shapes.
pub fn parse_job_field(raw: &str) -> Result<(JobId, Vec<u32>), String> {
    let raw = raw.trim();

    let Some((job, tasks)) = raw.split_once('_') else {
        let job = raw.parse::<JobId>().map_err(|e| e.to_string())?;
        return Ok((job, vec![0]));
    };

    let job = job.parse::<JobId>().map_err(|e| e.to_string())?;

    if let Some(inner) = tasks.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated task range in {raw:?}"))?;
        return Ok((job, expand_task_ranges(inner)?));
    }

    let index = tasks
        .parse::<u32>()
        .map_err(|_| format!("invalid task index in {raw:?}"))?;
    Ok((job, vec![index]))
}

/// Expands a Slurm array range expression such as `0-3,7,10-20:5%4`.
///
/// The `%N` throttle suffix is ignored. Steps (`:N`) are honored. The
/// expansion is refused once it would exceed [`MAX_ARRAY_TASKS`] indices.
fn expand_task_ranges(expr: &str) -> Result<Vec<u32>, String> {
    let expr = expr.split_once('%').map_or(expr, |(ranges, _)| ranges);
    let mut indices = Vec::new();

    for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (range, step) = match part.split_once(':') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid step in range {part:?}"))?;
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (a.parse::<u32>(), b.parse::<u32>()),
            None => (range.parse::<u32>(), range.parse::<u32>()),
        };
        let (Ok(start), Ok(end)) = (start, end) else {
            return Err(format!("invalid task range {part:?}"));
        };
        if end < start {
            return Err(format!("descending task range {part:?}"));
        }

        let count = ((end - start) / step) as usize + 1;
        if indices.len() + count > MAX_ARRAY_TASKS {
            return Err(format!(
                "task range {part:?} expands past {MAX_ARRAY_TASKS} tasks"
            ));
        }
        indices.extend((start..=end).step_by(step as usize));
    }

    Ok(indices)
}

/// Normalizes a node list field; unassigned placeholders become `None`.
fn parse_node(raw: &str) -> Option<String> {
    let raw = raw.trim();
    match raw {
        "" | "None assigned" | "(null)" | "n/a" => None,
        _ if raw.starts_with('(') => None,
        _ => Some(raw.to_string()),
    }
}

/// Parses `|`-separated task rows from `squeue` or `sacct`.
///
/// Blank lines are ignored, so an empty output yields an empty list (the
/// view has no rows for the job). Any malformed row rejects the whole
/// output: a changed output format must not be mistaken for "no tasks".
///
/// # Errors
///
/// Returns [`SchedulerError::Parse`] naming `command` if any row has the
/// wrong number of fields, an unreadable job id, or an unknown state.
pub fn parse_task_rows(command: &str, output: &str) -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
    let parse_error = |message: String| SchedulerError::Parse {
        command: command.to_string(),
        message,
    };

    let mut records = Vec::new();

    for (line_no, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < TASK_FIELDS {
            return Err(parse_error(format!(
                "line {}: expected {TASK_FIELDS} fields, got {}: {line:?}",
                line_no + 1,
                fields.len()
            )));
        }

        let (job_id, indices) =
            parse_job_field(fields[0]).map_err(|e| parse_error(format!("line {}: {e}", line_no + 1)))?;
        let state = parse_slurm_state(fields[1]).ok_or_else(|| {
            parse_error(format!("line {}: unknown state {:?}", line_no + 1, fields[1]))
        })?;
        let node = parse_node(fields[2]);
        let elapsed = parse_elapsed(fields[3]);
        let job_name = (fields.len() > TASK_FIELDS)
            .then(|| fields[TASK_FIELDS..].join("|"))
            .filter(|name| !name.trim().is_empty());

        records.extend(indices.into_iter().map(|task_index| ArrayTaskRecord {
            job_id,
            task_index,
            state,
            node: node.clone(),
            elapsed,
            job_name: job_name.clone(),
        }));
    }

    Ok(records)
}

/// Parses the reply of `sbatch --parsable`: `<job id>` or
/// `<job id>;<cluster>`.
///
/// # Errors
///
/// Returns [`SchedulerError::Parse`] if no job id can be read.
pub fn parse_sbatch_reply(output: &str) -> Result<JobId, SchedulerError> {
    let first = output.lines().map(str::trim).find(|l| !l.is_empty());

    first
        .and_then(|line| line.split(';').next())
        .and_then(|id| id.parse::<JobId>().ok())
        .ok_or_else(|| SchedulerError::Parse {
            command: "sbatch".to_string(),
            message: format!("no job id in reply {output:?}"),
        })
}
