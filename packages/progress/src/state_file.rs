//! The `progress.state` file.
//!
//! Plain `KEY=value` lines so shell scripts can `source` it or `grep` it.
//! Each write goes to a temporary sibling first and is renamed over the
//! target, so readers never see a half-written file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crawl_runner_progress_models::ProgressSnapshot;

use crate::ProgressError;
use crate::report::{UNKNOWN, format_duration, format_eta};

/// Default file name inside the working directory.
pub const STATE_FILE_NAME: &str = "progress.state";

/// Keys written to the state file, in order.
pub const STATE_KEYS: &[&str] = &[
    "TOTAL_SEGMENTS",
    "PROCESSED_SEGMENTS",
    "CURRENT_CRAWL_DATE",
    "JOB_STATUS",
    "ACTIVE_JOB_ID",
    "COMPLETION_PERCENTAGE",
    "ELAPSED_TIME",
    "ETA",
];

/// Renders the state file contents for `snapshot`.
#[must_use]
pub fn render_state(snapshot: &ProgressSnapshot) -> String {
    let values = [
        snapshot.overall.total.to_string(),
        snapshot.overall.processed.to_string(),
        snapshot
            .current_date
            .as_ref()
            .map_or_else(|| "None".to_string(), |d| d.date.clone()),
        snapshot.job.status.to_string(),
        snapshot
            .job
            .job_id
            .map_or_else(|| UNKNOWN.to_string(), |id| id.to_string()),
        format!("{:.2}", snapshot.overall.percentage),
        format_duration(snapshot.elapsed_secs),
        format_eta(snapshot.eta_secs),
    ];

    STATE_KEYS
        .iter()
        .zip(values)
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect()
}

/// Parses `KEY=value` lines. Lines without `=` are ignored.
#[must_use]
pub fn parse_state(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Single writer for one state file.
///
/// Remembers the modification time of its own last write. If the file's
/// modification time differs on the next write, another process wrote it
/// in between; that is logged as a warning and the write goes ahead.
#[derive(Debug)]
pub struct StateFileWriter {
    path: PathBuf,
    last_written: Option<SystemTime>,
}

impl StateFileWriter {
    /// Writer for `path`. Nothing is written until [`Self::write`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: None,
        }
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    /// Atomically replaces the state file with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] if the temporary file cannot be
    /// written or renamed.
    pub fn write(&mut self, snapshot: &ProgressSnapshot) -> Result<(), ProgressError> {
        if let Some(ours) = self.last_written
            && self.modified().is_some_and(|current| current != ours)
        {
            log::warn!(
                "{} was modified by another process since the last update; \
                 is a second monitor running on this directory?",
                self.path.display()
            );
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        std::fs::write(&tmp, render_state(snapshot)).map_err(|source| ProgressError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| ProgressError::Io {
            path: self.path.clone(),
            source,
        })?;

        self.last_written = self.modified();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crawl_runner_progress_models::{Completion, JobInfo, JobStatus, Trend};
    use crawl_runner_scheduler::models::JobId;

    fn snapshot(processed: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            overall: Completion::new(processed, 400),
            current_date: None,
            job: JobInfo {
                job_id: Some(JobId(77)),
                status: JobStatus::Completed,
                ..JobInfo::default()
            },
            elapsed_secs: 7_200.0,
            eta_secs: None,
            overall_rate_per_hour: None,
            recent_rate_per_hour: None,
            trend: Trend::Unknown,
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "crawl_runner_state_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn renders_every_key_in_order() {
        let text = render_state(&snapshot(100));
        let keys: Vec<&str> = text
            .lines()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();
        assert_eq!(keys, STATE_KEYS);

        let state = parse_state(&text);
        assert_eq!(state["TOTAL_SEGMENTS"], "400");
        assert_eq!(state["PROCESSED_SEGMENTS"], "100");
        assert_eq!(state["CURRENT_CRAWL_DATE"], "None");
        assert_eq!(state["JOB_STATUS"], "COMPLETED");
        assert_eq!(state["ACTIVE_JOB_ID"], "77");
        assert_eq!(state["COMPLETION_PERCENTAGE"], "25.00");
        assert_eq!(state["ELAPSED_TIME"], "2h 0m");
        assert_eq!(state["ETA"], "Unknown");
    }

    #[test]
    fn writes_and_replaces_file() {
        let dir = scratch("replace");
        let path = dir.join(STATE_FILE_NAME);
        let mut writer = StateFileWriter::new(&path);

        writer.write(&snapshot(10)).unwrap();
        writer.write(&snapshot(20)).unwrap();

        let state = parse_state(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(state["PROCESSED_SEGMENTS"], "20");
        assert!(!dir.join("progress.state.tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unwritable_location_is_error() {
        let mut writer = StateFileWriter::new("/nonexistent/dir/progress.state");
        assert!(matches!(
            writer.write(&snapshot(1)),
            Err(ProgressError::Io { .. })
        ));
    }
}
