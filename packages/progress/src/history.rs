//! Append-only sample log (`progress_history.log`).
//!
//! One line per monitor cycle:
//!
//! ```text
//! [2024-01-01 12:00:00] PROCESSED=100/1000 (10.00%) CURRENT_DATE=202104 ELAPSED=3600
//! ```
//!
//! The parser only requires the timestamp and the `PROCESSED=p/t` pair, so
//! logs written before the other fields existed still read back.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use crawl_runner_progress_models::{ProgressSnapshot, percentage};
use regex::Regex;

use crate::ProgressError;
use crate::report::{TIMESTAMP_FORMAT, format_duration};

/// Default file name inside the working directory.
pub const HISTORY_FILE_NAME: &str = "progress_history.log";

static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[([0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2})\] PROCESSED=([0-9]+)/([0-9]+)(?: \([0-9.]+%\))?(?: CURRENT_DATE=([^ ]+))?(?: ELAPSED=([0-9]+))?",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// One parsed history line.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// When the sample was taken.
    pub timestamp: NaiveDateTime,
    /// Processed segments.
    pub processed: u64,
    /// Declared total.
    pub total: u64,
    /// Recomputed from `processed` and `total`.
    pub percentage: f64,
    /// Date being worked on, if recorded.
    pub current_date: Option<String>,
    /// Monitor elapsed seconds, if recorded.
    pub elapsed_secs: Option<u64>,
}

/// Formats the history line for `snapshot`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_entry(snapshot: &ProgressSnapshot) -> String {
    format!(
        "[{}] PROCESSED={}/{} ({:.2}%) CURRENT_DATE={} ELAPSED={}",
        snapshot.timestamp.format(TIMESTAMP_FORMAT),
        snapshot.overall.processed,
        snapshot.overall.total,
        snapshot.overall.percentage,
        snapshot
            .current_date
            .as_ref()
            .map_or("None", |d| d.date.as_str()),
        snapshot.elapsed_secs.max(0.0) as u64,
    )
}

/// Parses one history line.
#[must_use]
pub fn parse_line(line: &str) -> Option<HistoryEntry> {
    let caps = LINE.captures(line.trim())?;
    let timestamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
    let processed: u64 = caps[2].parse().ok()?;
    let total: u64 = caps[3].parse().ok()?;
    Some(HistoryEntry {
        timestamp,
        processed,
        total,
        percentage: percentage(processed.min(total), total),
        current_date: caps
            .get(4)
            .map(|m| m.as_str())
            .filter(|d| *d != "None")
            .map(str::to_string),
        elapsed_secs: caps.get(5).and_then(|m| m.as_str().parse().ok()),
    })
}

/// Appends the line for `snapshot` to the log at `path`, creating it if
/// needed.
///
/// # Errors
///
/// Returns [`ProgressError::Io`] if the file cannot be opened or written.
pub fn append(path: &Path, snapshot: &ProgressSnapshot) -> Result<(), ProgressError> {
    let io_err = |source| ProgressError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    writeln!(file, "{}", format_entry(snapshot)).map_err(io_err)
}

/// Reads every parseable line of the log. Unparseable lines are skipped.
/// A missing file is an empty history.
///
/// # Errors
///
/// Returns [`ProgressError::Io`] if the file exists but cannot be read.
pub fn read_history(path: &Path) -> Result<Vec<HistoryEntry>, ProgressError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ProgressError::Io {
                path: PathBuf::from(path),
                source,
            });
        }
    };

    let mut skipped = 0_usize;
    let entries: Vec<_> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| {
            let entry = parse_line(l);
            if entry.is_none() {
                skipped += 1;
            }
            entry
        })
        .collect();
    if skipped > 0 {
        log::warn!("Skipped {skipped} unreadable line(s) in {}", path.display());
    }
    Ok(entries)
}

/// Aggregate view of a history log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    /// Number of entries.
    pub entries: usize,
    /// First entry.
    pub first: HistoryEntry,
    /// Last entry.
    pub last: HistoryEntry,
    /// Segments processed between the first and last entry.
    pub processed_delta: i64,
    /// Seconds between the first and last entry.
    pub span_secs: i64,
    /// `processed_delta` per hour over the span, if the span is positive.
    pub rate_per_hour: Option<f64>,
}

/// Summarizes `entries` (assumed in log order).
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub fn summarize(entries: &[HistoryEntry]) -> Option<HistorySummary> {
    let first = entries.first()?.clone();
    let last = entries.last()?.clone();
    let processed_delta = last.processed as i64 - first.processed as i64;
    let span_secs = (last.timestamp - first.timestamp).num_seconds();
    let rate_per_hour =
        (span_secs > 0).then(|| processed_delta as f64 * 3600.0 / span_secs as f64);

    Some(HistorySummary {
        entries: entries.len(),
        first,
        last,
        processed_delta,
        span_secs,
        rate_per_hour,
    })
}

/// Human-readable rendering of a [`HistorySummary`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn render_summary(summary: &HistorySummary) -> String {
    let rate = summary
        .rate_per_hour
        .map_or_else(|| "Unknown".to_string(), |r| format!("{r:.1} segments/hour"));
    format!(
        "{} samples from {} to {} ({})\n\
         Processed: {}/{} -> {}/{} ({:+} segments)\n\
         Completion: {:.2}% -> {:.2}%\n\
         Average rate: {rate}",
        summary.entries,
        summary.first.timestamp.format(TIMESTAMP_FORMAT),
        summary.last.timestamp.format(TIMESTAMP_FORMAT),
        format_duration(summary.span_secs.max(0) as f64),
        summary.first.processed,
        summary.first.total,
        summary.last.processed,
        summary.last.total,
        summary.processed_delta,
        summary.first.percentage,
        summary.last.percentage,
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use chrono::NaiveDate;
    use crawl_runner_progress_models::{Completion, DateProgress, JobInfo, Trend};

    fn snapshot(hour: u32, processed: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            overall: Completion::new(processed, 1_000),
            current_date: Some(DateProgress {
                date: "202104".to_string(),
                completion: Completion::new(processed, 1_000),
                eta_secs: None,
            }),
            job: JobInfo::default(),
            elapsed_secs: f64::from(hour) * 3600.0,
            eta_secs: None,
            overall_rate_per_hour: None,
            recent_rate_per_hour: None,
            trend: Trend::Unknown,
        }
    }

    #[test]
    fn formats_and_parses_entry() {
        let line = format_entry(&snapshot(1, 100));
        assert_eq!(
            line,
            "[2024-01-01 01:00:00] PROCESSED=100/1000 (10.00%) CURRENT_DATE=202104 ELAPSED=3600"
        );
        let entry = parse_line(&line).unwrap();
        assert_eq!(entry.processed, 100);
        assert_eq!(entry.total, 1_000);
        assert_eq!(entry.current_date.as_deref(), Some("202104"));
        assert_eq!(entry.elapsed_secs, Some(3_600));
        assert!((entry.percentage - 10.0).abs() < 1e-9);
    }

    #[test]
    fn parses_minimal_legacy_line() {
        let entry = parse_line("[2024-01-01 12:00:00] PROCESSED=100/1000 (10%) CURRENT_DATE=202350")
            .unwrap();
        assert_eq!(entry.current_date.as_deref(), Some("202350"));
        assert_eq!(entry.elapsed_secs, None);
        assert!(parse_line("garbage").is_none());
        assert!(parse_line("[2024-13-01 12:00:00] PROCESSED=1/2").is_none());
    }

    #[test]
    fn append_then_read_back() {
        let dir = std::env::temp_dir().join(format!("crawl_runner_history_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(HISTORY_FILE_NAME);

        append(&path, &snapshot(1, 100)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "not a history line"))
            .unwrap();
        append(&path, &snapshot(3, 300)).unwrap();

        let entries = read_history(&path).unwrap();
        assert_eq!(entries.len(), 2);

        let summary = summarize(&entries).unwrap();
        assert_eq!(summary.processed_delta, 200);
        assert_eq!(summary.span_secs, 7_200);
        assert!((summary.rate_per_hour.unwrap() - 100.0).abs() < 1e-9);
        assert!(render_summary(&summary).contains("Average rate: 100.0 segments/hour"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_log_is_empty() {
        let entries = read_history(Path::new("/nonexistent/progress_history.log")).unwrap();
        assert!(entries.is_empty());
        assert!(summarize(&entries).is_none());
    }
}
