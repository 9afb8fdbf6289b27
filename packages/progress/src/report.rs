//! Text and JSON renderings of a [`ProgressSnapshot`].
//!
//! All three forms show the same counts and the same two-decimal
//! percentage. Values that are not known render as `Unknown` in text and
//! `null` in JSON, never as zero.

use std::fmt::Write as _;

use crawl_runner_progress_models::{DateProgress, ProgressSnapshot};
use serde_json::{Value, json};
use strum_macros::{AsRefStr, Display, EnumString};

/// Placeholder for values that cannot be determined.
pub const UNKNOWN: &str = "Unknown";

/// Timestamp format used in text output and the history log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format for monitor and status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    /// Multi-line human-readable report.
    #[default]
    Detailed,
    /// One line per poll.
    Compact,
    /// Pretty-printed JSON document.
    Json,
}

/// Renders `snapshot` in `format`.
#[must_use]
pub fn render(format: OutputFormat, snapshot: &ProgressSnapshot) -> String {
    match format {
        OutputFormat::Detailed => render_detailed(snapshot),
        OutputFormat::Compact => render_compact(snapshot),
        OutputFormat::Json => render_json(snapshot),
    }
}

/// Formats seconds as `Xd Yh Zm`, `Yh Zm`, or `Zm`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// [`format_duration`], or [`UNKNOWN`].
#[must_use]
pub fn format_eta(seconds: Option<f64>) -> String {
    seconds.map_or_else(|| UNKNOWN.to_string(), format_duration)
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| UNKNOWN.to_string(), |r| format!("{r:.1} segments/hour"))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn job_id_text(snapshot: &ProgressSnapshot) -> String {
    snapshot
        .job
        .job_id
        .map_or_else(|| UNKNOWN.to_string(), |id| id.to_string())
}

/// Multi-line report.
#[must_use]
pub fn render_detailed(snapshot: &ProgressSnapshot) -> String {
    let o = &snapshot.overall;
    let mut out = String::new();

    let _ = writeln!(out, "Crawl progress at {}", snapshot.timestamp.format(TIMESTAMP_FORMAT));
    let _ = writeln!(out);
    let _ = writeln!(out, "Overall");
    let _ = writeln!(out, "  Total segments:     {}", o.total);
    let _ = writeln!(out, "  Processed:          {}", o.processed);
    let _ = writeln!(out, "  Remaining:          {}", o.remaining);
    let _ = writeln!(out, "  Completion:         {:.2}%", o.percentage);
    if o.overflow > 0 {
        let _ = writeln!(
            out,
            "  Overflow:           {} (more artifacts than declared segments)",
            o.overflow
        );
    }

    let _ = writeln!(out);
    match &snapshot.current_date {
        Some(DateProgress {
            date,
            completion,
            eta_secs,
        }) => {
            let _ = writeln!(out, "Current crawl date {date}");
            let _ = writeln!(
                out,
                "  Processed:          {}/{} ({:.2}%)",
                completion.processed, completion.total, completion.percentage
            );
            let _ = writeln!(out, "  ETA:                {}", format_eta(*eta_secs));
        }
        None => {
            let _ = writeln!(out, "Current crawl date: none (all dates processed)");
        }
    }

    let job = &snapshot.job;
    let _ = writeln!(out);
    let _ = writeln!(out, "Scheduler");
    let _ = writeln!(out, "  Job id:             {}", job_id_text(snapshot));
    let _ = writeln!(out, "  Status:             {}", job.status);
    match &job.tasks {
        Some(t) => {
            let _ = writeln!(
                out,
                "  Tasks:              {} pending, {} running, {} completed, {} failed, {} cancelled, {} timed out",
                t.pending, t.running, t.completed, t.failed, t.cancelled, t.timed_out
            );
        }
        None => {
            let _ = writeln!(out, "  Tasks:              {UNKNOWN}");
        }
    }
    if let Some(note) = &job.discrepancy {
        let _ = writeln!(out, "  Warning:            {note}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Performance");
    let _ = writeln!(out, "  Elapsed:            {}", format_duration(snapshot.elapsed_secs));
    let _ = writeln!(out, "  ETA:                {}", format_eta(snapshot.eta_secs));
    let _ = writeln!(
        out,
        "  Overall rate:       {}",
        format_rate(snapshot.overall_rate_per_hour)
    );
    let _ = writeln!(
        out,
        "  Recent rate:        {}",
        format_rate(snapshot.recent_rate_per_hour)
    );
    let _ = write!(out, "  Trend:              {}", snapshot.trend);

    out
}

/// One-line report.
#[must_use]
pub fn render_compact(snapshot: &ProgressSnapshot) -> String {
    let o = &snapshot.overall;
    let date = snapshot.current_date.as_ref().map_or_else(
        || "date none".to_string(),
        |d| format!("date {} {:.2}%", d.date, d.completion.percentage),
    );
    let mut line = format!(
        "[{}] {:.2}% ({}/{}) | {date} | job {} {} | ETA {}",
        snapshot.timestamp.format(TIMESTAMP_FORMAT),
        o.percentage,
        o.processed,
        o.total,
        job_id_text(snapshot),
        snapshot.job.status,
        format_eta(snapshot.eta_secs),
    );
    if snapshot.job.discrepancy.is_some() {
        line.push_str(" | DISCREPANCY");
    }
    line
}

/// Machine-readable document.
#[must_use]
pub fn snapshot_json(snapshot: &ProgressSnapshot) -> Value {
    let o = &snapshot.overall;
    let current = snapshot.current_date.as_ref().map_or(Value::Null, |d| {
        json!({
            "date": d.date,
            "total_segments": d.completion.total,
            "processed_segments": d.completion.processed,
            "percentage": round2(d.completion.percentage),
            "eta": d.eta_secs.map(format_duration),
        })
    });
    let tasks = snapshot.job.tasks.map_or(Value::Null, |t| {
        json!({
            "pending": t.pending,
            "running": t.running,
            "completed": t.completed,
            "failed": t.failed,
            "cancelled": t.cancelled,
            "timed_out": t.timed_out,
        })
    });

    json!({
        "timestamp": snapshot.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        "overall_progress": {
            "total_segments": o.total,
            "processed_segments": o.processed,
            "remaining_segments": o.remaining,
            "percentage": round2(o.percentage),
            "overflow_segments": o.overflow,
        },
        "current_crawl_date": current,
        "job_info": {
            "job_id": snapshot.job.job_id.map(|id| id.0),
            "status": snapshot.job.status.as_ref(),
            "tasks": tasks,
            "scheduler_completed_segments": snapshot.job.scheduler_completed_segments,
            "discrepancy": snapshot.job.discrepancy,
        },
        "performance": {
            "elapsed_seconds": snapshot.elapsed_secs.round(),
            "elapsed": format_duration(snapshot.elapsed_secs),
            "eta_seconds": snapshot.eta_secs.map(f64::round),
            "eta": snapshot.eta_secs.map(format_duration),
            "overall_rate_per_hour": snapshot.overall_rate_per_hour.map(round2),
            "recent_rate_per_hour": snapshot.recent_rate_per_hour.map(round2),
            "trend": snapshot.trend.as_ref(),
        },
    })
}

/// [`snapshot_json`], pretty-printed.
#[must_use]
pub fn render_json(snapshot: &ProgressSnapshot) -> String {
    format!("{:#}", snapshot_json(snapshot))
}
