//! Rolling rate and ETA estimation.
//!
//! The estimator holds the most recent samples in a bounded ring (oldest
//! evicted first). All rates are computed from clamped processed counts,
//! so a spurious overflow never inflates the rate.
//!
//! * overall rate: `processed / elapsed` of the latest sample
//! * recent rate: change over the last `recent_window` samples
//! * ETA: `remaining / rate`, preferring the recent rate; unknown with
//!   fewer than two samples or a non-positive rate

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use crawl_runner_progress_models::{
    Completion, DateProgress, JobInfo, ProgressSample, ProgressSnapshot, Trend,
};

/// Samples kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 100;

/// Samples used for the recent rate.
pub const DEFAULT_RECENT_WINDOW: usize = 10;

/// Relative band around the overall rate considered steady.
pub const TREND_TOLERANCE: f64 = 0.10;

const SECS_PER_HOUR: f64 = 3600.0;

/// Raw counts for one crawl date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateObservation {
    /// Date identifier.
    pub date: String,
    /// Declared segment count.
    pub total: u64,
    /// Non-empty artifacts found, unclamped.
    pub processed: u64,
}

/// Everything observed in one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Local time of the observation.
    pub timestamp: NaiveDateTime,
    /// Seconds since monitoring started.
    pub elapsed_secs: f64,
    /// Declared total across all dates.
    pub total: u64,
    /// Processed segments across all dates, unclamped.
    pub processed: u64,
    /// The first unfinished date, if any.
    pub current_date: Option<DateObservation>,
    /// Scheduler view of the tracked job.
    pub job: JobInfo,
}

impl Observation {
    /// The sample this observation contributes to the history.
    #[must_use]
    pub const fn sample(&self) -> ProgressSample {
        ProgressSample {
            timestamp: self.timestamp,
            elapsed_secs: self.elapsed_secs,
            processed: self.processed,
            total: self.total,
        }
    }
}

/// Bounded sample history with derived rates.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    samples: VecDeque<ProgressSample>,
    capacity: usize,
    recent_window: usize,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RECENT_WINDOW)
    }
}

#[allow(clippy::cast_precision_loss)]
fn clamped(sample: &ProgressSample) -> f64 {
    sample.processed.min(sample.total) as f64
}

impl ProgressEstimator {
    /// An estimator keeping `capacity` samples and computing the recent
    /// rate over the last `recent_window` of them. Both are at least 2.
    #[must_use]
    pub fn new(capacity: usize, recent_window: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            recent_window: recent_window.max(2),
        }
    }

    /// Appends a sample, evicting the oldest when full.
    pub fn record(&mut self, sample: ProgressSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &ProgressSample> {
        self.samples.iter()
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Segments per second since monitoring started.
    #[must_use]
    pub fn overall_rate(&self) -> Option<f64> {
        let last = self.samples.back()?;
        (last.elapsed_secs > 0.0).then(|| clamped(last) / last.elapsed_secs)
    }

    /// Segments per second over the recent window.
    #[must_use]
    pub fn recent_rate(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let window = self.recent_window.min(self.samples.len());
        let first = &self.samples[self.samples.len() - window];
        let last = self.samples.back()?;
        let dt = last.elapsed_secs - first.elapsed_secs;
        (dt > 0.0).then(|| (clamped(last) - clamped(first)) / dt)
    }

    /// The rate ETAs are based on: recent if known, else overall.
    #[must_use]
    pub fn eta_rate(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        self.recent_rate()
            .or_else(|| self.overall_rate())
            .filter(|rate| *rate > 0.0)
    }

    /// Seconds to process `remaining` segments at [`Self::eta_rate`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta_secs(&self, remaining: u64) -> Option<f64> {
        self.eta_rate().map(|rate| remaining as f64 / rate)
    }

    /// Recent rate compared with the overall rate.
    #[must_use]
    pub fn trend(&self) -> Trend {
        let (Some(recent), Some(overall)) = (self.recent_rate(), self.overall_rate()) else {
            return Trend::Unknown;
        };
        if recent > overall * (1.0 + TREND_TOLERANCE) {
            Trend::Accelerating
        } else if recent < overall * (1.0 - TREND_TOLERANCE) {
            Trend::Decelerating
        } else {
            Trend::Steady
        }
    }

    /// Builds the snapshot for `observation` from the samples recorded so
    /// far. Does not record `observation` itself.
    #[must_use]
    pub fn snapshot(&self, observation: &Observation) -> ProgressSnapshot {
        let overall = Completion::new(observation.processed, observation.total);
        let current_date = observation.current_date.as_ref().map(|d| {
            let completion = Completion::new(d.processed, d.total);
            DateProgress {
                date: d.date.clone(),
                eta_secs: self.eta_secs(completion.remaining),
                completion,
            }
        });

        ProgressSnapshot {
            timestamp: observation.timestamp,
            overall,
            current_date,
            job: observation.job.clone(),
            elapsed_secs: observation.elapsed_secs.max(0.0),
            eta_secs: self.eta_secs(overall.remaining),
            overall_rate_per_hour: self.overall_rate().map(|r| r * SECS_PER_HOUR),
            recent_rate_per_hour: self.recent_rate().map(|r| r * SECS_PER_HOUR),
            trend: self.trend(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::TimeDelta::seconds(i64::from(secs))
    }

    fn sample(secs: u32, processed: u64) -> ProgressSample {
        ProgressSample {
            timestamp: at(secs),
            elapsed_secs: f64::from(secs),
            processed,
            total: 1_000,
        }
    }

    fn observation(secs: u32, processed: u64) -> Observation {
        Observation {
            timestamp: at(secs),
            elapsed_secs: f64::from(secs),
            total: 1_000,
            processed,
            current_date: None,
            job: JobInfo::default(),
        }
    }

    #[test]
    fn evicts_oldest_sample_when_full() {
        let mut est = ProgressEstimator::new(3, 10);
        for i in 0..5 {
            est.record(sample(i * 10, u64::from(i)));
        }
        assert_eq!(est.len(), 3);
        assert_eq!(est.samples().next().unwrap().processed, 2);
    }

    #[test]
    fn eta_unknown_with_fewer_than_two_samples() {
        let mut est = ProgressEstimator::default();
        assert_eq!(est.eta_secs(100), None);
        est.record(sample(60, 10));
        assert!(est.overall_rate().is_some());
        assert_eq!(est.eta_secs(100), None);
    }

    #[test]
    fn eta_unknown_when_rate_is_not_positive() {
        let mut est = ProgressEstimator::default();
        est.record(sample(0, 0));
        est.record(sample(60, 0));
        assert_eq!(est.eta_secs(100), None);

        // Files removed between samples: negative recent rate.
        let mut est = ProgressEstimator::default();
        est.record(sample(60, 50));
        est.record(sample(120, 40));
        assert_eq!(est.eta_secs(100), None);
    }

    #[test]
    fn eta_uses_recent_rate() {
        let mut est = ProgressEstimator::default();
        est.record(sample(100, 100));
        est.record(sample(200, 300));
        // recent = 200 / 100 = 2/s
        let eta = est.eta_secs(700).unwrap();
        assert!((eta - 350.0).abs() < 1e-9);
    }

    #[test]
    fn eta_is_never_negative() {
        let mut est = ProgressEstimator::default();
        for (i, processed) in [0_u64, 5, 3, 9, 40, 38, 100].into_iter().enumerate() {
            est.record(sample(u32::try_from(i).unwrap() * 30 + 30, processed));
            if let Some(eta) = est.eta_secs(500) {
                assert!(eta >= 0.0);
            }
        }
    }

    #[test]
    fn recent_rate_uses_window() {
        let mut est = ProgressEstimator::new(100, 2);
        est.record(sample(100, 0));
        est.record(sample(200, 100));
        est.record(sample(300, 400));
        // window of two: (400 - 100) / 100
        assert!((est.recent_rate().unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn trend_bands() {
        let mut steady = ProgressEstimator::default();
        steady.record(sample(100, 100));
        steady.record(sample(200, 200));
        assert_eq!(steady.trend(), Trend::Steady);

        let mut fast = ProgressEstimator::default();
        fast.record(sample(100, 10));
        fast.record(sample(200, 200));
        assert_eq!(fast.trend(), Trend::Accelerating);

        let mut slow = ProgressEstimator::default();
        slow.record(sample(100, 190));
        slow.record(sample(200, 200));
        assert_eq!(slow.trend(), Trend::Decelerating);

        assert_eq!(ProgressEstimator::default().trend(), Trend::Unknown);
    }

    #[test]
    fn snapshot_clamps_overflow() {
        let mut est = ProgressEstimator::default();
        let obs = observation(60, 1_200);
        est.record(obs.sample());
        let snap = est.snapshot(&obs);
        assert_eq!(snap.overall.processed, 1_000);
        assert_eq!(snap.overall.overflow, 200);
        assert_eq!(snap.overall.remaining, 0);
        assert!((snap.overall.percentage - 100.0).abs() < f64::EPSILON);
        // 1000 clamped / 60s = 60_000 per hour
        assert!((snap.overall_rate_per_hour.unwrap() - 60_000.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_includes_current_date_eta() {
        let mut est = ProgressEstimator::default();
        est.record(sample(100, 100));
        est.record(sample(200, 200));
        let mut obs = observation(200, 200);
        obs.current_date = Some(DateObservation {
            date: "202104".to_string(),
            total: 500,
            processed: 200,
        });
        let snap = est.snapshot(&obs);
        let date = snap.current_date.unwrap();
        assert_eq!(date.completion.remaining, 300);
        assert!((date.eta_secs.unwrap() - 300.0).abs() < 1e-9);
        assert!((snap.eta_secs.unwrap() - 800.0).abs() < 1e-9);
    }
}
