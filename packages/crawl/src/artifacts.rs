//! Output artifact counting.
//!
//! The worker writes one file per finished segment, named
//! `crawldata<date>segment<NNNNN>.parquet`. A segment counts as processed
//! only if its file exists and is non-empty; a zero-length file is what a
//! crashed or still-running writer leaves behind.
//!
//! Counting is the only completion signal that does not come from the
//! scheduler, so callers never treat an unavailable count as "no work done"
//! silently: [`ArtifactCounter::scan`] reports [`ArtifactCountUnavailable`],
//! and [`ArtifactCounter::scan_or_empty`] logs it before falling back to an
//! empty index.
//!
//! Callers walk the directory once per cycle and answer every question for
//! that cycle from the returned [`ArtifactIndex`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crawl_runner_crawl_models::CrawlDateUnit;

/// The artifact directory could not be listed.
#[derive(Debug, thiserror::Error)]
#[error("cannot list artifacts under {path}: {source}")]
pub struct ArtifactCountUnavailable {
    /// Directory that failed.
    pub path: PathBuf,
    /// Underlying error.
    pub source: std::io::Error,
}

/// File naming convention for per-segment output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    /// Leading literal before the date.
    pub prefix: String,
    /// Literal between the date and the segment number.
    pub infix: String,
    /// Trailing literal, including the extension dot.
    pub suffix: String,
}

impl Default for ArtifactPattern {
    fn default() -> Self {
        Self {
            prefix: "crawldata".to_string(),
            infix: "segment".to_string(),
            suffix: ".parquet".to_string(),
        }
    }
}

impl ArtifactPattern {
    /// File name the worker writes for `segment` of `date`.
    #[must_use]
    pub fn file_name(&self, date: &str, segment: u64) -> String {
        format!(
            "{}{date}{}{segment:05}{}",
            self.prefix, self.infix, self.suffix
        )
    }

    /// Splits a file name into `(date, segment)` if it follows the pattern.
    ///
    /// The date is everything between the prefix and the last infix, so a
    /// date that is a prefix of another (`2021` vs `202104`) never matches
    /// the other's files.
    #[must_use]
    pub fn parse<'a>(&self, name: &'a str) -> Option<(&'a str, u64)> {
        let body = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        let (date, digits) = body.rsplit_once(self.infix.as_str())?;
        if date.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((date, digits.parse().ok()?))
    }
}

/// Non-empty artifacts found by one directory walk, grouped by date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactIndex {
    segments: BTreeMap<String, BTreeSet<u64>>,
}

impl ArtifactIndex {
    /// Number of processed segments for `date`, whatever their numbers.
    #[must_use]
    pub fn count(&self, date: &str) -> u64 {
        self.segments.get(date).map_or(0, |s| s.len() as u64)
    }

    /// Number of processed segments for `date` numbered below
    /// `total_segments`. Stray files past the declared range are ignored.
    #[must_use]
    pub fn count_within(&self, date: &str, total_segments: u64) -> u64 {
        self.segments
            .get(date)
            .map_or(0, |s| s.range(..total_segments).count() as u64)
    }

    /// Number of processed segments across all dates.
    #[must_use]
    pub fn count_all(&self) -> u64 {
        self.segments.values().map(|s| s.len() as u64).sum()
    }

    /// Per-date counts.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.segments
            .iter()
            .map(|(date, segs)| (date.clone(), segs.len() as u64))
            .collect()
    }

    /// Segment numbers with a non-empty artifact for `date`.
    #[must_use]
    pub fn segments(&self, date: &str) -> BTreeSet<u64> {
        self.segments.get(date).cloned().unwrap_or_default()
    }

    /// Segments of `unit` that have no non-empty artifact yet.
    #[must_use]
    pub fn missing_segments(&self, unit: &CrawlDateUnit) -> Vec<u64> {
        let done = self.segments.get(unit.date());
        (0..unit.total_segments())
            .filter(|seg| !done.is_some_and(|d| d.contains(seg)))
            .collect()
    }
}

/// Counts artifacts under an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactCounter {
    root: PathBuf,
    pattern: ArtifactPattern,
}

impl ArtifactCounter {
    /// Counter for `root` with the default naming pattern.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pattern: ArtifactPattern::default(),
        }
    }

    /// Replaces the naming pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: ArtifactPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Walks the output root once.
    ///
    /// Subdirectories are searched recursively; symlinked directories are
    /// not followed. An unreadable subdirectory is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactCountUnavailable`] if the root itself cannot be
    /// listed (including when it does not exist yet).
    pub fn scan(&self) -> Result<ArtifactIndex, ArtifactCountUnavailable> {
        let mut index = ArtifactIndex::default();
        let entries = std::fs::read_dir(&self.root).map_err(|source| ArtifactCountUnavailable {
            path: self.root.clone(),
            source,
        })?;
        self.collect(entries, &mut index);
        Ok(index)
    }

    fn collect(&self, entries: std::fs::ReadDir, index: &mut ArtifactIndex) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                match std::fs::read_dir(&path) {
                    Ok(children) => self.collect(children, index),
                    Err(e) => log::warn!("Skipping unreadable directory {}: {e}", path.display()),
                }
                continue;
            }

            let name = entry.file_name();
            let Some((date, segment)) = name.to_str().and_then(|n| self.pattern.parse(n)) else {
                continue;
            };

            // Follows file symlinks; a dangling link counts as missing.
            let non_empty = std::fs::metadata(&path).is_ok_and(|m| m.is_file() && m.len() > 0);
            if non_empty {
                index
                    .segments
                    .entry(date.to_string())
                    .or_default()
                    .insert(segment);
            }
        }
    }

    /// [`Self::scan`], logging and falling back to an empty index when the
    /// root cannot be listed.
    #[must_use]
    pub fn scan_or_empty(&self) -> ArtifactIndex {
        self.scan().unwrap_or_else(|e| {
            if e.source.kind() == std::io::ErrorKind::NotFound {
                log::debug!("{e}");
            } else {
                log::warn!("{e}");
            }
            ArtifactIndex::default()
        })
    }
}
