//! Crawl date list parsing.
//!
//! One `<date> <total_segments>` record per line. Blank lines and lines
//! starting with `#` are ignored; extra columns are ignored. A malformed
//! line is skipped with a warning rather than failing the whole list, so one
//! typo does not stop a multi-day run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crawl_runner_crawl_models::CrawlDate;

/// Crawl dates used when no date list file is given.
pub const DEFAULT_CRAWL_DATES: &[(&str, u64)] = &[
    ("202104", 79_840),
    ("202110", 64_000),
    ("202117", 64_000),
    ("202121", 64_000),
    ("202125", 64_000),
    ("202131", 72_000),
    ("202139", 72_000),
    ("202143", 72_000),
    ("202149", 64_000),
];

/// Errors from reading a date list.
#[derive(Debug, thiserror::Error)]
pub enum DateListError {
    /// The file could not be read.
    #[error("failed to read date list {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A line could not be parsed and was skipped.
    #[error("line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Why the line was rejected.
        reason: String,
    },
}

/// A parsed date list plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct DateList {
    /// Dates in file order.
    pub dates: Vec<CrawlDate>,
    /// One [`DateListError::Malformed`] per skipped line.
    pub skipped: Vec<DateListError>,
}

impl DateList {
    /// Sum of all dates' declared segment counts.
    #[must_use]
    pub fn total_segments(&self) -> u64 {
        self.dates.iter().map(|d| d.total_segments).sum()
    }

    /// Looks up a date by identifier.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&CrawlDate> {
        self.dates.iter().find(|d| d.id == id)
    }

    /// Whether no dates were read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// The built-in date list.
#[must_use]
pub fn default_dates() -> DateList {
    DateList {
        dates: DEFAULT_CRAWL_DATES
            .iter()
            .map(|(id, total)| CrawlDate::new(*id, *total))
            .collect(),
        skipped: Vec::new(),
    }
}

/// Parses date list text. Never fails: bad lines end up in
/// [`DateList::skipped`] and are logged.
#[must_use]
pub fn parse_date_list(text: &str) -> DateList {
    let mut list = DateList::default();
    let mut seen = HashSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(id), count) = (parts.next(), parts.next()) else {
            continue;
        };

        let reject = |reason: String| {
            log::warn!("Skipping date list line {line_no} ({line:?}): {reason}");
            DateListError::Malformed {
                line: line_no,
                reason,
            }
        };

        let Some(count) = count else {
            list.skipped
                .push(reject(format!("missing segment count for date {id}")));
            continue;
        };

        let total_segments = match count.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                list.skipped
                    .push(reject(format!("segment count {count:?} is not a number")));
                continue;
            }
        };

        if !seen.insert(id.to_string()) {
            list.skipped
                .push(reject(format!("duplicate date {id}, keeping the first entry")));
            continue;
        }

        list.dates.push(CrawlDate::new(id, total_segments));
    }

    list
}

/// Reads and parses a date list file.
///
/// # Errors
///
/// Returns [`DateListError::Io`] if the file cannot be read.
pub fn load_date_list(path: &Path) -> Result<DateList, DateListError> {
    let text = std::fs::read_to_string(path).map_err(|source| DateListError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let list = parse_date_list(&text);
    log::info!(
        "Loaded {} crawl date(s) ({} segments) from {}",
        list.dates.len(),
        list.total_segments(),
        path.display()
    );
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_skips_comments() {
        let list = parse_date_list(
            "# crawl dates\n\
             202104 79840\n\
             \n\
             \x20 # indented comment\n\
             202110\t64000 extra-column\n",
        );
        assert_eq!(
            list.dates,
            vec![
                CrawlDate::new("202104", 79_840),
                CrawlDate::new("202110", 64_000)
            ]
        );
        assert!(list.skipped.is_empty());
        assert_eq!(list.total_segments(), 143_840);
    }

    #[test]
    fn skips_malformed_lines_without_failing() {
        let list = parse_date_list("202104 79840\n202110 lots\n202117\n202121 64000\n");
        assert_eq!(list.dates.len(), 2);
        assert_eq!(list.skipped.len(), 2);
        assert!(matches!(
            list.skipped[0],
            DateListError::Malformed { line: 2, .. }
        ));
        assert!(matches!(
            list.skipped[1],
            DateListError::Malformed { line: 3, .. }
        ));
    }

    #[test]
    fn keeps_first_of_duplicate_dates() {
        let list = parse_date_list("202104 10\n202104 20\n");
        assert_eq!(list.dates, vec![CrawlDate::new("202104", 10)]);
        assert_eq!(list.skipped.len(), 1);
        assert_eq!(list.find("202104").map(|d| d.total_segments), Some(10));
    }

    #[test]
    fn default_list_matches_known_dates() {
        let list = default_dates();
        assert_eq!(list.dates.len(), 9);
        assert_eq!(list.dates[0], CrawlDate::new("202104", 79_840));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_date_list(Path::new("/nonexistent/crawl_data.txt")).unwrap_err();
        assert!(matches!(err, DateListError::Io { .. }));
    }
}
