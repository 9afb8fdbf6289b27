//! Per-task command template instantiation.
//!
//! Templates use shell-like placeholders: `$name` or `${name}`. Known
//! names are replaced; unknown ones are left exactly as written, so
//! scheduler-provided variables such as `$SLURM_ARRAY_TASK_ID` and
//! `${SLURM_ARRAY_JOB_ID}` reach the job script untouched. `$$` produces a
//! literal `$`.
//!
//! Variables available for a crawl date unit:
//!
//! | name | value |
//! |---|---|
//! | `date` | crawl date identifier |
//! | `total_segments` / `n_files` | declared segment count |
//! | `segments_per_task` | segments per array task |
//! | `array_size` | number of array tasks |
//! | `throttle` | concurrent task limit |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crawl_runner_crawl_models::CrawlDateUnit;
use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
        .unwrap_or_else(|_| unreachable!())
});

/// Errors from loading a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template file could not be read.
    #[error("failed to read template {path}: {source}")]
    Io {
        /// Template path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The template file has no content.
    #[error("template {path} is empty")]
    Empty {
        /// Template path.
        path: PathBuf,
    },
}

/// Replaces known placeholders in `template`, leaving unknown ones intact.
#[must_use]
pub fn substitute(template: &str, vars: &BTreeMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Template variables for `unit`.
#[must_use]
pub fn unit_variables(unit: &CrawlDateUnit) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("date", unit.date().to_string()),
        ("total_segments", unit.total_segments().to_string()),
        ("n_files", unit.total_segments().to_string()),
        ("segments_per_task", unit.segments_per_task().to_string()),
        ("array_size", unit.array_size().to_string()),
        ("throttle", unit.throttle().to_string()),
    ])
}

/// Instantiates `template` for `unit`.
#[must_use]
pub fn instantiate(template: &str, unit: &CrawlDateUnit) -> String {
    substitute(template, &unit_variables(unit))
}

/// Reads a template file.
///
/// # Errors
///
/// Returns [`TemplateError`] if the file cannot be read or is blank.
pub fn load_template(path: &Path) -> Result<String, TemplateError> {
    let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(TemplateError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_runner_crawl_models::CrawlDate;

    fn unit() -> CrawlDateUnit {
        CrawlDateUnit::new(&CrawlDate::new("202104", 79_840), 25, 10).unwrap()
    }

    #[test]
    fn substitutes_known_variables() {
        let out = instantiate(
            "worker --crawl-date $date --segments-per-task ${segments_per_task} --total $n_files",
            &unit(),
        );
        assert_eq!(
            out,
            "worker --crawl-date 202104 --segments-per-task 25 --total 79840"
        );
    }

    #[test]
    fn leaves_scheduler_variables_untouched() {
        let out = instantiate(
            "--task-id $SLURM_ARRAY_TASK_ID --job-id ${SLURM_ARRAY_JOB_ID} --date ${date}",
            &unit(),
        );
        assert_eq!(
            out,
            "--task-id $SLURM_ARRAY_TASK_ID --job-id ${SLURM_ARRAY_JOB_ID} --date 202104"
        );
    }

    #[test]
    fn double_dollar_is_literal() {
        assert_eq!(instantiate("cost: $$5 for $date", &unit()), "cost: $5 for 202104");
    }

    #[test]
    fn lone_dollar_is_kept() {
        assert_eq!(instantiate("echo $ ${", &unit()), "echo $ ${");
    }

    #[test]
    fn exposes_array_shape() {
        let vars = unit_variables(&unit());
        assert_eq!(vars["array_size"], "3194");
        assert_eq!(vars["throttle"], "10");
    }

    #[test]
    fn missing_template_file_is_error() {
        assert!(matches!(
            load_template(Path::new("/nonexistent/template.sh")),
            Err(TemplateError::Io { .. })
        ));
    }
}
