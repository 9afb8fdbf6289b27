//! Run configuration.
//!
//! Settings come from three layers, highest priority first: command-line
//! flags, an optional TOML file, built-in defaults. Each layer is a
//! [`RunSettings`] with every field optional; [`RunSettings::overlay`]
//! stacks them and [`RunConfig::resolve`] fills the gaps and validates.
//!
//! ```toml
//! template_file = "config/job_template.sh"
//! crawl_dates_file = "config/crawl_data.txt"
//! partition = "standard"
//! time_hours = 24
//! mem = "100m"
//! cpus = 1
//! segments_per_task = 100
//! throttle = 10
//! job_prefix = "crawl_job"
//! check_interval_secs = 60
//! output_dir = "output"
//! scripts_dir = "generated_scripts"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crawl_runner_crawl::date_list::{self, DateList, DateListError};
use crawl_runner_crawl::template::{self, TemplateError};
use crawl_runner_scheduler::models::JobResources;
use crawl_runner_scheduler::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

pub use crawl_runner_crawl::models::DEFAULT_JOB_PREFIX;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "CRAWL_RUNNER_CONFIG";

/// Default per-task memory request.
pub const DEFAULT_MEM: &str = "100m";
/// Default per-task time limit in hours.
pub const DEFAULT_TIME_HOURS: u32 = 24;
/// Default CPUs per task.
pub const DEFAULT_CPUS: u32 = 1;
/// Default seconds between status checks.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
/// Default segments handled by one array task.
pub const DEFAULT_SEGMENTS_PER_TASK: u64 = 100;
/// Default concurrent task limit.
pub const DEFAULT_THROTTLE: u32 = 10;
/// Default artifact directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";
/// Default directory for dry-run scripts.
pub const DEFAULT_SCRIPTS_DIR: &str = "generated_scripts";

/// Configuration errors. All of them abort the run before anything is
/// submitted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`RunSettings`].
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// A required setting was not given in any layer.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting has a value the run cannot use.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The date list could not be read.
    #[error(transparent)]
    DateList(#[from] DateListError),

    /// The job template could not be read.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// One layer of run settings. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// Per-task command template.
    pub template_file: Option<PathBuf>,
    /// Date list; the built-in list is used when unset.
    pub crawl_dates_file: Option<PathBuf>,
    /// Scheduler partition.
    pub partition: Option<String>,
    /// Per-task time limit in hours.
    pub time_hours: Option<u32>,
    /// Per-task memory request.
    pub mem: Option<String>,
    /// CPUs per task.
    pub cpus: Option<u32>,
    /// Segments per array task.
    pub segments_per_task: Option<u64>,
    /// Maximum concurrently running tasks per date.
    pub throttle: Option<u32>,
    /// Job name prefix.
    pub job_prefix: Option<String>,
    /// Seconds between status checks.
    pub check_interval_secs: Option<u64>,
    /// Artifact directory.
    pub output_dir: Option<PathBuf>,
    /// Where dry-run scripts are written.
    pub scripts_dir: Option<PathBuf>,
    /// Render scripts instead of submitting.
    pub dry_run: Option<bool>,
}

impl RunSettings {
    /// Reads a TOML settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::de::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Settings file named by `explicit`, else by [`CONFIG_ENV_VAR`], else
    /// empty settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file cannot be loaded.
    pub fn load_layer(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => {
                log::debug!("Using config from {CONFIG_ENV_VAR}");
                Self::load(Path::new(&path))
            }
            _ => Ok(Self::default()),
        }
    }

    /// `self` with every field `top` sets replaced by `top`'s value.
    #[must_use]
    pub fn overlay(self, top: Self) -> Self {
        Self {
            template_file: top.template_file.or(self.template_file),
            crawl_dates_file: top.crawl_dates_file.or(self.crawl_dates_file),
            partition: top.partition.or(self.partition),
            time_hours: top.time_hours.or(self.time_hours),
            mem: top.mem.or(self.mem),
            cpus: top.cpus.or(self.cpus),
            segments_per_task: top.segments_per_task.or(self.segments_per_task),
            throttle: top.throttle.or(self.throttle),
            job_prefix: top.job_prefix.or(self.job_prefix),
            check_interval_secs: top.check_interval_secs.or(self.check_interval_secs),
            output_dir: top.output_dir.or(self.output_dir),
            scripts_dir: top.scripts_dir.or(self.scripts_dir),
            dry_run: top.dry_run.or(self.dry_run),
        }
    }
}

/// Fully resolved and validated run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Per-task command template.
    pub template_file: PathBuf,
    /// Date list, or `None` for the built-in list.
    pub crawl_dates_file: Option<PathBuf>,
    /// Resources requested for every task.
    pub resources: JobResources,
    /// Segments per array task (at least 1).
    pub segments_per_task: u64,
    /// Concurrent task limit per date (at least 1).
    pub throttle: u32,
    /// Job name prefix.
    pub job_prefix: String,
    /// Pause between status checks.
    pub check_interval: Duration,
    /// Artifact directory.
    pub output_dir: PathBuf,
    /// Dry-run script directory.
    pub scripts_dir: PathBuf,
    /// Render scripts instead of submitting.
    pub dry_run: bool,
    /// Retry policy for scheduler status queries.
    pub retry: RetryPolicy,
}

impl RunConfig {
    /// Applies defaults to `settings` and validates the result.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Missing`] if no template file was given
    /// * [`ConfigError::Invalid`] for a zero segments-per-task, throttle,
    ///   CPU count, time limit, or check interval
    pub fn resolve(settings: RunSettings) -> Result<Self, ConfigError> {
        let template_file = settings
            .template_file
            .ok_or(ConfigError::Missing("template_file"))?;

        let segments_per_task = settings
            .segments_per_task
            .unwrap_or(DEFAULT_SEGMENTS_PER_TASK);
        if segments_per_task == 0 {
            return Err(ConfigError::Invalid {
                field: "segments_per_task",
                reason: "must be at least 1".to_string(),
            });
        }

        let throttle = settings.throttle.unwrap_or(DEFAULT_THROTTLE);
        if throttle == 0 {
            return Err(ConfigError::Invalid {
                field: "throttle",
                reason: "must be at least 1".to_string(),
            });
        }

        let cpus = settings.cpus.unwrap_or(DEFAULT_CPUS);
        if cpus == 0 {
            return Err(ConfigError::Invalid {
                field: "cpus",
                reason: "must be at least 1".to_string(),
            });
        }

        let time_hours = settings.time_hours.unwrap_or(DEFAULT_TIME_HOURS);
        if time_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "time_hours",
                reason: "must be at least 1".to_string(),
            });
        }

        let check_interval_secs = settings
            .check_interval_secs
            .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS);
        if check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "check_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            template_file,
            crawl_dates_file: settings.crawl_dates_file,
            resources: JobResources {
                partition: settings.partition.filter(|p| !p.is_empty()),
                time_limit: Some(Duration::from_secs(u64::from(time_hours) * 3600)),
                mem: Some(settings.mem.unwrap_or_else(|| DEFAULT_MEM.to_string())),
                cpus_per_task: Some(cpus),
            },
            segments_per_task,
            throttle,
            job_prefix: settings
                .job_prefix
                .unwrap_or_else(|| DEFAULT_JOB_PREFIX.to_string()),
            check_interval: Duration::from_secs(check_interval_secs),
            output_dir: settings
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            scripts_dir: settings
                .scripts_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPTS_DIR)),
            dry_run: settings.dry_run.unwrap_or(false),
            retry: RetryPolicy::default(),
        })
    }

    /// Reads the date list, or returns the built-in one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DateList`] if the file cannot be read, and
    /// [`ConfigError::Invalid`] if it contains no usable dates.
    pub fn load_dates(&self) -> Result<DateList, ConfigError> {
        let Some(path) = &self.crawl_dates_file else {
            log::info!("No crawl dates file given, using the built-in date list");
            return Ok(date_list::default_dates());
        };
        let list = date_list::load_date_list(path)?;
        if list.is_empty() {
            return Err(ConfigError::Invalid {
                field: "crawl_dates_file",
                reason: format!("{} lists no usable crawl dates", path.display()),
            });
        }
        Ok(list)
    }

    /// Reads the job template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Template`] if the file is missing or empty.
    pub fn load_template(&self) -> Result<String, ConfigError> {
        Ok(template::load_template(&self.template_file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_template() -> RunSettings {
        RunSettings {
            template_file: Some(PathBuf::from("job.sh")),
            ..RunSettings::default()
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let config = RunConfig::resolve(with_template()).unwrap();
        assert_eq!(config.segments_per_task, 100);
        assert_eq!(config.throttle, 10);
        assert_eq!(config.job_prefix, "crawl_job");
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.resources.mem.as_deref(), Some("100m"));
        assert_eq!(config.resources.cpus_per_task, Some(1));
        assert_eq!(
            config.resources.time_limit,
            Some(Duration::from_secs(24 * 3600))
        );
        assert_eq!(config.resources.partition, None);
        assert_eq!(config.scripts_dir, PathBuf::from("generated_scripts"));
        assert!(!config.dry_run);
    }

    #[test]
    fn flags_win_over_file() {
        let file: RunSettings = toml::de::from_str(
            r#"
            template_file = "from_file.sh"
            throttle = 4
            mem = "2G"
            "#,
        )
        .unwrap();
        let flags = RunSettings {
            throttle: Some(20),
            ..RunSettings::default()
        };

        let config = RunConfig::resolve(file.overlay(flags)).unwrap();
        assert_eq!(config.throttle, 20);
        assert_eq!(config.resources.mem.as_deref(), Some("2G"));
        assert_eq!(config.template_file, PathBuf::from("from_file.sh"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::de::from_str::<RunSettings>("thottle = 4").is_err());
    }

    #[test]
    fn template_is_required() {
        assert!(matches!(
            RunConfig::resolve(RunSettings::default()),
            Err(ConfigError::Missing("template_file"))
        ));
    }

    #[test]
    fn zero_parameters_are_rejected() {
        for settings in [
            RunSettings {
                segments_per_task: Some(0),
                ..with_template()
            },
            RunSettings {
                throttle: Some(0),
                ..with_template()
            },
            RunSettings {
                cpus: Some(0),
                ..with_template()
            },
        ] {
            assert!(matches!(
                RunConfig::resolve(settings),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn zero_time_limit_and_check_interval_name_their_field() {
        let err = RunConfig::resolve(RunSettings {
            time_hours: Some(0),
            ..with_template()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "time_hours", .. }));

        let err = RunConfig::resolve(RunSettings {
            check_interval_secs: Some(0),
            ..with_template()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "check_interval_secs",
                ..
            }
        ));

        let config = RunConfig::resolve(RunSettings {
            time_hours: Some(1),
            check_interval_secs: Some(1),
            ..with_template()
        })
        .unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(1));
        assert_eq!(config.resources.time_limit, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn loads_settings_file() {
        let dir = std::env::temp_dir().join(format!("crawl_runner_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run.toml");
        std::fs::write(&path, "template_file = \"t.sh\"\nsegments_per_task = 25\n").unwrap();

        let settings = RunSettings::load_layer(Some(&path)).unwrap();
        assert_eq!(settings.segments_per_task, Some(25));
        assert!(matches!(
            RunSettings::load(&dir.join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_dates_file_falls_back_to_builtin_list() {
        let config = RunConfig::resolve(with_template()).unwrap();
        assert_eq!(config.load_dates().unwrap().dates.len(), 9);
    }
}
