#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `crawl_runner`: submits one Slurm array job per crawl date, waits for
//! each to finish, and monitors progress from the scheduler and the output
//! directory.
//!
//! Uses `indicatif-log-bridge` (via [`crawl_runner_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use crawl_runner_orchestrator::config::RunSettings;
use crawl_runner_progress::report::OutputFormat;
use crawl_runner_scheduler::models::JobId;

mod commands;

/// Run and monitor per-date crawl array jobs on Slurm.
#[derive(Parser)]
#[command(name = "crawl_runner")]
#[command(about = "Run and monitor per-date crawl array jobs on Slurm")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Submit one array job per crawl date, waiting for each to finish.
    Run(RunArgs),

    /// Print each date's array layout without touching the scheduler.
    Plan(RunArgs),

    /// Poll the scheduler and output directory until stopped.
    Monitor(MonitorArgs),

    /// Poll once and print the result.
    Status(MonitorArgs),

    /// Summarize the progress history log.
    History {
        /// Directory holding `progress_history.log`.
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
    },
}

/// Flags for `run` and `plan`. Unset flags fall back to the config file,
/// then to built-in defaults.
#[derive(Args)]
struct RunArgs {
    /// TOML run configuration (default: `$CRAWL_RUNNER_CONFIG`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Job script template with `$date`-style placeholders.
    #[arg(long)]
    template_file: Option<PathBuf>,

    /// `<date> <total_segments>` list (default: built-in list).
    #[arg(long)]
    crawl_dates_file: Option<PathBuf>,

    /// Slurm partition.
    #[arg(long)]
    partition: Option<String>,

    /// Time limit per task, in hours.
    #[arg(long = "time")]
    time_hours: Option<u32>,

    /// Memory per task (e.g. `100m`, `4G`).
    #[arg(long)]
    mem: Option<String>,

    /// CPUs per task.
    #[arg(long)]
    cpus: Option<u32>,

    /// Segments each array task processes.
    #[arg(long)]
    segments_per_task: Option<u64>,

    /// Maximum concurrently running tasks per date.
    #[arg(long)]
    throttle: Option<u32>,

    /// Job name prefix; the date is appended.
    #[arg(long)]
    job_prefix: Option<String>,

    /// Seconds between status checks.
    #[arg(long = "check-interval")]
    check_interval_secs: Option<u64>,

    /// Directory the worker writes artifacts to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory for dry-run job scripts.
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Write job scripts instead of submitting them.
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    /// The flags as the top settings layer.
    fn settings(&self) -> RunSettings {
        RunSettings {
            template_file: self.template_file.clone(),
            crawl_dates_file: self.crawl_dates_file.clone(),
            partition: self.partition.clone(),
            time_hours: self.time_hours,
            mem: self.mem.clone(),
            cpus: self.cpus,
            segments_per_task: self.segments_per_task,
            throttle: self.throttle,
            job_prefix: self.job_prefix.clone(),
            check_interval_secs: self.check_interval_secs,
            output_dir: self.output_dir.clone(),
            scripts_dir: self.scripts_dir.clone(),
            dry_run: self.dry_run.then_some(true),
        }
    }
}

/// Flags for `monitor` and `status`.
#[derive(Args)]
struct MonitorArgs {
    /// Directory for `progress.state` and `progress_history.log`.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// `<date> <total_segments>` list (default: built-in list).
    #[arg(long)]
    crawl_dates_file: Option<PathBuf>,

    /// Directory the worker writes artifacts to.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Segments each array task processes.
    #[arg(long, default_value_t = 100)]
    segments_per_task: u64,

    /// Seconds between cycles.
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Job to track (default: the newest queued job named `<job-prefix>_*`).
    #[arg(long)]
    job_id: Option<JobId>,

    /// Name prefix identifying crawl jobs in the queue.
    #[arg(long, default_value = crawl_runner_orchestrator::config::DEFAULT_JOB_PREFIX)]
    job_prefix: String,

    /// Output format: `detailed`, `compact`, or `json`.
    #[arg(long, default_value = "detailed", value_parser = parse_format)]
    format: OutputFormat,

    /// Poll once and exit.
    #[arg(long)]
    once: bool,

    /// Exit once every date is processed (or the selected job finished).
    #[arg(long)]
    exit_when_complete: bool,
}

fn parse_format(value: &str) -> Result<OutputFormat, String> {
    value
        .parse()
        .map_err(|_| format!("unknown format '{value}' (expected detailed, compact, or json)"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crawl_runner_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run(&args, &multi).await?,
        Commands::Plan(args) => commands::plan(&args)?,
        Commands::Monitor(args) => commands::monitor(&args, args.once, true).await?,
        Commands::Status(args) => commands::monitor(&args, true, false).await?,
        Commands::History { working_dir } => commands::history(&working_dir)?,
    }

    Ok(())
}
