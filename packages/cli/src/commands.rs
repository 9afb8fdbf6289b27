//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crawl_runner_cli_utils::{IndicatifProgress, MultiProgress};
use crawl_runner_crawl::date_list::{self, DateList};
use crawl_runner_orchestrator::config::{RunConfig, RunSettings};
use crawl_runner_orchestrator::runner::{self, Orchestrator};
use crawl_runner_progress::ProgressError;
use crawl_runner_progress::history::{self, HISTORY_FILE_NAME};
use crawl_runner_progress::monitor::{JobSelector, Monitor, MonitorConfig};
use crawl_runner_progress::report;
use crawl_runner_scheduler::poll::TokioSleeper;
use crawl_runner_scheduler::slurm::SlurmAdapter;

use crate::{MonitorArgs, RunArgs};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Exit code for a run whose dates all resolved but not all succeeded.
const PARTIAL_FAILURE_EXIT_CODE: i32 = 2;

fn resolve_config(args: &RunArgs) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let settings = RunSettings::load_layer(args.config.as_deref())?.overlay(args.settings());
    Ok(RunConfig::resolve(settings)?)
}

fn log_skipped(list: &DateList) {
    for skipped in &list.skipped {
        log::warn!("{skipped}");
    }
}

/// `run`: submit and wait, date by date.
pub async fn run(args: &RunArgs, multi: &MultiProgress) -> CliResult {
    let config = resolve_config(args)?;
    let dates = config.load_dates()?;
    log_skipped(&dates);
    let template = config.load_template()?;
    let dry_run = config.dry_run;

    let progress = IndicatifProgress::run_bars(multi, dates.dates.len() as u64);
    let orchestrator = Orchestrator::new(
        Arc::new(SlurmAdapter::default()),
        Arc::new(TokioSleeper),
        config,
    )
    .with_progress(progress);

    let summary = orchestrator.run(&dates.dates, &template).await?;
    print!("{summary}");

    if dry_run {
        log::info!("Dry run complete, nothing was submitted");
    } else if summary.all_succeeded() {
        log::info!("All {} crawl date(s) completed", summary.units.len());
    } else {
        log::error!("Some crawl dates did not complete; see the warnings above for tasks to re-run");
        std::process::exit(PARTIAL_FAILURE_EXIT_CODE);
    }
    Ok(())
}

/// `plan`: validate the configuration and print each date's array layout.
pub fn plan(args: &RunArgs) -> CliResult {
    let config = resolve_config(args)?;
    let dates = config.load_dates()?;
    log_skipped(&dates);
    config.load_template()?;

    let units = runner::plan(&dates.dates, &config)?;
    println!(
        "{:<10} {:>10} {:>8} {:>9} {:>20}  job",
        "date", "segments", "tasks", "throttle", "last task segments"
    );
    for unit in &units {
        let last = unit.task_segments(unit.array_size() - 1);
        let last = format!("{}..{}", last.start, last.end);
        println!(
            "{:<10} {:>10} {:>8} {:>9} {:>20}  {}",
            unit.date(),
            unit.total_segments(),
            unit.array_size(),
            unit.throttle(),
            last,
            unit.job_name(&config.job_prefix),
        );
    }
    println!(
        "{} date(s), {} segment(s), {} per task",
        units.len(),
        dates.total_segments(),
        config.segments_per_task
    );
    Ok(())
}

fn monitor_dates(path: Option<&Path>) -> Result<DateList, Box<dyn std::error::Error>> {
    let list = match path {
        Some(path) => date_list::load_date_list(path)?,
        None => date_list::default_dates(),
    };
    log_skipped(&list);
    Ok(list)
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// `monitor` and `status`. With `once`, a single cycle is printed.
/// `status` passes `persist = false` so a quick look never touches the
/// state file or history log.
pub async fn monitor(args: &MonitorArgs, once: bool, persist: bool) -> CliResult {
    let dates = monitor_dates(args.crawl_dates_file.as_deref())?;
    if args.segments_per_task == 0 {
        return Err("--segments-per-task must be at least 1".into());
    }
    if args.interval == 0 {
        return Err("--interval must be at least 1".into());
    }

    let mut config = MonitorConfig::new(dates.dates, &args.output_dir);
    config.segments_per_task = args.segments_per_task;
    config.interval = Duration::from_secs(args.interval);
    config.exit_when_complete = args.exit_when_complete;
    config.selector = args.job_id.map_or(JobSelector::Latest, JobSelector::Explicit);
    config.job_prefix.clone_from(&args.job_prefix);
    if persist {
        config = config.persist_in(&args.working_dir);
    }

    let format = args.format;
    let mut monitor = Monitor::new(Arc::new(SlurmAdapter::default()), config);

    if once {
        let snapshot = monitor.poll_once(now()).await;
        println!("{}", report::render(format, &snapshot));
        return Ok(());
    }

    let result = monitor
        .run(&TokioSleeper, now, |snapshot| {
            println!("{}", report::render(format, snapshot));
        })
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(ProgressError::Interrupted) => {
            log::info!("Monitor stopped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `history`: summarize the sample log in `working_dir`.
pub fn history(working_dir: &Path) -> CliResult {
    let path = working_dir.join(HISTORY_FILE_NAME);
    let entries = history::read_history(&path)?;
    match history::summarize(&entries) {
        Some(summary) => println!("{}", history::render_summary(&summary)),
        None => println!("No progress history in {}", path.display()),
    }
    Ok(())
}
