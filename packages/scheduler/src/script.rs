//! Batch script rendering.
//!
//! Produces the `#SBATCH`-annotated shell script for an
//! [`ArrayJobRequest`]. Rendering is a pure function of the request, so
//! dry runs and real submissions see byte-identical scripts.

use std::fmt::Write as _;
use std::time::Duration;

use crawl_runner_scheduler_models::ArrayJobRequest;

/// Formats a time limit the way `sbatch --time` expects it: `HH:MM:SS`,
/// or `D-HH:MM:SS` once it reaches a day. Sub-minute limits round up to one
/// minute.
#[must_use]
pub fn format_time_limit(limit: Duration) -> String {
    let total = limit.as_secs().max(60);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Renders the batch script for `request`.
///
/// The `--array` directive is always emitted, including for single-task
/// arrays, so every task sees `SLURM_ARRAY_TASK_ID`. Per-task log files are
/// named `<job name>_<array job id>_<task index>.{out,err}`.
#[must_use]
pub fn render_script(request: &ArrayJobRequest) -> String {
    let mut script = String::from("#!/bin/bash\n\n");
    let name = &request.job_name;
    let last_index = request.array.size.max(1) - 1;

    // Writing to a String cannot fail.
    let _ = writeln!(script, "#SBATCH --job-name={name}");
    let _ = writeln!(script, "#SBATCH --output={name}_%A_%a.out");
    let _ = writeln!(script, "#SBATCH --error={name}_%A_%a.err");
    let _ = writeln!(
        script,
        "#SBATCH --array=0-{last_index}%{}",
        request.array.throttle.max(1)
    );

    let resources = &request.resources;
    if let Some(partition) = &resources.partition {
        let _ = writeln!(script, "#SBATCH --partition={partition}");
    }
    if let Some(limit) = resources.time_limit {
        let _ = writeln!(script, "#SBATCH --time={}", format_time_limit(limit));
    }
    if let Some(mem) = &resources.mem {
        let _ = writeln!(script, "#SBATCH --mem={mem}");
    }
    if let Some(cpus) = resources.cpus_per_task {
        let _ = writeln!(script, "#SBATCH --cpus-per-task={cpus}");
    }

    script.push('\n');
    script.push_str(request.command.trim_end());
    script.push('\n');

    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_runner_scheduler_models::{ArraySpec, JobResources};

    fn request() -> ArrayJobRequest {
        ArrayJobRequest {
            job_name: "crawl_job_202104".to_string(),
            array: ArraySpec {
                size: 3194,
                throttle: 25,
            },
            resources: JobResources {
                partition: Some("short".to_string()),
                time_limit: Some(Duration::from_secs(24 * 3_600)),
                mem: Some("100m".to_string()),
                cpus_per_task: Some(1),
            },
            command: "python worker.py --crawl-date 202104\n\n".to_string(),
        }
    }

    #[test]
    fn formats_time_limits() {
        assert_eq!(format_time_limit(Duration::from_secs(90 * 60)), "01:30:00");
        assert_eq!(
            format_time_limit(Duration::from_secs(24 * 3_600)),
            "1-00:00:00"
        );
        assert_eq!(format_time_limit(Duration::from_secs(5)), "00:01:00");
    }

    #[test]
    fn renders_full_script() {
        let script = render_script(&request());
        assert_eq!(
            script,
            "#!/bin/bash\n\n\
             #SBATCH --job-name=crawl_job_202104\n\
             #SBATCH --output=crawl_job_202104_%A_%a.out\n\
             #SBATCH --error=crawl_job_202104_%A_%a.err\n\
             #SBATCH --array=0-3193%25\n\
             #SBATCH --partition=short\n\
             #SBATCH --time=1-00:00:00\n\
             #SBATCH --mem=100m\n\
             #SBATCH --cpus-per-task=1\n\
             \n\
             python worker.py --crawl-date 202104\n"
        );
    }

    #[test]
    fn single_task_array_still_gets_array_directive() {
        let mut req = request();
        req.array.size = 1;
        req.resources = JobResources::default();
        let script = render_script(&req);
        assert!(script.contains("#SBATCH --array=0-0%25\n"));
        assert!(!script.contains("--partition"));
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render_script(&request()), render_script(&request()));
    }
}
