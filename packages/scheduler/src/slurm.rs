//! [`SchedulerAdapter`] implementation backed by the Slurm command-line
//! tools.
//!
//! * submit: the rendered script is piped to `sbatch --parsable`
//! * live queue: `squeue -h -r -o "%i|%T|%N|%M|%j"` (`-r` lists array tasks
//!   one per line)
//! * accounting: `sacct -n -X -P -o JobID,State,NodeList,Elapsed,JobName`

use std::process::Stdio;

use async_trait::async_trait;
use crawl_runner_scheduler_models::{ArrayJobRequest, ArrayTaskRecord, JobId};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::parse::{parse_sbatch_reply, parse_task_rows};
use crate::script::render_script;
use crate::{SchedulerAdapter, SchedulerError};

/// `squeue` output format matching [`parse_task_rows`].
const SQUEUE_FORMAT: &str = "%i|%T|%N|%M|%j";

/// `sacct` fields matching [`parse_task_rows`].
const SACCT_FIELDS: &str = "JobID,State,NodeList,Elapsed,JobName";

/// `sbatch` error fragments that indicate a busy or unreachable controller
/// rather than a rejected job.
const TRANSIENT_SBATCH_ERRORS: &[&str] = &[
    "Socket timed out",
    "Unable to contact slurm controller",
    "Slurm temporarily unable",
    "Resource temporarily unavailable",
];

/// Captured result of one scheduler command.
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Slurm-backed scheduler adapter.
#[derive(Debug, Clone)]
pub struct SlurmAdapter {
    /// User whose jobs `query_live(None)` lists. `None` uses `--me`.
    user: Option<String>,
    sbatch: String,
    squeue: String,
    sacct: String,
}

impl Default for SlurmAdapter {
    fn default() -> Self {
        Self::new(std::env::var("USER").ok())
    }
}

impl SlurmAdapter {
    /// Creates an adapter that lists `user`'s jobs when no job id is given.
    #[must_use]
    pub fn new(user: Option<String>) -> Self {
        Self {
            user,
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
        }
    }

    /// Overrides the scheduler binaries (e.g. absolute paths or wrappers).
    #[must_use]
    pub fn with_binaries(
        mut self,
        sbatch: impl Into<String>,
        squeue: impl Into<String>,
        sacct: impl Into<String>,
    ) -> Self {
        self.sbatch = sbatch.into();
        self.squeue = squeue.into();
        self.sacct = sacct.into();
        self
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SchedulerError> {
        let unavailable = |message: String| SchedulerError::Unavailable {
            command: program.to_string(),
            message,
        };

        log::debug!("Running {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to start: {e}")))?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| unavailable(format!("failed to write stdin: {e}")))?;
            // Dropping the pipe closes stdin so the command sees EOF.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| unavailable(format!("failed to wait: {e}")))?;

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        log::debug!(
            "{program} exited (success={}): stdout={} bytes, stderr={:?}",
            result.success,
            result.stdout.len(),
            result.stderr
        );

        Ok(result)
    }
}

#[async_trait]
impl SchedulerAdapter for SlurmAdapter {
    async fn submit_array(&self, request: &ArrayJobRequest) -> Result<JobId, SchedulerError> {
        let script = render_script(request);
        let output = self
            .run(&self.sbatch, &["--parsable".to_string()], Some(&script))
            .await?;

        if !output.success {
            return Err(classify_sbatch_failure(&output.stderr));
        }

        let job_id = parse_sbatch_reply(&output.stdout)?;
        log::info!(
            "Submitted {} as job {job_id} ({} tasks, throttle {})",
            request.job_name,
            request.array.size,
            request.array.throttle
        );
        Ok(job_id)
    }

    async fn query_live(&self, job: Option<JobId>) -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
        let mut args = vec![
            "-h".to_string(),
            "-r".to_string(),
            "-o".to_string(),
            SQUEUE_FORMAT.to_string(),
        ];
        match (job, &self.user) {
            (Some(job), _) => args.extend(["-j".to_string(), job.to_string()]),
            (None, Some(user)) => args.extend(["-u".to_string(), user.clone()]),
            (None, None) => args.push("--me".to_string()),
        }

        let output = self.run(&self.squeue, &args, None).await?;

        if !output.success {
            // squeue rejects ids that have aged out of the controller's
            // memory; for us that simply means the job is no longer queued.
            if job.is_some() && output.stderr.contains("Invalid job id") {
                return Ok(Vec::new());
            }
            return Err(SchedulerError::Unavailable {
                command: self.squeue.clone(),
                message: non_empty_or(&output.stderr, "exited with non-zero status"),
            });
        }

        parse_task_rows("squeue", &output.stdout)
    }

    async fn query_history(&self, job: JobId) -> Result<Vec<ArrayTaskRecord>, SchedulerError> {
        let args = vec![
            "-n".to_string(),
            "-X".to_string(),
            "-P".to_string(),
            "-o".to_string(),
            SACCT_FIELDS.to_string(),
            "-j".to_string(),
            job.to_string(),
        ];

        let output = self.run(&self.sacct, &args, None).await?;

        if !output.success {
            return Err(SchedulerError::Unavailable {
                command: self.sacct.clone(),
                message: non_empty_or(&output.stderr, "exited with non-zero status"),
            });
        }

        parse_task_rows("sacct", &output.stdout)
    }
}

/// Decides whether a failed `sbatch` was rejected or just could not reach
/// the controller.
fn classify_sbatch_failure(stderr: &str) -> SchedulerError {
    if TRANSIENT_SBATCH_ERRORS.iter().any(|e| stderr.contains(e)) {
        SchedulerError::Unavailable {
            command: "sbatch".to_string(),
            message: stderr.to_string(),
        }
    } else {
        SchedulerError::SubmissionFailed {
            message: non_empty_or(stderr, "sbatch exited with non-zero status"),
        }
    }
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sbatch_failures() {
        assert!(
            classify_sbatch_failure("sbatch: error: Batch job submission failed: Socket timed out on send/recv operation")
                .is_transient()
        );
        let err = classify_sbatch_failure(
            "sbatch: error: Batch job submission failed: Invalid partition name specified",
        );
        assert!(matches!(err, SchedulerError::SubmissionFailed { ref message } if message.contains("Invalid partition")));
        assert!(matches!(
            classify_sbatch_failure(""),
            SchedulerError::SubmissionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let adapter = SlurmAdapter::new(Some("nobody".to_string())).with_binaries(
            "/nonexistent/sbatch",
            "/nonexistent/squeue",
            "/nonexistent/sacct",
        );
        let err = adapter.query_live(None).await.unwrap_err();
        assert!(err.is_transient());
        let err = adapter.query_history(JobId(1)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
