//! Fixed-backoff retry for scheduler calls.
//!
//! The scheduler controller is frequently under load, so a failed `squeue`
//! or `sacct` call is usually worth repeating a few seconds later. Only
//! [`SchedulerError::Unavailable`] is retried; parse errors and rejected
//! submissions are returned immediately.
//!
//! The pause between attempts goes through the caller's [`Sleeper`], so a
//! Ctrl-C during backoff stops the retries and tests never wait on a real
//! timer.
//!
//! # Usage
//!
//! ```ignore
//! let live = retry::with_fixed_backoff(&policy, &TokioSleeper, "squeue", || {
//!     adapter.query_live(Some(job))
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::SchedulerError;
use crate::poll::Sleeper;

/// Default number of attempts per scheduler call.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// How many times to try a scheduler call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `0` is treated as `1`.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or `policy` is exhausted.
/// Waits `policy.delay` on `sleeper` between attempts.
///
/// # Errors
///
/// Returns the last error from `op` if every attempt failed, if `sleeper`
/// was cancelled during a backoff, or the first non-transient error.
pub async fn with_fixed_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> Result<T, SchedulerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SchedulerError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                log::warn!(
                    "{label}: {e} (attempt {attempt}/{attempts}), retrying in {:?}",
                    policy.delay
                );
                if !sleeper.sleep(policy.delay).await {
                    log::warn!("{label}: retry cancelled after attempt {attempt}/{attempts}");
                    return Err(e);
                }
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    log::error!("{label}: giving up after {attempts} attempt(s): {e}");
                }
                return Err(e);
            }
        }
    }
}
