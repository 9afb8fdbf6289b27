//! Cancellable poll timer.
//!
//! Polling loops wait between cycles through a [`Sleeper`] instead of
//! calling `tokio::time::sleep` directly. Production code uses
//! [`TokioSleeper`], which Ctrl-C cancels; tests use
//! [`crate::fake::RecordingSleeper`], which returns immediately so loops run
//! synchronously.

use std::time::Duration;

use async_trait::async_trait;

/// A timer a polling loop waits on between cycles.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`. Returns `false` if the wait was cancelled and
    /// the loop should stop.
    async fn sleep(&self, duration: Duration) -> bool;
}

/// Real timer, cancelled by Ctrl-C.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::warn!("Could not listen for Ctrl-C: {e}");
                    tokio::time::sleep(duration).await;
                    return true;
                }
                log::warn!("Interrupted, stopping poll loop");
                false
            }
        }
    }
}
