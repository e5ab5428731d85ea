//! Periodic background tasks with cooperative cancellation
//!
//! Every background loop in a tier (parent link, sweeper, sampling workers) runs
//! as a [`Worker`]: a spawned task paired with a stop channel. The loop waits on
//! [`StopSignal::sleep`], which returns early as soon as a stop is requested, so
//! stopping is bounded by one in-flight iteration.

mod child;
mod sweeper;

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use child::{LinkState, ParentLink};
pub use sweeper::{ChildRegistry, Sweeper, WarningPoll};

/// Receiving half of a worker's stop channel
#[derive(Debug)]
pub struct StopSignal {
    rx: oneshot::Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    /// Wait for `delay`; returns true if a stop was requested instead
    pub async fn sleep(&mut self, delay: Duration) -> bool {
        if self.stopped {
            return true;
        }

        tokio::select! {
            _ = &mut self.rx => {
                // A dropped sender also counts as a stop
                self.stopped = true;
                true
            }
            () = tokio::time::sleep(delay) => false,
        }
    }

    /// Whether a stop was already observed
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Handle to a spawned periodic task
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `task` with a fresh stop signal
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, rx) = oneshot::channel();
        let signal = StopSignal { rx, stopped: false };
        let handle = tokio::spawn(task(signal));

        Self {
            name: name.into(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has exited on its own
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request a stop and wait for the task to finish
    ///
    /// Everything the task owns has been released when this returns.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(worker = %self.name, "worker panicked");
                }
            }
        }

        tracing::debug!(worker = %self.name, "worker stopped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(worker = %self.name, "worker dropped without stop, aborting");
            handle.abort();
        }
    }
}

/// Interval policy for a periodic loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Same delay every iteration
    Fixed(Duration),
    /// Doubling delay after consecutive failures, capped at `max`
    Backoff { base: Duration, max: Duration },
}

impl Cadence {
    /// Delay before the next iteration after `failures` consecutive failures
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Backoff { base, max } => {
                let exponent = failures.saturating_sub(1).min(31);
                base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
            }
        }
    }
}
