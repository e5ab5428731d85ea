//! Child side of the liveness protocol: register with the parent and keep
//! proving liveness, re-registering when the parent has forgotten us.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{Cadence, StopSignal, Worker};
use crate::config::{ParentEndpoint, TierConfig};
use crate::transport::{Liveness, Upstream};
use crate::{Error, Result};

/// First retry delay after a failed heartbeat
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Relationship to the parent as seen from the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Unregistered,
    Registered,
    Reregistering,
}

impl LinkState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Reregistering => "reregistering",
        }
    }
}

/// Running registration and heartbeat loop toward one parent
#[derive(Debug)]
pub struct ParentLink {
    worker: Worker,
    state: watch::Receiver<LinkState>,
    upstream: Arc<dyn Upstream>,
    parent: ParentEndpoint,
    snapshot: Arc<TierConfig>,
}

struct LinkLoop {
    upstream: Arc<dyn Upstream>,
    parent: ParentEndpoint,
    snapshot: Arc<TierConfig>,
    heartbeat: Cadence,
    retry: Cadence,
    state: watch::Sender<LinkState>,
}

impl ParentLink {
    /// Start the link for `snapshot`
    ///
    /// Registration happens in the background; a failure is logged and healed by
    /// the heartbeat loop.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the snapshot has no parent
    pub fn start(
        upstream: Arc<dyn Upstream>,
        snapshot: Arc<TierConfig>,
        heartbeat_interval: Duration,
    ) -> Result<Self> {
        let parent = snapshot.parent.clone().ok_or_else(|| {
            Error::TypeMismatch(format!("snapshot '{}' has no parent", snapshot.id))
        })?;

        let (state_tx, state_rx) = watch::channel(LinkState::Unregistered);
        let link = LinkLoop {
            upstream: upstream.clone(),
            parent: parent.clone(),
            snapshot: snapshot.clone(),
            heartbeat: Cadence::Fixed(heartbeat_interval),
            retry: Cadence::Backoff {
                base: RETRY_BASE.min(heartbeat_interval),
                max: heartbeat_interval,
            },
            state: state_tx,
        };

        let worker = Worker::spawn(format!("parent-link:{parent}"), |signal| link.run(signal));

        Ok(Self {
            worker,
            state: state_rx,
            upstream,
            parent,
            snapshot,
        })
    }

    /// Current relationship state
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    #[must_use]
    pub const fn parent(&self) -> &ParentEndpoint {
        &self.parent
    }

    /// Stop heartbeating and withdraw from the parent, best effort
    pub async fn stop(self) {
        self.worker.stop().await;

        match self.upstream.unregister(&self.parent, &self.snapshot).await {
            Ok(()) => {
                tracing::info!(
                    parent = %self.parent,
                    id = %self.snapshot.id,
                    "unregistered from parent"
                );
            }
            Err(e) => {
                tracing::warn!(parent = %self.parent, error = %e, "unregister from parent failed");
            }
        }
    }
}

impl LinkLoop {
    async fn run(self, mut signal: StopSignal) {
        self.register().await;

        let mut failures = 0u32;
        loop {
            let delay = if failures == 0 {
                self.heartbeat.delay(0)
            } else {
                self.retry.delay(failures)
            };
            if signal.sleep(delay).await {
                break;
            }

            match self.upstream.heartbeat(&self.parent, &self.snapshot.id).await {
                Ok(Liveness::Alive) => {
                    if failures > 0 {
                        tracing::info!(parent = %self.parent, failures, "parent reachable again");
                    }
                    failures = 0;
                    self.state.send_replace(LinkState::Registered);
                }
                Ok(Liveness::Unknown) => {
                    failures = 0;
                    self.reregister().await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        parent = %self.parent,
                        failures,
                        error = %e,
                        "heartbeat failed"
                    );
                }
            }
        }
    }

    async fn register(&self) {
        match self.upstream.register(&self.parent, &self.snapshot).await {
            Ok(()) => {
                self.state.send_replace(LinkState::Registered);
                tracing::info!(
                    parent = %self.parent,
                    id = %self.snapshot.id,
                    "registered with parent"
                );
            }
            Err(e) => {
                self.state.send_replace(LinkState::Unregistered);
                tracing::warn!(
                    parent = %self.parent,
                    error = %e,
                    "registration with parent failed"
                );
            }
        }
    }

    async fn reregister(&self) {
        self.state.send_replace(LinkState::Reregistering);
        tracing::info!(
            parent = %self.parent,
            id = %self.snapshot.id,
            "parent forgot us, re-registering"
        );

        if let Err(e) = self.upstream.unregister(&self.parent, &self.snapshot).await {
            tracing::debug!(
                parent = %self.parent,
                error = %e,
                "unregister before re-register failed"
            );
        }
        self.register().await;
    }
}
