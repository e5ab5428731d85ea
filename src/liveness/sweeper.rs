//! Parent side of the liveness protocol: evict silent children and relay their
//! warnings one hop up.

use std::sync::Arc;

use tokio::time::Instant;

use super::{StopSignal, Worker};
use crate::config::settings::MonitorSettings;
use crate::config::{ParentEndpoint, TierConfig};
use crate::registry::Registry;
use crate::transport::{Downstream, Upstream};

/// Registry of children keyed by id, each with the snapshot it registered with
pub type ChildRegistry = Registry<Arc<TierConfig>>;

/// Where polled warnings come from and where they go
#[derive(Debug, Clone)]
pub struct WarningPoll {
    pub downstream: Arc<dyn Downstream>,
    pub upstream: Arc<dyn Upstream>,
    pub parent: ParentEndpoint,
}

impl WarningPoll {
    /// Ask every declared sensor of every child and relay what is reported
    async fn poll(&self, registry: &ChildRegistry) {
        for entry in registry.list() {
            let child = &entry.descriptor;
            for sensor in &entry.attached.sensors {
                let warning = match self.downstream.poll_warning(child, &sensor.id).await {
                    Ok(Some(warning)) => warning,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::debug!(
                            child_id = %child.id,
                            sensor_id = %sensor.id,
                            error = %e,
                            "warning poll failed"
                        );
                        continue;
                    }
                };

                tracing::info!(
                    child_id = %child.id,
                    sensor_id = %sensor.id,
                    message = %warning.message,
                    "relaying warning"
                );
                if let Err(e) = self.upstream.forward_warning(&self.parent, &warning).await {
                    tracing::warn!(parent = %self.parent, error = %e, "warning relay failed");
                }
            }
        }
    }
}

/// Running eviction loop over one registry
#[derive(Debug)]
pub struct Sweeper {
    worker: Worker,
    registry: Arc<ChildRegistry>,
}

impl Sweeper {
    /// Start sweeping `registry` every `check_interval`
    #[must_use]
    pub fn start(
        registry: Arc<ChildRegistry>,
        settings: &MonitorSettings,
        warnings: Option<WarningPoll>,
    ) -> Self {
        let check_interval = settings.check_interval;
        let max_live = settings.max_live_interval;
        let swept = registry.clone();

        let worker = Worker::spawn("sweeper", move |mut signal: StopSignal| async move {
            while !signal.sleep(check_interval).await {
                let evicted = swept.sweep(max_live, Instant::now());
                if !evicted.is_empty() {
                    tracing::info!(
                        count = evicted.len(),
                        remaining = swept.len(),
                        "sweep evicted children"
                    );
                }

                if let Some(poll) = &warnings {
                    poll.poll(&swept).await;
                }
            }
        });

        tracing::debug!(
            check_secs = check_interval.as_secs_f64(),
            max_live_secs = max_live.as_secs_f64(),
            "sweeper started"
        );
        Self { worker, registry }
    }

    /// Stop sweeping and forget every child
    ///
    /// Children re-register on their next heartbeat.
    pub async fn stop(self) {
        self.worker.stop().await;
        self.registry.clear();
    }
}
