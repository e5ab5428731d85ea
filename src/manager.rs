//! Configuration manager
//!
//! Owns the current snapshot of a tier and everything running under it: the
//! parent link, the sweeper and the sampling workers. [`ConfigManager::apply`]
//! swaps all of it for a new snapshot and falls back to the previous one if the
//! new one cannot be brought up.
//!
//! Applies are serialized. Request handlers only ever see the last completed
//! installation through [`ConfigManager::installed`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, watch};

use crate::config::settings::MonitorSettings;
use crate::config::{TierConfig, TierRole};
use crate::drivers::DriverRegistry;
use crate::events::EventHub;
use crate::gateway::ForwardingGateway;
use crate::liveness::{ChildRegistry, LinkState, ParentLink, Sweeper, WarningPoll};
use crate::sampling::{SamplingWorker, SensorSlots};
use crate::transport::{Downstream, Upstream};
use crate::{Error, Result};

/// Snapshot asks for another listener address than the one bound at first
/// installation; the process must be restarted to bind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartRequired {
    pub from: String,
    pub to: String,
}

/// Successful installation
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub generation: u64,
    pub snapshot: Arc<TierConfig>,
    pub restart_required: Option<RestartRequired>,
}

/// Result of an apply that passed pre-flight checks
#[derive(Debug)]
pub enum ApplyOutcome {
    /// New snapshot is current
    Applied(ApplyReport),
    /// New snapshot failed to start; the previous one is current again
    RolledBack {
        error: Error,
        restored_generation: u64,
    },
    /// Neither the new nor the previous snapshot could be started; nothing is running
    Fatal {
        error: Error,
        rollback_error: Option<Error>,
    },
}

impl ApplyOutcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// What request handlers see of the current installation
#[derive(Debug, Clone)]
pub struct Installed {
    pub generation: u64,
    pub snapshot: Arc<TierConfig>,
    pub gateway: Arc<ForwardingGateway>,
    pub sensors: Arc<HashMap<String, SensorSlots>>,
    pub link: Option<watch::Receiver<LinkState>>,
}

impl Installed {
    /// Current parent link state, if this tier has a parent
    #[must_use]
    pub fn link_state(&self) -> Option<LinkState> {
        self.link.as_ref().map(|rx| *rx.borrow())
    }
}

/// Collaborators shared by every installation
#[derive(Debug, Clone)]
pub struct ManagerDeps {
    pub role: TierRole,
    pub settings: MonitorSettings,
    pub upstream: Arc<dyn Upstream>,
    pub downstream: Arc<dyn Downstream>,
    pub drivers: Arc<DriverRegistry>,
    pub registry: Arc<ChildRegistry>,
    /// Present at the top tier
    pub hub: Option<EventHub>,
}

/// Everything running under one snapshot
struct Activation {
    gateway: Arc<ForwardingGateway>,
    link: Option<ParentLink>,
    sweeper: Option<Sweeper>,
    samplers: Vec<SamplingWorker>,
}

impl Activation {
    async fn stop(self) {
        for sampler in self.samplers {
            sampler.stop().await;
        }
        if let Some(sweeper) = self.sweeper {
            sweeper.stop().await;
        }
        if let Some(link) = self.link {
            link.stop().await;
        }
    }

    fn view(&self, generation: u64, snapshot: Arc<TierConfig>) -> Installed {
        let sensors = self
            .samplers
            .iter()
            .map(|s| (s.sensor_id().to_string(), s.slots()))
            .collect();

        Installed {
            generation,
            snapshot,
            gateway: self.gateway.clone(),
            sensors: Arc::new(sensors),
            link: self.link.as_ref().map(ParentLink::subscribe),
        }
    }
}

#[derive(Default)]
struct Running {
    current: Option<Arc<TierConfig>>,
    activation: Option<Activation>,
    generation: u64,
}

/// Atomic snapshot replacement with rollback
pub struct ConfigManager {
    deps: ManagerDeps,
    running: Mutex<Running>,
    published: RwLock<Option<Installed>>,
    bound: RwLock<Option<String>>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("role", &self.deps.role)
            .field("generation", &self.installed().map(|i| i.generation))
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Create a manager with nothing installed
    #[must_use]
    pub fn new(deps: ManagerDeps) -> Self {
        Self {
            deps,
            running: Mutex::new(Running::default()),
            published: RwLock::new(None),
            bound: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn role(&self) -> TierRole {
        self.deps.role
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ChildRegistry> {
        &self.deps.registry
    }

    #[must_use]
    pub fn downstream(&self) -> &Arc<dyn Downstream> {
        &self.deps.downstream
    }

    #[must_use]
    pub const fn hub(&self) -> Option<&EventHub> {
        self.deps.hub.as_ref()
    }

    /// Last completed installation
    #[must_use]
    pub fn installed(&self) -> Option<Installed> {
        self.published.read().clone()
    }

    /// Listener address, fixed by the first successful installation
    #[must_use]
    pub fn listen_addr(&self) -> Option<String> {
        self.bound.read().clone()
    }

    /// Current snapshot
    #[must_use]
    pub fn current(&self) -> Option<Arc<TierConfig>> {
        self.published.read().as_ref().map(|i| i.snapshot.clone())
    }

    /// Check a snapshot without touching anything
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for a snapshot of another role, or a validation
    /// error for semantic problems and unknown sensor types
    pub fn preflight(&self, snapshot: &TierConfig) -> Result<()> {
        snapshot.check_role(self.deps.role)?;
        snapshot.validate()?;
        self.deps.drivers.validate(snapshot)?;
        if !self.deps.role.has_parent() && self.deps.hub.is_none() {
            return Err(Error::TypeMismatch(format!(
                "{} tier has no event hub to deliver to",
                self.deps.role
            )));
        }
        Ok(())
    }

    /// Replace the current snapshot
    ///
    /// # Errors
    ///
    /// Returns an error only when pre-flight checks reject the snapshot; nothing
    /// is stopped in that case. Start-up failures are reported through
    /// [`ApplyOutcome`].
    pub async fn apply(&self, snapshot: TierConfig) -> Result<ApplyOutcome> {
        self.preflight(&snapshot)?;
        let snapshot = Arc::new(snapshot);

        let mut running = self.running.lock().await;
        let previous = running.current.clone();
        let bound = self.listen_addr();

        tracing::info!(
            id = %snapshot.id,
            role = %self.deps.role,
            generation = running.generation + 1,
            "applying configuration"
        );

        if let Some(activation) = running.activation.take() {
            activation.stop().await;
        }

        let error = match self.activate(&snapshot).await {
            Ok(activation) => {
                let wanted = snapshot.listen_addr();
                let restart_required = match bound {
                    Some(from) if from != wanted => Some(RestartRequired { from, to: wanted }),
                    Some(_) => None,
                    None => {
                        *self.bound.write() = Some(wanted);
                        None
                    }
                };
                if let Some(restart) = &restart_required {
                    tracing::warn!(
                        from = %restart.from,
                        to = %restart.to,
                        "listen address changed, process restart required"
                    );
                }

                let generation =
                    Self::install(&mut running, &self.published, snapshot.clone(), activation);
                tracing::info!(id = %snapshot.id, generation, "configuration applied");
                return Ok(ApplyOutcome::Applied(ApplyReport {
                    generation,
                    snapshot,
                    restart_required,
                }));
            }
            Err(e) => e,
        };

        let Some(previous) = previous else {
            tracing::error!(
                id = %snapshot.id,
                error = %error,
                "initial configuration failed to start"
            );
            Self::uninstall(&mut running, &self.published);
            return Ok(ApplyOutcome::Fatal {
                error,
                rollback_error: None,
            });
        };

        tracing::warn!(
            id = %snapshot.id,
            error = %error,
            restore = %previous.id,
            "configuration failed to start, rolling back"
        );

        match self.activate(&previous).await {
            Ok(activation) => {
                let restored_generation =
                    Self::install(&mut running, &self.published, previous, activation);
                tracing::warn!(
                    generation = restored_generation,
                    "rolled back to previous configuration"
                );
                Ok(ApplyOutcome::RolledBack {
                    error,
                    restored_generation,
                })
            }
            Err(rollback_error) => {
                tracing::error!(
                    error = %error,
                    rollback_error = %rollback_error,
                    "rollback failed, tier has no running configuration"
                );
                Self::uninstall(&mut running, &self.published);
                Ok(ApplyOutcome::Fatal {
                    error,
                    rollback_error: Some(rollback_error),
                })
            }
        }
    }

    /// Stop everything and forget the current snapshot
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        if let Some(activation) = running.activation.take() {
            activation.stop().await;
        }
        Self::uninstall(&mut running, &self.published);
        tracing::info!("configuration manager shut down");
    }

    /// Start everything `snapshot` calls for
    ///
    /// On failure everything started by this call has been stopped again.
    async fn activate(&self, snapshot: &Arc<TierConfig>) -> Result<Activation> {
        let gateway = Arc::new(ForwardingGateway::for_snapshot(
            snapshot,
            self.deps.upstream.clone(),
            self.deps.hub.as_ref(),
        )?);

        let mut samplers = Vec::with_capacity(snapshot.sensors.len());
        if self.deps.role.owns_sensors() {
            for spec in &snapshot.sensors {
                let started = self
                    .deps
                    .drivers
                    .create(spec)
                    .and_then(|driver| {
                        SamplingWorker::start(spec, driver, &snapshot.id, gateway.clone())
                    });

                match started {
                    Ok(sampler) => samplers.push(sampler),
                    Err(e) => {
                        tracing::warn!(
                            sensor_id = %spec.id,
                            error = %e,
                            started = samplers.len(),
                            "sensor failed to start"
                        );
                        for sampler in samplers {
                            sampler.stop().await;
                        }
                        return Err(match e {
                            Error::Driver(message) => Error::Apply(message),
                            other => Error::Apply(format!(
                                "sensor '{}' failed to start: {other}",
                                spec.id
                            )),
                        });
                    }
                }
            }
        }

        let sweeper = self.deps.role.keeps_registry().then(|| {
            Sweeper::start(
                self.deps.registry.clone(),
                &self.deps.settings,
                self.warning_poll(snapshot),
            )
        });

        let link = if self.deps.role.has_parent() {
            match ParentLink::start(
                self.deps.upstream.clone(),
                snapshot.clone(),
                self.deps.settings.heartbeat_interval,
            ) {
                Ok(link) => Some(link),
                Err(e) => {
                    let partial = Activation {
                        gateway,
                        link: None,
                        sweeper,
                        samplers,
                    };
                    partial.stop().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Activation {
            gateway,
            link,
            sweeper,
            samplers,
        })
    }

    /// Mid tiers relay their children's warnings to their own parent
    fn warning_poll(&self, snapshot: &TierConfig) -> Option<WarningPoll> {
        if self.deps.role != TierRole::Aggregator {
            return None;
        }
        snapshot.parent.clone().map(|parent| WarningPoll {
            downstream: self.deps.downstream.clone(),
            upstream: self.deps.upstream.clone(),
            parent,
        })
    }

    fn install(
        running: &mut Running,
        published: &RwLock<Option<Installed>>,
        snapshot: Arc<TierConfig>,
        activation: Activation,
    ) -> u64 {
        running.generation += 1;
        *published.write() = Some(activation.view(running.generation, snapshot.clone()));
        running.current = Some(snapshot);
        running.activation = Some(activation);
        running.generation
    }

    fn uninstall(running: &mut Running, published: &RwLock<Option<Installed>>) {
        running.current = None;
        running.activation = None;
        *published.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::{EndpointDescriptor, ParentEndpoint};
    use crate::reading::{Reading, Warning};
    use crate::transport::Liveness;

    struct Quiet;

    #[async_trait]
    impl Upstream for Quiet {
        async fn register(&self, _: &ParentEndpoint, _: &TierConfig) -> Result<()> {
            Ok(())
        }

        async fn unregister(&self, _: &ParentEndpoint, _: &TierConfig) -> Result<()> {
            Ok(())
        }

        async fn heartbeat(&self, _: &ParentEndpoint, _: &str) -> Result<Liveness> {
            Ok(Liveness::Alive)
        }

        async fn forward_reading(&self, _: &ParentEndpoint, _: &Reading) -> Result<()> {
            Ok(())
        }

        async fn forward_warning(&self, _: &ParentEndpoint, _: &Warning) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Downstream for Quiet {
        async fn fetch_reading(&self, _: &EndpointDescriptor, _: &[&str]) -> Result<String> {
            Ok(String::new())
        }

        async fn poll_warning(&self, _: &EndpointDescriptor, _: &str) -> Result<Option<Warning>> {
            Ok(None)
        }

        async fn fetch_config(&self, _: &EndpointDescriptor) -> Result<String> {
            Ok(String::new())
        }

        async fn push_config(&self, _: &EndpointDescriptor, payload: String) -> Result<String> {
            Ok(payload)
        }
    }

    fn manager(role: TierRole) -> ConfigManager {
        let quiet = Arc::new(Quiet);
        ConfigManager::new(ManagerDeps {
            role,
            settings: MonitorSettings::default(),
            upstream: quiet.clone(),
            downstream: quiet,
            drivers: Arc::new(DriverRegistry::with_builtin()),
            registry: Arc::new(ChildRegistry::new()),
            hub: (role == TierRole::Bridge).then(EventHub::new),
        })
    }

    fn bridge(port: u16) -> TierConfig {
        TierConfig::from_json(&format!(
            r#"{{"host": "0.0.0.0", "port": {port}, "id": "B1", "description": "", "sensors": [], "filters": []}}"#
        ))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn generations_increase() {
        let manager = manager(TierRole::Bridge);
        assert!(manager.installed().is_none());

        let ApplyOutcome::Applied(first) = manager.apply(bridge(9003)).await.unwrap() else {
            panic!("first apply failed");
        };
        assert_eq!(first.generation, 1);
        assert!(first.restart_required.is_none());

        let ApplyOutcome::Applied(second) = manager.apply(bridge(9003)).await.unwrap() else {
            panic!("second apply failed");
        };
        assert_eq!(second.generation, 2);
        assert_eq!(manager.installed().unwrap().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn port_change_requires_restart() {
        let manager = manager(TierRole::Bridge);
        manager.apply(bridge(9003)).await.unwrap();

        let ApplyOutcome::Applied(report) = manager.apply(bridge(9100)).await.unwrap() else {
            panic!("apply failed");
        };
        let restart = report.restart_required.unwrap();
        assert_eq!(restart.from, "0.0.0.0:9003");
        assert_eq!(restart.to, "0.0.0.0:9100");
        assert_eq!(manager.current().unwrap().port, 9100);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_role_is_rejected_before_teardown() {
        let manager = manager(TierRole::Bridge);
        manager.apply(bridge(9003)).await.unwrap();

        let mut collector = bridge(9001);
        collector.parent = Some(ParentEndpoint {
            address: "10.0.0.1".to_string(),
            port: 9002,
        });
        let err = manager.apply(collector).await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
        assert_eq!(manager.installed().unwrap().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_installation() {
        let manager = manager(TierRole::Bridge);
        manager.apply(bridge(9003)).await.unwrap();
        manager.shutdown().await;
        assert!(manager.current().is_none());
    }
}
