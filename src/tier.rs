//! One running tier: wires the transport, registry, drivers and configuration
//! manager for a role, installs the initial snapshot and serves the API.

use std::future::Future;
use std::sync::Arc;

use crate::api::{ApiServer, ApiState};
use crate::config::settings::MonitorSettings;
use crate::config::{TierConfig, TierRole};
use crate::drivers::DriverRegistry;
use crate::events::EventHub;
use crate::liveness::ChildRegistry;
use crate::manager::{ApplyOutcome, ConfigManager, ManagerDeps};
use crate::transport::HttpTransport;
use crate::{Error, Result};

/// A tier ready to serve
#[derive(Debug)]
pub struct Tier {
    manager: Arc<ConfigManager>,
}

impl Tier {
    /// Build a tier for `role` with the built-in sensor drivers
    ///
    /// # Errors
    ///
    /// Returns error if the settings are unusable or the HTTP client cannot be built
    pub fn new(role: TierRole, settings: MonitorSettings) -> Result<Self> {
        Self::with_drivers(role, settings, DriverRegistry::with_builtin())
    }

    /// Build a tier for `role` with a custom driver table
    ///
    /// # Errors
    ///
    /// Returns error if the settings are unusable or the HTTP client cannot be built
    pub fn with_drivers(
        role: TierRole,
        settings: MonitorSettings,
        drivers: DriverRegistry,
    ) -> Result<Self> {
        settings.validate()?;

        let transport = Arc::new(HttpTransport::new(
            settings.connect_timeout,
            settings.request_timeout,
        )?);
        let hub = (role == TierRole::Bridge).then(EventHub::new);

        let manager = ConfigManager::new(ManagerDeps {
            role,
            settings,
            upstream: transport.clone(),
            downstream: transport,
            drivers: Arc::new(drivers),
            registry: Arc::new(ChildRegistry::new()),
            hub,
        });

        Ok(Self {
            manager: Arc::new(manager),
        })
    }

    #[must_use]
    pub const fn manager(&self) -> &Arc<ConfigManager> {
        &self.manager
    }

    /// Install the initial snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot is rejected or any of its workers fails to start
    pub async fn install(&self, snapshot: TierConfig) -> Result<()> {
        match self.manager.apply(snapshot).await? {
            ApplyOutcome::Applied(report) => {
                tracing::info!(
                    id = %report.snapshot.id,
                    generation = report.generation,
                    "initial configuration installed"
                );
                Ok(())
            }
            ApplyOutcome::RolledBack { error, .. } | ApplyOutcome::Fatal { error, .. } => {
                Err(Error::Apply(format!("initial configuration failed: {error}")))
            }
        }
    }

    /// Serve the API until `shutdown` resolves, then stop every worker
    ///
    /// The listener stays on the address of the initial snapshot; later
    /// snapshots that move it only flag that a restart is required.
    ///
    /// # Errors
    ///
    /// Returns error if no snapshot was installed or the listener fails
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(listen_addr) = self.manager.listen_addr() else {
            return Err(Error::Config(
                "install a configuration before serving".to_string(),
            ));
        };

        let state = Arc::new(ApiState::new(self.manager.clone()));
        let served = ApiServer::new(state, listen_addr).run(shutdown).await;

        self.manager.shutdown().await;
        served
    }

    /// Install `snapshot` and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if installation or the listener fails
    pub async fn run(self, snapshot: TierConfig) -> Result<()> {
        if let Err(e) = self.install(snapshot).await {
            self.manager.shutdown().await;
            return Err(e);
        }

        self.serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
        })
        .await
    }
}
