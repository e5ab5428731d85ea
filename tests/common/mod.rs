//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use sensor_mesh::config::settings::MonitorSettings;
use sensor_mesh::{
    ChildRegistry, ConfigManager, Downstream, DriverRegistry, EndpointDescriptor, Error, EventHub,
    Liveness, ManagerDeps, ParentEndpoint, Reading, Result, SensorDriver, TierConfig, TierRole,
    Upstream, Warning,
};

/// In-memory stand-in for the tiers around the one under test
///
/// Records every call toward the parent and answers calls toward children
/// from canned bodies.
#[derive(Default)]
pub struct FakeMesh {
    pub registrations: Mutex<Vec<String>>,
    pub unregistrations: Mutex<Vec<String>>,
    pub forwarded: Mutex<Vec<Reading>>,
    pub warnings: Mutex<Vec<Warning>>,
    pub pushed_configs: Mutex<Vec<(String, String)>>,
    pub child_reading: Mutex<Option<String>>,
    pub fetched: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn forwarded_values(&self) -> Vec<f64> {
        self.forwarded.lock().iter().map(|r| r.raw_value).collect()
    }
}

#[async_trait]
impl Upstream for FakeMesh {
    async fn register(&self, _: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        self.registrations.lock().push(snapshot.id.clone());
        Ok(())
    }

    async fn unregister(&self, _: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        self.unregistrations.lock().push(snapshot.id.clone());
        Ok(())
    }

    async fn heartbeat(&self, _: &ParentEndpoint, _: &str) -> Result<Liveness> {
        Ok(Liveness::Alive)
    }

    async fn forward_reading(&self, _: &ParentEndpoint, reading: &Reading) -> Result<()> {
        self.forwarded.lock().push(reading.clone());
        Ok(())
    }

    async fn forward_warning(&self, _: &ParentEndpoint, warning: &Warning) -> Result<()> {
        self.warnings.lock().push(warning.clone());
        Ok(())
    }
}

#[async_trait]
impl Downstream for FakeMesh {
    async fn fetch_reading(&self, child: &EndpointDescriptor, path: &[&str]) -> Result<String> {
        self.fetched.lock().push((
            child.id.clone(),
            path.iter().map(ToString::to_string).collect(),
        ));
        self.child_reading.lock().clone().ok_or_else(|| Error::Upstream {
            target: format!("{}/reading/{}", child.id, path.join("/")),
            status: 500,
            body: String::new(),
        })
    }

    async fn poll_warning(&self, _: &EndpointDescriptor, _: &str) -> Result<Option<Warning>> {
        Ok(None)
    }

    async fn fetch_config(&self, child: &EndpointDescriptor) -> Result<String> {
        Ok(format!(r#"{{"id":"{}"}}"#, child.id))
    }

    async fn push_config(&self, child: &EndpointDescriptor, payload: String) -> Result<String> {
        self.pushed_configs
            .lock()
            .push((child.id.clone(), payload.clone()));
        Ok(payload)
    }
}

/// Parent whose calls land directly in a registry, as its HTTP API would
pub struct LoopbackParent {
    pub registry: Arc<ChildRegistry>,
    pub heartbeats: AtomicUsize,
}

impl LoopbackParent {
    pub fn new(registry: Arc<ChildRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            heartbeats: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Upstream for LoopbackParent {
    async fn register(&self, _: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        self.registry
            .register(snapshot.descriptor(), Arc::new(snapshot.clone()));
        Ok(())
    }

    async fn unregister(&self, _: &ParentEndpoint, snapshot: &TierConfig) -> Result<()> {
        self.registry.unregister(&snapshot.id);
        Ok(())
    }

    async fn heartbeat(&self, _: &ParentEndpoint, id: &str) -> Result<Liveness> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        match self.registry.refresh(id) {
            Ok(()) => Ok(Liveness::Alive),
            Err(Error::NotFound(_)) => Ok(Liveness::Unknown),
            Err(e) => Err(e),
        }
    }

    async fn forward_reading(&self, _: &ParentEndpoint, _: &Reading) -> Result<()> {
        Ok(())
    }

    async fn forward_warning(&self, _: &ParentEndpoint, _: &Warning) -> Result<()> {
        Ok(())
    }
}

/// Counts how many devices are open across every driver it hands out
#[derive(Default)]
pub struct DeviceCounter {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    /// Most devices open at the same time
    pub peak: AtomicUsize,
}

impl DeviceCounter {
    pub fn open_now(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

pub struct CountedDriver {
    counter: Arc<DeviceCounter>,
    fail_init: bool,
    open: bool,
}

impl SensorDriver for CountedDriver {
    fn initialize(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(Error::Driver("device not present".to_string()));
        }
        self.counter.opened.fetch_add(1, Ordering::SeqCst);
        self.counter
            .peak
            .fetch_max(self.counter.open_now(), Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<f64> {
        Ok(20.0)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.counter.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Driver table with `counted` (always works), `broken` (never opens) and
/// `flaky` (opens once, then never again)
pub fn counting_drivers(counter: &Arc<DeviceCounter>) -> DriverRegistry {
    let mut drivers = DriverRegistry::new();

    let c = counter.clone();
    drivers.register("counted", move |_| {
        Ok(Box::new(CountedDriver {
            counter: c.clone(),
            fail_init: false,
            open: false,
        }))
    });

    let c = counter.clone();
    drivers.register("broken", move |_| {
        Ok(Box::new(CountedDriver {
            counter: c.clone(),
            fail_init: true,
            open: false,
        }))
    });

    let c = counter.clone();
    let created = Arc::new(AtomicUsize::new(0));
    drivers.register("flaky", move |_| {
        let first = created.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(Box::new(CountedDriver {
            counter: c.clone(),
            fail_init: !first,
            open: false,
        }))
    });

    drivers
}

/// Manager for `role` wired to `mesh` and `drivers`
pub fn manager_with(
    role: TierRole,
    mesh: Arc<FakeMesh>,
    drivers: DriverRegistry,
) -> Arc<ConfigManager> {
    Arc::new(ConfigManager::new(ManagerDeps {
        role,
        settings: MonitorSettings::default(),
        upstream: mesh.clone(),
        downstream: mesh,
        drivers: Arc::new(drivers),
        registry: Arc::new(ChildRegistry::new()),
        hub: (role == TierRole::Bridge).then(EventHub::new),
    }))
}

pub fn manager(role: TierRole, mesh: Arc<FakeMesh>) -> Arc<ConfigManager> {
    manager_with(role, mesh, DriverRegistry::with_builtin())
}

/// Collector `N1` under an aggregator at 10.0.0.1:9002
pub fn collector(sensors: &[(&str, &str)]) -> TierConfig {
    let sensors: Vec<serde_json::Value> = sensors
        .iter()
        .map(|(id, sensor_type)| {
            serde_json::json!({
                "type": sensor_type, "id": id, "description": "", "interval": 5.0
            })
        })
        .collect();

    let value = serde_json::json!({
        "host": "0.0.0.0", "port": 9001,
        "id": "N1", "description": "north wing",
        "parent": { "address": "10.0.0.1", "port": 9002 },
        "sensors": sensors,
        "filters": []
    });
    serde_json::from_value(value).expect("valid collector snapshot")
}

/// Aggregator `A1` under the bridge, dropping readings above 100
pub fn aggregator() -> TierConfig {
    TierConfig::from_json(
        r#"{
            "host": "0.0.0.0", "port": 9002,
            "id": "A1", "description": "site",
            "parent": { "address": "10.0.0.2", "port": 9003 },
            "sensors": [],
            "filters": [
                { "sensor_type": "*", "sensor_id": "*", "comparator": "greater_than", "threshold": 100.0 }
            ]
        }"#,
    )
    .expect("valid aggregator snapshot")
}

/// Bridge `B1` listening on `port`
pub fn bridge(port: u16) -> TierConfig {
    TierConfig::from_json(&format!(
        r#"{{"host": "0.0.0.0", "port": {port}, "id": "B1", "description": "top", "sensors": [], "filters": []}}"#
    ))
    .expect("valid bridge snapshot")
}
