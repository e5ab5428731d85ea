//! Sensor drivers
//!
//! A driver turns a [`SensorSpec`] into numbers. Drivers are resolved by the
//! spec's `type` string through an explicit [`DriverRegistry`]; an unknown type
//! is rejected when a snapshot is applied, before anything is torn down.
//!
//! Periodic reads run on tokio's blocking pool. `initialize`, the first read and
//! `close` run inline while a snapshot is applied or stopped and must return
//! quickly.

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

pub use builtin::{ConstantDriver, StubDriver, SysfsDriver};

use crate::config::{SensorSpec, TierConfig};
use crate::{Error, Result};

/// One opened sensor
pub trait SensorDriver: Send {
    /// Open the device
    ///
    /// # Errors
    ///
    /// Returns a driver error if the device is unusable
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Take one sample
    ///
    /// # Errors
    ///
    /// Returns a driver error if the device cannot be read
    fn read(&mut self) -> Result<f64>;

    /// Release the device
    fn close(&mut self) {}
}

/// Constructor for one driver type
pub type DriverFactory = Arc<dyn Fn(&SensorSpec) -> Result<Box<dyn SensorDriver>> + Send + Sync>;

/// Maps sensor type names to driver constructors
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl DriverRegistry {
    /// Create a registry with no drivers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in drivers
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |spec| Ok(Box::new(StubDriver::from_spec(spec))));
        registry.register("constant", |spec| {
            Ok(Box::new(ConstantDriver::from_spec(spec)?))
        });
        registry.register("sysfs", |spec| Ok(Box::new(SysfsDriver::from_spec(spec)?)));
        registry
    }

    /// Register or replace a driver type
    pub fn register<F>(&mut self, sensor_type: impl Into<String>, factory: F)
    where
        F: Fn(&SensorSpec) -> Result<Box<dyn SensorDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(sensor_type.into(), Arc::new(factory));
    }

    /// Whether a driver type is known
    #[must_use]
    pub fn contains(&self, sensor_type: &str) -> bool {
        self.factories.contains_key(sensor_type)
    }

    /// Known driver type names
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Check that every sensor of `snapshot` has a known driver
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first unknown type
    pub fn validate(&self, snapshot: &TierConfig) -> Result<()> {
        match snapshot.sensors.iter().find(|s| !self.contains(&s.sensor_type)) {
            Some(sensor) => Err(Error::Validation(format!(
                "sensor '{}' has unknown type '{}'",
                sensor.id, sensor.sensor_type
            ))),
            None => Ok(()),
        }
    }

    /// Build an unopened driver for `spec`
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown types, or whatever the factory reports
    pub fn create(&self, spec: &SensorSpec) -> Result<Box<dyn SensorDriver>> {
        let factory = self.factories.get(&spec.sensor_type).ok_or_else(|| {
            Error::Validation(format!(
                "sensor '{}' has unknown type '{}'",
                spec.id, spec.sensor_type
            ))
        })?;
        factory(spec)
    }
}
