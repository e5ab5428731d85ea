//! Built-in drivers

use std::path::PathBuf;

use super::SensorDriver;
use crate::config::SensorSpec;
use crate::{Error, Result};

/// Counter that grows by one on every read
#[derive(Debug, Default)]
pub struct StubDriver {
    count: u32,
}

impl StubDriver {
    #[must_use]
    pub fn from_spec(_spec: &SensorSpec) -> Self {
        Self::default()
    }
}

impl SensorDriver for StubDriver {
    fn read(&mut self) -> Result<f64> {
        self.count = self.count.wrapping_add(1);
        Ok(f64::from(self.count))
    }
}

/// Fixed value from `config.value`
#[derive(Debug)]
pub struct ConstantDriver {
    value: f64,
}

impl ConstantDriver {
    /// # Errors
    ///
    /// Returns a validation error if `config.value` is missing or not a number
    pub fn from_spec(spec: &SensorSpec) -> Result<Self> {
        let value = spec
            .config
            .get("value")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "constant sensor '{}' needs a numeric config.value",
                    spec.id
                ))
            })?;
        Ok(Self { value })
    }
}

impl SensorDriver for ConstantDriver {
    fn read(&mut self) -> Result<f64> {
        Ok(self.value)
    }
}

/// Number read from a file such as `/sys/class/thermal/thermal_zone0/temp`
///
/// The value is multiplied by `config.scale` (default 1.0).
#[derive(Debug)]
pub struct SysfsDriver {
    path: PathBuf,
    scale: f64,
    opened: bool,
}

impl SysfsDriver {
    /// # Errors
    ///
    /// Returns a validation error if `config.path` is missing
    pub fn from_spec(spec: &SensorSpec) -> Result<Self> {
        let path = spec
            .config
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::Validation(format!("sysfs sensor '{}' needs config.path", spec.id))
            })?;
        let scale = spec
            .config
            .get("scale")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(1.0);

        Ok(Self {
            path: PathBuf::from(path),
            scale,
            opened: false,
        })
    }

    fn sample(&self) -> Result<f64> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Driver(format!("{}: {e}", self.path.display())))?;
        let value: f64 = raw.trim().parse().map_err(|e| {
            Error::Driver(format!("{}: not a number ({e})", self.path.display()))
        })?;
        Ok(value * self.scale)
    }
}

impl SensorDriver for SysfsDriver {
    fn initialize(&mut self) -> Result<()> {
        self.sample()?;
        self.opened = true;
        tracing::debug!(path = %self.path.display(), "sysfs sensor opened");
        Ok(())
    }

    fn read(&mut self) -> Result<f64> {
        if !self.opened {
            return Err(Error::Driver(format!(
                "{} read before initialize",
                self.path.display()
            )));
        }
        self.sample()
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
