//! Configuration snapshots for a tier
//!
//! A [`TierConfig`] is the immutable parameter set one tier runs under: where it
//! listens, who it is, where its parent lives, which sensors it samples and which
//! filter rules guard its forwarding path. Snapshots travel between tiers as JSON
//! and can be loaded from JSON, TOML or YAML files.

pub mod file;
pub mod settings;

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Role a tier plays in the hierarchy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TierRole {
    /// Device-facing tier that samples sensors
    Collector,
    /// Mid-level tier that keeps a registry of collectors
    Aggregator,
    /// Top-level tier that keeps a registry of aggregators
    Bridge,
}

impl TierRole {
    /// Whether this role registers with a parent
    #[must_use]
    pub const fn has_parent(self) -> bool {
        matches!(self, Self::Collector | Self::Aggregator)
    }

    /// Whether this role tracks children in a registry
    #[must_use]
    pub const fn keeps_registry(self) -> bool {
        matches!(self, Self::Aggregator | Self::Bridge)
    }

    /// Whether this role runs sampling workers
    #[must_use]
    pub const fn owns_sensors(self) -> bool {
        matches!(self, Self::Collector)
    }

    /// Role of the children this role keeps in its registry
    #[must_use]
    pub const fn child_role(self) -> Option<Self> {
        match self {
            Self::Collector => None,
            Self::Aggregator => Some(Self::Collector),
            Self::Bridge => Some(Self::Aggregator),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Aggregator => "aggregator",
            Self::Bridge => "bridge",
        }
    }
}

impl fmt::Display for TierRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a remote party
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub address: String,
    pub port: u16,
    pub id: String,
    pub description: String,
}

impl EndpointDescriptor {
    /// Base URL for HTTP calls to this endpoint
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address cannot form a URL
    pub fn base_url(&self) -> Result<Url> {
        base_url(&self.address, self.port)
    }
}

/// Address of the parent tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParentEndpoint {
    pub address: String,
    pub port: u16,
}

impl ParentEndpoint {
    /// Base URL for HTTP calls to the parent
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address cannot form a URL
    pub fn base_url(&self) -> Result<Url> {
        base_url(&self.address, self.port)
    }
}

impl fmt::Display for ParentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

fn base_url(address: &str, port: u16) -> Result<Url> {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    };

    Url::parse(&format!("http://{host}:{port}/"))
        .map_err(|e| Error::Validation(format!("invalid address '{address}': {e}")))
}

/// Value band outside of which a sensor reports a warning
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarningBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,
}

impl WarningBand {
    /// Describe why `value` is out of band, if it is
    #[must_use]
    pub fn check(&self, value: f64) -> Option<String> {
        if let Some(above) = self.above {
            if value > above {
                return Some(format!("value {value} above {above}"));
            }
        }
        if let Some(below) = self.below {
            if value < below {
                return Some(format!("value {value} below {below}"));
            }
        }
        None
    }
}

/// One sensor declared by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorSpec {
    /// Driver type, resolved through the driver registry
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub id: String,
    pub description: String,
    /// Driver-specific parameters
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Sampling interval in seconds
    pub interval: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<WarningBand>,
}

impl SensorSpec {
    /// Sampling interval as a duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval).unwrap_or(Duration::from_secs(1))
    }
}

/// Comparison applied by a filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    LessThan,
}

/// Threshold rule deciding whether a reading is dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRule {
    /// Sensor type to match, or `*`
    pub sensor_type: String,
    /// Sensor id to match, or `*`
    pub sensor_id: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

/// Immutable configuration snapshot of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Own id, unique among siblings
    pub id: String,
    pub description: String,
    /// Parent tier; absent for the top tier
    #[serde(default)]
    pub parent: Option<ParentEndpoint>,
    /// Sensors sampled by a collector, empty for the other roles
    pub sensors: Vec<SensorSpec>,
    /// Filter rules in evaluation order
    pub filters: Vec<FilterRule>,
}

impl TierConfig {
    /// Parse a snapshot from its JSON wire form
    ///
    /// # Errors
    ///
    /// Returns a validation error on missing keys, wrong types or unknown keys
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Parse a snapshot from raw JSON bytes
    ///
    /// # Errors
    ///
    /// Returns a validation error on missing keys, wrong types or unknown keys
    pub fn from_json_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Serialize to the JSON wire form
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check semantic constraints the schema cannot express
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first violation
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("id must not be empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Validation("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Validation("port must not be 0".to_string()));
        }

        if let Some(parent) = &self.parent {
            if parent.address.trim().is_empty() || parent.port == 0 {
                return Err(Error::Validation(format!("invalid parent endpoint {parent}")));
            }
            parent.base_url()?;
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err(Error::Validation("sensor id must not be empty".to_string()));
            }
            if !seen.insert(sensor.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate sensor id '{}'",
                    sensor.id
                )));
            }
            if !sensor.interval.is_finite() || sensor.interval <= 0.0 {
                return Err(Error::Validation(format!(
                    "sensor '{}' interval must be a positive number of seconds",
                    sensor.id
                )));
            }
        }

        if let Some(rule) = self.filters.iter().find(|r| !r.threshold.is_finite()) {
            return Err(Error::Validation(format!(
                "filter on '{}/{}' has a non-finite threshold",
                rule.sensor_type, rule.sensor_id
            )));
        }

        Ok(())
    }

    /// Check that this snapshot fits the given tier role
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the snapshot belongs to another role
    pub fn check_role(&self, role: TierRole) -> Result<()> {
        match (role.has_parent(), &self.parent) {
            (true, None) => {
                return Err(Error::TypeMismatch(format!(
                    "a {role} snapshot requires a parent"
                )));
            }
            (false, Some(parent)) => {
                return Err(Error::TypeMismatch(format!(
                    "a {role} snapshot cannot have a parent (got {parent})"
                )));
            }
            _ => {}
        }

        if !role.owns_sensors() && !self.sensors.is_empty() {
            return Err(Error::TypeMismatch(format!(
                "a {role} snapshot cannot declare sensors"
            )));
        }

        Ok(())
    }

    /// Descriptor announcing this tier to its parent
    #[must_use]
    pub fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor {
            address: self.host.clone(),
            port: self.port,
            id: self.id.clone(),
            description: self.description.clone(),
        }
    }

    /// `host:port` the HTTP listener binds to
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Look up a declared sensor
    #[must_use]
    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorSpec> {
        self.sensors.iter().find(|s| s.id == sensor_id)
    }
}
