//! Sensor readings and warnings as they travel up the hierarchy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One sampled value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reading {
    pub sensor_id: String,
    pub sensor_type: String,
    pub raw_value: f64,
    /// Tier that sampled the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tier_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create a reading stamped with the current time
    #[must_use]
    pub fn now(sensor_id: &str, sensor_type: &str, raw_value: f64) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            sensor_type: sensor_type.to_string(),
            raw_value,
            origin_tier_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the originating tier
    #[must_use]
    pub fn from_tier(mut self, tier_id: &str) -> Self {
        self.origin_tier_id = Some(tier_id.to_string());
        self
    }

    /// Parse a pushed reading
    ///
    /// # Errors
    ///
    /// Returns a validation error if the payload is malformed or the value is not finite
    pub fn from_json_slice(payload: &[u8]) -> Result<Self> {
        let reading: Self =
            serde_json::from_slice(payload).map_err(|e| Error::Validation(e.to_string()))?;
        if !reading.raw_value.is_finite() {
            return Err(Error::Validation(format!(
                "reading from '{}' has a non-finite value",
                reading.sensor_id
            )));
        }
        Ok(reading)
    }
}

/// Out-of-band condition reported by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub reading: Reading,
    pub message: String,
}
